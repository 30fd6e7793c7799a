//! Glyph outline sources for text drawn through `draw_char`.
//!
//! Outlines are returned in em space (one unit per em); the device scales
//! them by the text rendering matrix.

use std::fmt;

use rustc_hash::FxHashMap;
use ttf_parser::{Face, GlyphId, OutlineBuilder};

use super::path::Path;
use crate::core::error::{RasterError, RasterResult};

/// Anything that can produce a glyph outline for a character code.
pub trait GlyphSource: fmt::Debug {
    /// Outline of `code` in em space, or `None` for a blank or missing
    /// glyph.
    fn glyph_path(&self, code: u32) -> Option<Path>;
}

struct PathConverter {
    path: Path,
    scale: f64,
}

impl OutlineBuilder for PathConverter {
    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to(x as f64 * self.scale, y as f64 * self.scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.path.line_to(x as f64 * self.scale, y as f64 * self.scale);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        // Elevate to a cubic: control points 2/3 of the way to the quad's.
        let (x0, y0) = self.path.current_point().unwrap_or((0.0, 0.0));
        let (qx, qy) = (x1 as f64 * self.scale, y1 as f64 * self.scale);
        let (ex, ey) = (x as f64 * self.scale, y as f64 * self.scale);
        self.path.curve_to(
            x0 + 2.0 / 3.0 * (qx - x0),
            y0 + 2.0 / 3.0 * (qy - y0),
            ex + 2.0 / 3.0 * (qx - ex),
            ey + 2.0 / 3.0 * (qy - ey),
            ex,
            ey,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let s = self.scale;
        self.path.curve_to(
            x1 as f64 * s,
            y1 as f64 * s,
            x2 as f64 * s,
            y2 as f64 * s,
            x as f64 * s,
            y as f64 * s,
        );
    }

    fn close(&mut self) {
        self.path.close_path();
    }
}

/// An embedded TrueType or OpenType program.
pub struct TrueTypeFont {
    data: Vec<u8>,
    index: u32,
    units_per_em: f64,
    /// Code to glyph id map from the font dictionary, when it has one
    code_to_gid: Option<Vec<u16>>,
}

impl fmt::Debug for TrueTypeFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrueTypeFont")
            .field("bytes", &self.data.len())
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl TrueTypeFont {
    pub fn new(data: Vec<u8>, index: u32) -> RasterResult<Self> {
        let face = Face::parse(&data, index).map_err(|e| RasterError::FontLoad(e.to_string()))?;
        let units_per_em = face.units_per_em() as f64;
        Ok(TrueTypeFont {
            data,
            index,
            units_per_em,
            code_to_gid: None,
        })
    }

    pub fn with_code_map(mut self, code_to_gid: Vec<u16>) -> Self {
        self.code_to_gid = Some(code_to_gid);
        self
    }

    fn glyph_id(&self, face: &Face<'_>, code: u32) -> Option<GlyphId> {
        if let Some(map) = &self.code_to_gid {
            return map.get(code as usize).map(|&g| GlyphId(g));
        }
        // Symbolic fonts often map codes into the private-use range.
        [code, 0xf000 + code]
            .into_iter()
            .filter_map(char::from_u32)
            .find_map(|c| face.glyph_index(c))
    }
}

impl GlyphSource for TrueTypeFont {
    fn glyph_path(&self, code: u32) -> Option<Path> {
        let face = Face::parse(&self.data, self.index).ok()?;
        let gid = self.glyph_id(&face, code)?;
        let mut conv = PathConverter {
            path: Path::new(),
            scale: 1.0 / self.units_per_em,
        };
        face.outline_glyph(gid, &mut conv)?;
        Some(conv.path)
    }
}

/// Glyph outlines supplied directly, keyed by character code.
#[derive(Debug, Default, Clone)]
pub struct OutlineFont {
    glyphs: FxHashMap<u32, Path>,
}

impl OutlineFont {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: u32, outline: Path) {
        self.glyphs.insert(code, outline);
    }
}

impl GlyphSource for OutlineFont {
    fn glyph_path(&self, code: u32) -> Option<Path> {
        self.glyphs.get(&code).cloned()
    }
}
