//! Tiling patterns rendered natively: one cell is drawn into an offscreen
//! canvas, then either blitted tile by tile or sampled as a wrapping
//! pattern.

use std::rc::Rc;

use log::debug;

use super::canvas::{Canvas, DeviceColor};
use super::pattern::Pattern;
use crate::core::geometry::{Matrix, PixelRect, Rect};

/// Largest cell edge in pixels, whatever the pixel budget.
pub const MAX_CELL_DIMENSION: usize = 16384;

/// `PaintType` of a tiling pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaintType {
    /// The cell carries its own colors
    #[default]
    Colored,
    /// The cell is a stencil painted with the current fill color
    Uncolored,
}

impl PaintType {
    pub fn from_i32(v: i32) -> Self {
        if v == 2 { PaintType::Uncolored } else { PaintType::Colored }
    }
}

/// The pattern dictionary entries the device needs.
#[derive(Debug, Clone)]
pub struct TilingParams {
    pub bbox: Rect,
    pub x_step: f64,
    pub y_step: f64,
    /// Pattern space to the default user space of the page
    pub matrix: Matrix,
    pub paint_type: PaintType,
}

/// Tile index range `[x0, x1) x [y0, y1)` the fill covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl TileRange {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        TileRange { x0, y0, x1, y1 }
    }

    pub fn columns(&self) -> i64 {
        (self.x1 as i64 - self.x0 as i64).max(0)
    }

    pub fn rows(&self) -> i64 {
        (self.y1 as i64 - self.y0 as i64).max(0)
    }

    fn contains(&self, i: f64, j: f64) -> bool {
        i >= self.x0 as f64 && i < self.x1 as f64 && j >= self.y0 as f64 && j < self.y1 as f64
    }
}

/// How one cell is rendered and replicated.
#[derive(Debug, Clone)]
pub struct CellPlan {
    pub width: usize,
    pub height: usize,
    /// Pattern space to cell pixels; the transform the cell content is
    /// replayed under
    pub cell_matrix: Matrix,
    /// Cell space (pattern space relative to the bbox corner) to page
    /// device space
    pub device_matrix: Matrix,
    /// Cell space to cell pixels
    pub pixel_matrix: Matrix,
    pub tiles: TileRange,
    /// Times the resolution was halved to respect the pixel budget
    pub halvings: u32,
    /// Cell pixels map onto device pixels by a translation
    pub fast_blit: bool,
}

fn cell_size(extent: f64, scale: f64) -> Option<usize> {
    let v = (extent * scale).ceil();
    (v.is_finite() && v >= 0.0).then(|| (v as usize).max(1))
}

/// Decide whether and how a tiling fill can be rendered natively.
/// `None` asks the interpreter to expand it into ordinary fills.
pub fn plan_cell(params: &TilingParams, ctm: &Matrix, tiles: TileRange, max_pixels: usize) -> Option<CellPlan> {
    let bbox = params.bbox;
    let (width, height) = (bbox.width(), bbox.height());
    if params.x_step != width || params.y_step != height {
        debug!("tiling step {}x{} differs from bbox {}x{}", params.x_step, params.y_step, width, height);
        return None;
    }
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    let device_matrix = Matrix::translate(bbox.x_min, bbox.y_min)
        .then(&params.matrix)
        .then(ctm);
    if !device_matrix.is_finite() || device_matrix.determinant() == 0.0 {
        return None;
    }
    if tiles.columns().saturating_mul(tiles.rows()) <= 4 {
        return None;
    }
    let [a, b, c, d, _, _] = device_matrix.0;
    let mut sx = a.hypot(b);
    let mut sy = c.hypot(d);
    let mut halvings = 0;
    let (w, h) = loop {
        let (w, h) = (cell_size(width, sx)?, cell_size(height, sy)?);
        let over = w.checked_mul(h).is_none_or(|n| n > max_pixels)
            || w > MAX_CELL_DIMENSION
            || h > MAX_CELL_DIMENSION;
        if !over || halvings >= 64 {
            break (w, h);
        }
        sx /= 2.0;
        sy /= 2.0;
        halvings += 1;
    };
    if halvings > 0 {
        debug!("tiling cell halved {} times to {}x{}", halvings, w, h);
    }
    let (kx, ky) = (w as f64 / width, h as f64 / height);
    // Orient cell rows and columns like the device so axis-aligned
    // patterns map by a positive scale.
    let flip_x = a < 0.0 || (a == 0.0 && b < 0.0);
    let flip_y = d < 0.0 || (d == 0.0 && c < 0.0);
    let pixel_matrix = Matrix([
        if flip_x { -kx } else { kx },
        0.0,
        0.0,
        if flip_y { -ky } else { ky },
        if flip_x { w as f64 } else { 0.0 },
        if flip_y { h as f64 } else { 0.0 },
    ]);
    let cell_matrix = Matrix::translate(-bbox.x_min, -bbox.y_min).then(&pixel_matrix);
    let fast_blit = params.paint_type == PaintType::Colored && halvings == 0 && b == 0.0 && c == 0.0;
    Some(CellPlan {
        width: w,
        height: h,
        cell_matrix,
        device_matrix,
        pixel_matrix,
        tiles,
        halvings,
        fast_blit,
    })
}

impl CellPlan {
    /// Bounding box, in page pixels, of tile `(i, j)`.
    pub fn tile_bounds(&self, i: i32, j: i32, width: f64, height: f64) -> Rect {
        let cell = Rect::new(
            i as f64 * width,
            j as f64 * height,
            (i + 1) as f64 * width,
            (j + 1) as f64 * height,
        );
        self.device_matrix.transform_rect(&cell)
    }

    /// The part of the tile range that can touch `region` (page pixels).
    /// Repeat counts far beyond the visible area cost nothing.
    pub fn visible_tiles(&self, region: &PixelRect, width: f64, height: f64) -> TileRange {
        let empty = TileRange::new(self.tiles.x0, self.tiles.y0, self.tiles.x0, self.tiles.y0);
        let Some(inverse) = self.device_matrix.invert() else {
            return empty;
        };
        if region.is_empty() {
            return empty;
        }
        let cell = inverse.transform_rect(&region.to_rect());
        let to_index = |v: f64| v.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        let x0 = to_index((cell.x_min / width).floor()).max(self.tiles.x0);
        let y0 = to_index((cell.y_min / height).floor()).max(self.tiles.y0);
        let x1 = to_index((cell.x_max / width).ceil()).min(self.tiles.x1);
        let y1 = to_index((cell.y_max / height).ceil()).min(self.tiles.y1);
        TileRange::new(x0, y0, x1.max(x0), y1.max(y0))
    }
}

/// A rendered cell sampled as a wrapping pattern.
#[derive(Debug, Clone)]
pub struct TilingPattern {
    cell: Rc<Canvas>,
    /// Page device space to cell space
    inverse: Matrix,
    pixel_matrix: Matrix,
    width: f64,
    height: f64,
    tiles: TileRange,
    /// Fill color for uncolored patterns
    stencil_color: Option<DeviceColor>,
    subtractive: bool,
}

impl TilingPattern {
    /// `width` and `height` are the cell extent in pattern space.
    pub fn new(
        cell: Rc<Canvas>,
        plan: &CellPlan,
        width: f64,
        height: f64,
        stencil_color: Option<DeviceColor>,
        subtractive: bool,
    ) -> Option<Self> {
        Some(TilingPattern {
            cell,
            inverse: plan.device_matrix.invert()?,
            pixel_matrix: plan.pixel_matrix,
            width,
            height,
            tiles: plan.tiles,
            stencil_color,
            subtractive,
        })
    }

    fn texel(&self, x: i32, y: i32) -> Option<(i32, i32)> {
        let (u, v) = self.inverse.transform_point(x as f64 + 0.5, y as f64 + 0.5);
        let (i, j) = ((u / self.width).floor(), (v / self.height).floor());
        if !self.tiles.contains(i, j) {
            return None;
        }
        let (u, v) = (u - i * self.width, v - j * self.height);
        let (px, py) = self.pixel_matrix.transform_point(u, v);
        let col = (px.floor() as i64).clamp(0, self.cell.width() as i64 - 1) as i32;
        let row = (py.floor() as i64).clamp(0, self.cell.height() as i64 - 1) as i32;
        Some((col, row))
    }
}

impl Pattern for TilingPattern {
    fn sample(&self, x: i32, y: i32) -> Option<DeviceColor> {
        self.sample_with_alpha(x, y).map(|(c, _)| c)
    }

    fn quick_cover(&self, x: i32, y: i32) -> bool {
        self.texel(x, y).is_some()
    }

    fn sample_with_alpha(&self, x: i32, y: i32) -> Option<(DeviceColor, u8)> {
        let (col, row) = self.texel(x, y)?;
        let a = self.cell.alpha(col, row);
        if a == 0 {
            return None;
        }
        match &self.stencil_color {
            Some(fill) => {
                // Uncolored cells are drawn black on white: darkness is coverage.
                let lum = self.cell.pixel(col, row)[0] as u32;
                let cov = super::blend::div255((255 - lum) * a as u32);
                (cov != 0).then_some((*fill, cov))
            }
            None => Some((self.cell.pixel(col, row), a)),
        }
    }

    fn uses_subtractive_color(&self) -> bool {
        self.subtractive
    }
}
