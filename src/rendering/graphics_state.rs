//! The graphics-state snapshot the interpreter passes with every drawing
//! operation.
//!
//! The output device never owns this state: it reads whatever the
//! interpreter currently holds and mirrors the parts it needs (patterns,
//! opacities, blend mode, clip) into its own render context.

use smallvec::smallvec;

use super::blend::BlendMode;
use super::color::{ColorSpace, GfxColor};
use super::function::FunctionRef;
use super::path::Path;
use crate::core::geometry::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt = 0,
    Round = 1,
    ProjectingSquare = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter = 0,
    Round = 1,
    Bevel = 2,
}

/// Winding rule for fills and clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

/// Stroke parameters, all in user space.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeProps {
    pub line_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    /// Alternating on/off lengths; empty means solid
    pub dash_array: Vec<f64>,
    pub dash_offset: f64,
}

impl Default for StrokeProps {
    fn default() -> Self {
        StrokeProps {
            line_width: 1.0,
            line_cap: LineCap::default(),
            line_join: LineJoin::default(),
            miter_limit: 10.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

/// Text rendering mode (`Tr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextRenderingMode {
    #[default]
    Fill = 0,
    Stroke = 1,
    FillStroke = 2,
    Invisible = 3,
    FillClip = 4,
    StrokeClip = 5,
    FillStrokeClip = 6,
    Clip = 7,
}

impl TextRenderingMode {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => TextRenderingMode::Stroke,
            2 => TextRenderingMode::FillStroke,
            3 => TextRenderingMode::Invisible,
            4 => TextRenderingMode::FillClip,
            5 => TextRenderingMode::StrokeClip,
            6 => TextRenderingMode::FillStrokeClip,
            7 => TextRenderingMode::Clip,
            _ => TextRenderingMode::Fill,
        }
    }

    pub fn fills(self) -> bool {
        (self as i32) & 1 == 0 && self != TextRenderingMode::Clip
    }

    pub fn strokes(self) -> bool {
        matches!((self as i32) & 3, 1 | 2)
    }

    pub fn clips(self) -> bool {
        (self as i32) & 4 != 0
    }
}

/// Identity of a font resource, typically its object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontId {
    pub num: u32,
    pub generation: u32,
}

impl FontId {
    pub const fn new(num: u32, generation: u32) -> Self {
        FontId { num, generation }
    }
}

/// Graphics state as seen by the output device.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    /// User space to page device space
    pub ctm: Matrix,

    pub fill_color_space: ColorSpace,
    pub fill_color: GfxColor,
    pub stroke_color_space: ColorSpace,
    pub stroke_color: GfxColor,

    pub fill_opacity: f64,
    pub stroke_opacity: f64,
    pub alpha_is_shape: bool,
    pub blend_mode: BlendMode,

    pub fill_overprint: bool,
    pub stroke_overprint: bool,
    pub overprint_mode: i32,

    /// Zero, one or four transfer functions
    pub transfer: Vec<FunctionRef>,

    pub stroke_props: StrokeProps,

    /// Path under construction, in user space
    pub path: Path,

    pub text_rendering_mode: TextRenderingMode,
    pub font: Option<FontId>,
    pub font_size: f64,
    /// Horizontal scaling as a fraction (1.0 = 100%)
    pub horizontal_scaling: f64,
    pub text_rise: f64,
    pub text_matrix: Matrix,

    /// Device resolution used for hairlines and cell rasterization
    pub hdpi: f64,
    pub vdpi: f64,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Matrix::identity(),
            fill_color_space: ColorSpace::DeviceGray,
            fill_color: smallvec![0.0],
            stroke_color_space: ColorSpace::DeviceGray,
            stroke_color: smallvec![0.0],
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
            alpha_is_shape: false,
            blend_mode: BlendMode::Normal,
            fill_overprint: false,
            stroke_overprint: false,
            overprint_mode: 0,
            transfer: Vec::new(),
            stroke_props: StrokeProps::default(),
            path: Path::new(),
            text_rendering_mode: TextRenderingMode::default(),
            font: None,
            font_size: 0.0,
            horizontal_scaling: 1.0,
            text_rise: 0.0,
            text_matrix: Matrix::identity(),
            hdpi: 72.0,
            vdpi: 72.0,
        }
    }
}

impl GraphicsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate a matrix onto the CTM (`cm`).
    pub fn concat_matrix(&mut self, m: &Matrix) {
        self.ctm.concat(m);
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        self.ctm.transform_point(x, y)
    }

    /// Text space to device space, without translation: the transform a
    /// glyph outline in unit em space goes through.
    pub fn font_transform(&self) -> Matrix {
        let text_space = Matrix([
            self.font_size * self.horizontal_scaling,
            0.0,
            0.0,
            self.font_size,
            0.0,
            self.text_rise,
        ]);
        let mut m = text_space.then(&self.text_matrix).then(&self.ctm);
        m.0[4] = 0.0;
        m.0[5] = 0.0;
        m
    }
}
