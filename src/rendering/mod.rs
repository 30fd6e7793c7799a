//! Rendering layer.
//!
//! Everything between the content-stream interpreter and a finished
//! pixel buffer:
//! - Canvases and color conversion
//! - Paint sources (solid colors, shadings, tiling cells)
//! - The compositor context and transparency groups
//! - Images and Type 3 glyph caching
//! - The [`OutputDevice`] trait and its software implementation

pub mod blend;
pub mod canvas;
pub mod color;
pub mod context;
pub mod device;
pub mod font;
pub mod function;
pub mod glyph_cache;
pub mod graphics_state;
pub mod image;
pub mod path;
pub mod pattern;
pub mod raster_device;
pub mod shading;
pub mod tiling;
pub mod transparency;

// Re-export key types
pub use blend::BlendMode;
pub use canvas::{Canvas, ColorMode, DeviceColor};
pub use color::{ColorPipeline, ColorSpace, GfxColor, OverprintMask, TransferTables};
pub use context::{RenderContext, SoftMask};
pub use device::{CellPainter, OutputDevice};
pub use font::{GlyphSource, OutlineFont, TrueTypeFont};
pub use function::{ExponentialFunction, FunctionRef, PdfFunction, SampledFunction, StitchingFunction};
pub use glyph_cache::GlyphCache;
pub use graphics_state::{
    FillRule, FontId, GraphicsState, LineCap, LineJoin, StrokeProps, TextRenderingMode,
};
pub use image::{ImageColorMap, ImageSource, StencilSource};
pub use path::{Path, PathElement};
pub use pattern::{Pattern, PatternRef};
pub use raster_device::{RasterDevice, RasterOptions};
pub use shading::{AxialShading, FunctionShading, GouraudShading, GouraudVertex, RadialShading, ShadingKind};
pub use tiling::{PaintType, TileRange, TilingParams};
pub use transparency::TransparencyEngine;
