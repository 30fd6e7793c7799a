pub mod error;
pub mod geometry;

pub use error::{RasterError, RasterResult};
pub use geometry::{Matrix, PixelRect, Rect};
