//! # PDF-X Raster: software compositing for PDF page content
//!
//! This crate is the layer between a content-stream interpreter and a
//! finished pixel buffer. The interpreter walks the page and calls an
//! [`OutputDevice`](rendering::OutputDevice) once per operator class;
//! [`RasterDevice`](rendering::RasterDevice) turns those calls into pixels.
//!
//! ## Features
//!
//! - **Color**: gray, RGB, CMYK and DeviceN output with spot channels,
//!   reverse video, transfer functions and overprint preview
//! - **Transparency**: isolated, non-isolated and knockout groups, all
//!   sixteen blend modes, luminosity and alpha soft masks
//! - **Shadings**: function-based, axial, radial and Gouraud fills
//! - **Tiling patterns**: one cell rendered offscreen, replicated natively
//! - **Type 3 fonts**: rendered glyphs cached per font and scale
//!
//! ## Quick Start
//!
//! ```rust
//! use pdf_x_raster::rendering::{ColorSpace, GraphicsState, OutputDevice, RasterDevice, RasterOptions};
//!
//! let mut device = RasterDevice::new(RasterOptions::default())?;
//! device.start_page(100.0, 100.0)?;
//!
//! let mut state = GraphicsState::default();
//! state.fill_color_space = ColorSpace::DeviceRgb;
//! state.fill_color = smallvec::smallvec![1.0, 0.0, 0.0];
//! state.path.rect(10.0, 10.0, 50.0, 50.0);
//! device.update_all(&state);
//! device.fill(&state);
//! device.end_page();
//!
//! let page = device.take_canvas();
//! assert_eq!(page.pixel(20, 20)[..3], [255, 0, 0]);
//! # Ok::<(), pdf_x_raster::core::RasterError>(())
//! ```
//!
//! ## Architecture
//!
//! Exactly one canvas is drawn on at a time. Transparency groups, Type 3
//! glyphs and tiling cells push a fresh canvas and context and keep the
//! parent in an explicit frame until the nested render is composited back.
//! Coordinates crossing the compositor API are always page device pixels.

pub mod core;
pub mod rendering;

// Re-export main types for convenience
pub use core::{Matrix, RasterError, RasterResult, Rect};
pub use rendering::{Canvas, ColorMode, OutputDevice, RasterDevice, RasterOptions};
