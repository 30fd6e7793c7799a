//! Pixel buffers with an explicit color mode and optional alpha plane.
//!
//! Colors cross the `Canvas` API in logical component order (gray, RGB,
//! CMYK, or CMYK followed by spot channels); the storage order of BGR-style
//! modes is private to this module.

use crate::core::error::{RasterError, RasterResult};
use crate::core::geometry::PixelRect;
use crate::rendering::blend::div255;

/// Maximum number of color components a device color can carry.
pub const MAX_COLOR_COMPS: usize = 8;

/// Number of spot channels appended to process colors in `DeviceN8`.
pub const SPOT_COMPS: usize = 4;

/// Device color bytes in logical component order.
pub type DeviceColor = [u8; MAX_COLOR_COMPS];

/// Upper bound on canvas storage, independent of what the allocator allows.
const MAX_CANVAS_BYTES: usize = 1 << 31;

/// Pixel layout of a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// 1 bit per pixel, MSB first, 1 = white
    Mono1,
    /// 8-bit gray
    Mono8,
    /// 8-bit R, G, B
    Rgb8,
    /// 8-bit B, G, R
    Bgr8,
    /// 32-bit word per pixel, R, G, B then a pad byte in memory
    Xbgr8,
    /// 8-bit C, M, Y, K
    Cmyk8,
    /// 8-bit C, M, Y, K plus `SPOT_COMPS` spot channels
    DeviceN8,
}

impl ColorMode {
    /// Number of logical color components.
    pub fn components(self) -> usize {
        match self {
            ColorMode::Mono1 | ColorMode::Mono8 => 1,
            ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8 => 3,
            ColorMode::Cmyk8 => 4,
            ColorMode::DeviceN8 => 4 + SPOT_COMPS,
        }
    }

    /// Bytes used to store one pixel (zero for the bit-packed mode).
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorMode::Mono1 => 0,
            ColorMode::Mono8 => 1,
            ColorMode::Rgb8 | ColorMode::Bgr8 => 3,
            ColorMode::Xbgr8 | ColorMode::Cmyk8 => 4,
            ColorMode::DeviceN8 => 4 + SPOT_COMPS,
        }
    }

    /// Subtractive modes store ink amounts rather than light.
    pub fn is_subtractive(self) -> bool {
        matches!(self, ColorMode::Cmyk8 | ColorMode::DeviceN8)
    }

    pub fn is_mono(self) -> bool {
        matches!(self, ColorMode::Mono1 | ColorMode::Mono8)
    }

    /// The color every component takes on a blank, unpainted page.
    pub fn white(self) -> DeviceColor {
        let mut c = [0u8; MAX_COLOR_COMPS];
        if !self.is_subtractive() {
            c[..self.components()].fill(255);
        }
        c
    }
}

/// An owned pixel buffer plus color-mode and alpha metadata.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: usize,
    height: usize,
    mode: ColorMode,
    row_pad: usize,
    top_down: bool,
    row_size: usize,
    data: Vec<u8>,
    alpha: Option<Vec<u8>>,
    /// Spot colorant names, in the order they occupy spot channels
    separations: Vec<String>,
}

fn try_zeroed(len: usize, width: usize, height: usize) -> RasterResult<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| RasterError::CanvasAllocation { width, height })?;
    v.resize(len, 0);
    Ok(v)
}

impl Canvas {
    /// Allocate a canvas. Sizes that overflow or exceed the storage ceiling
    /// are reported instead of attempted.
    pub fn new(
        width: usize,
        height: usize,
        mode: ColorMode,
        row_pad: usize,
        top_down: bool,
        with_alpha: bool,
    ) -> RasterResult<Canvas> {
        let err = RasterError::CanvasAllocation { width, height };
        if width == 0 || height == 0 {
            return Err(err);
        }
        let row_pad = row_pad.max(1);
        let raw_row = match mode {
            ColorMode::Mono1 => width.div_ceil(8),
            _ => width.checked_mul(mode.bytes_per_pixel()).ok_or(err.clone())?,
        };
        let row_size = raw_row.div_ceil(row_pad).checked_mul(row_pad).ok_or(err.clone())?;
        let len = row_size
            .checked_mul(height)
            .filter(|&n| n <= MAX_CANVAS_BYTES)
            .ok_or(err.clone())?;
        let data = try_zeroed(len, width, height)?;
        let alpha = if with_alpha {
            let alen = width.checked_mul(height).ok_or(err)?;
            Some(try_zeroed(alen, width, height)?)
        } else {
            None
        };
        Ok(Canvas {
            width,
            height,
            mode,
            row_pad,
            top_down,
            row_size,
            data,
            alpha,
            separations: Vec::new(),
        })
    }

    /// A single-channel 8-bit canvas, as used for masks and glyph bitmaps.
    pub fn mono8(width: usize, height: usize) -> RasterResult<Canvas> {
        Canvas::new(width, height, ColorMode::Mono8, 1, true, false)
    }

    /// A 1x1 canvas with the same layout, used where a canvas must exist
    /// but its contents no longer matter.
    pub fn placeholder(&self) -> Canvas {
        let alpha = self.alpha.as_ref().map(|_| vec![0u8]);
        let row_size = self.mode.bytes_per_pixel().max(1).div_ceil(self.row_pad) * self.row_pad;
        Canvas {
            width: 1,
            height: 1,
            mode: self.mode,
            row_pad: self.row_pad,
            top_down: self.top_down,
            row_size,
            data: vec![0u8; row_size],
            alpha,
            separations: self.separations.clone(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn row_pad(&self) -> usize {
        self.row_pad
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn is_top_down(&self) -> bool {
        self.top_down
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::from_size(self.width, self.height)
    }

    /// Raw storage rows, in storage order.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn alpha_plane(&self) -> Option<&[u8]> {
        self.alpha.as_deref()
    }

    pub fn alpha_plane_mut(&mut self) -> Option<&mut [u8]> {
        self.alpha.as_deref_mut()
    }

    /// Drop the alpha plane, keeping only color.
    pub fn discard_alpha(&mut self) {
        self.alpha = None;
    }

    pub fn separations(&self) -> &[String] {
        &self.separations
    }

    pub fn set_separations(&mut self, names: Vec<String>) {
        self.separations = names;
    }

    fn storage_row(&self, y: usize) -> usize {
        if self.top_down { y } else { self.height - 1 - y }
    }

    #[inline]
    fn offset(&self, x: usize, y: usize) -> usize {
        self.storage_row(y) * self.row_size + x * self.mode.bytes_per_pixel()
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Pixel color in logical order; out-of-range coordinates read as zero.
    pub fn pixel(&self, x: i32, y: i32) -> DeviceColor {
        let mut c = [0u8; MAX_COLOR_COMPS];
        if !self.contains(x, y) {
            return c;
        }
        let (x, y) = (x as usize, y as usize);
        match self.mode {
            ColorMode::Mono1 => {
                let byte = self.data[self.storage_row(y) * self.row_size + (x >> 3)];
                c[0] = if byte & (0x80 >> (x & 7)) != 0 { 255 } else { 0 };
            }
            ColorMode::Bgr8 => {
                let o = self.offset(x, y);
                c[0] = self.data[o + 2];
                c[1] = self.data[o + 1];
                c[2] = self.data[o];
            }
            mode => {
                let o = self.offset(x, y);
                let n = mode.components();
                c[..n].copy_from_slice(&self.data[o..o + n]);
            }
        }
        c
    }

    /// Store a pixel given in logical order. Mono1 thresholds at half gray.
    pub fn set_pixel(&mut self, x: i32, y: i32, c: &DeviceColor) {
        if !self.contains(x, y) {
            return;
        }
        let (x, y) = (x as usize, y as usize);
        match self.mode {
            ColorMode::Mono1 => {
                let idx = self.storage_row(y) * self.row_size + (x >> 3);
                let bit = 0x80u8 >> (x & 7);
                if c[0] >= 0x80 {
                    self.data[idx] |= bit;
                } else {
                    self.data[idx] &= !bit;
                }
            }
            ColorMode::Bgr8 => {
                let o = self.offset(x, y);
                self.data[o] = c[2];
                self.data[o + 1] = c[1];
                self.data[o + 2] = c[0];
            }
            ColorMode::Xbgr8 => {
                let o = self.offset(x, y);
                self.data[o..o + 3].copy_from_slice(&c[..3]);
                self.data[o + 3] = 255;
            }
            mode => {
                let o = self.offset(x, y);
                let n = mode.components();
                self.data[o..o + n].copy_from_slice(&c[..n]);
            }
        }
    }

    /// Alpha at a pixel; canvases without an alpha plane are opaque.
    #[inline]
    pub fn alpha(&self, x: i32, y: i32) -> u8 {
        if !self.contains(x, y) {
            return 0;
        }
        match &self.alpha {
            Some(a) => a[y as usize * self.width + x as usize],
            None => 255,
        }
    }

    #[inline]
    pub fn set_alpha(&mut self, x: i32, y: i32, value: u8) {
        if !self.contains(x, y) {
            return;
        }
        let w = self.width;
        if let Some(a) = &mut self.alpha {
            a[y as usize * w + x as usize] = value;
        }
    }

    /// Fill every pixel with one color and alpha value.
    pub fn clear(&mut self, color: &DeviceColor, alpha: u8) {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                self.set_pixel(x, y, color);
            }
        }
        if let Some(a) = &mut self.alpha {
            a.fill(alpha);
        }
    }

    /// Copy a `w`x`h` region of `src` at `(src_x, src_y)` into this canvas
    /// at the origin, color and alpha both. Both canvases must share a
    /// color mode; pixels outside `src` read as transparent.
    pub fn copy_region_from(&mut self, src: &Canvas, src_x: i32, src_y: i32) {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let c = src.pixel(src_x + x, src_y + y);
                self.set_pixel(x, y, &c);
                self.set_alpha(x, y, src.alpha(src_x + x, src_y + y));
            }
        }
    }

    /// Composite the alpha plane over a solid background and mark every
    /// pixel opaque.
    pub fn composite_background(&mut self, background: &DeviceColor) {
        let Some(_) = self.alpha else {
            return;
        };
        let n = self.mode.components();
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let a = self.alpha(x, y) as u32;
                let mut c = self.pixel(x, y);
                if a == 0 {
                    c = *background;
                } else if a < 255 {
                    for i in 0..n {
                        c[i] = div255((255 - a) * background[i] as u32 + a * c[i] as u32);
                    }
                }
                self.set_pixel(x, y, &c);
                self.set_alpha(x, y, 255);
            }
        }
    }
}
