//! Image decoding: sample unpacking, decode arrays, lookup tables and
//! the alpha sources (color keys, stencils, soft masks, mattes).
//!
//! Everything here produces a device-mode [`Canvas`] the render context
//! can stretch over the image's unit square.

use log::warn;

use super::blend::div255;
use super::canvas::{Canvas, ColorMode, DeviceColor, MAX_COLOR_COMPS};
use super::color::{ColorPipeline, ColorSpace, GfxColor};
use super::context::{RenderContext, SoftMask};
use crate::core::error::{RasterError, RasterResult};
use crate::core::geometry::Matrix;

/// Unpacks rows of 1, 2, 4, 8 or 16 bit samples into one byte per
/// component. Sixteen bit samples keep their high byte.
pub struct ImageStream<'a> {
    data: &'a [u8],
    width: usize,
    ncomps: usize,
    bits: u8,
    row_bytes: usize,
    row: usize,
    line: Vec<u8>,
}

impl<'a> ImageStream<'a> {
    pub fn new(data: &'a [u8], width: usize, ncomps: usize, bits: u8) -> RasterResult<Self> {
        if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
            return Err(RasterError::InvalidGeometry(format!("{} bits per component", bits)));
        }
        let samples = width
            .checked_mul(ncomps)
            .ok_or_else(|| RasterError::InvalidGeometry("image row overflow".into()))?;
        let row_bytes = samples
            .checked_mul(bits as usize)
            .map(|b| b.div_ceil(8))
            .ok_or_else(|| RasterError::InvalidGeometry("image row overflow".into()))?;
        Ok(ImageStream {
            data,
            width,
            ncomps,
            bits,
            row_bytes,
            row: 0,
            line: vec![0; samples],
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The next row of samples. Rows past the end of the data read as
    /// zero, like a truncated stream.
    pub fn next_line(&mut self) -> &[u8] {
        let start = self.row.saturating_mul(self.row_bytes);
        self.row += 1;
        let avail = self.data.get(start..).unwrap_or(&[]);
        let input = &avail[..avail.len().min(self.row_bytes)];
        let byte = |i: usize| input.get(i).copied().unwrap_or(0);
        match self.bits {
            8 => {
                self.line.fill(0);
                self.line[..input.len()].copy_from_slice(input);
            }
            16 => {
                for (i, s) in self.line.iter_mut().enumerate() {
                    *s = byte(2 * i);
                }
            }
            bits => {
                let per_byte = 8 / bits as usize;
                let mask = (1u8 << bits) - 1;
                for (i, s) in self.line.iter_mut().enumerate() {
                    let b = byte(i / per_byte);
                    let shift = 8 - bits as usize * (i % per_byte + 1);
                    *s = (b >> shift) & mask;
                }
            }
        }
        &self.line
    }

    pub fn components(&self) -> usize {
        self.ncomps
    }
}

/// Maps raw samples through a decode array into color-space values.
#[derive(Debug, Clone)]
pub struct ImageColorMap {
    space: ColorSpace,
    bits: u8,
    /// Per component: decoded value of every possible sample
    values: Vec<Vec<f64>>,
}

impl ImageColorMap {
    /// Build a map; `decode` holds a `[min max]` pair per component and
    /// defaults to the space's own ranges.
    pub fn new(bits: u8, decode: Option<&[f64]>, space: ColorSpace) -> RasterResult<Self> {
        let ncomps = space.components();
        if let Some(d) = decode {
            if d.len() < 2 * ncomps {
                return Err(RasterError::InvalidGeometry(format!(
                    "decode array has {} entries for {} components",
                    d.len(),
                    ncomps
                )));
            }
        }
        let sample_bits = bits.min(8);
        let max = ((1u32 << sample_bits) - 1) as f64;
        let values = (0..ncomps)
            .map(|i| {
                let (lo, hi) = match decode {
                    Some(d) => (d[2 * i], d[2 * i + 1]),
                    None => space.default_decode(i, sample_bits),
                };
                (0..=max as u32).map(|s| lo + s as f64 * (hi - lo) / max).collect()
            })
            .collect();
        Ok(ImageColorMap { space, bits, values })
    }

    pub fn color_space(&self) -> &ColorSpace {
        &self.space
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn components(&self) -> usize {
        self.values.len()
    }

    /// Color-space values of one pixel's raw samples.
    pub fn color(&self, samples: &[u8]) -> GfxColor {
        self.values
            .iter()
            .zip(samples)
            .map(|(v, &s)| v.get(s as usize).copied().unwrap_or(0.0))
            .collect()
    }

    pub fn gray(&self, samples: &[u8]) -> f64 {
        self.space.to_gray(&self.color(samples))
    }
}

/// Device colors of every raw sample value of a one-component image.
#[derive(Debug, Clone)]
pub struct ColorLookupTable {
    entries: Vec<DeviceColor>,
    /// An indexed palette that never marks cyan, magenta or yellow
    gray_indexed: bool,
}

impl ColorLookupTable {
    /// `None` unless the map has exactly one component.
    pub fn build(map: &ImageColorMap, pipeline: &ColorPipeline) -> Option<Self> {
        if map.components() != 1 {
            return None;
        }
        let n = 1usize << map.bits().min(8);
        let subtractive = pipeline.mode().is_subtractive();
        let mut gray_indexed = subtractive && !matches!(map.color_space(), ColorSpace::DeviceGray);
        let mut entries = Vec::with_capacity(n);
        for i in 0..n {
            let color = map.color(&[i as u8]);
            if gray_indexed {
                let cmyk = map.color_space().to_cmyk(&color);
                if cmyk[0] != 0.0 || cmyk[1] != 0.0 || cmyk[2] != 0.0 {
                    gray_indexed = false;
                }
            }
            entries.push(pipeline.convert(map.color_space(), &color));
        }
        Some(ColorLookupTable { entries, gray_indexed })
    }

    #[inline]
    pub fn get(&self, sample: u8) -> DeviceColor {
        self.entries.get(sample as usize).copied().unwrap_or_default()
    }

    pub fn is_gray_indexed(&self) -> bool {
        self.gray_indexed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A sampled image as handed over by the interpreter.
#[derive(Debug, Clone, Copy)]
pub struct ImageSource<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub color_map: &'a ImageColorMap,
}

/// A one-bit stencil. With `invert` unset, a zero sample paints.
#[derive(Debug, Clone, Copy)]
pub struct StencilSource<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub invert: bool,
}

/// Canvases hold at least eight bits per component.
pub fn source_mode(mode: ColorMode) -> ColorMode {
    match mode {
        ColorMode::Mono1 => ColorMode::Mono8,
        m => m,
    }
}

/// Decodes images into device canvases for one color pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ImagePipeline<'p> {
    pipeline: &'p ColorPipeline,
}

impl<'p> ImagePipeline<'p> {
    pub fn new(pipeline: &'p ColorPipeline) -> Self {
        ImagePipeline { pipeline }
    }

    fn canvas(&self, width: usize, height: usize, with_alpha: bool) -> RasterResult<Canvas> {
        let mut c = Canvas::new(width, height, source_mode(self.pipeline.mode()), 1, true, with_alpha)?;
        c.set_separations(self.pipeline.separations().to_vec());
        Ok(c)
    }

    /// The lookup table for a one-component image under this pipeline.
    pub fn lookup_table(&self, map: &ImageColorMap) -> Option<ColorLookupTable> {
        ColorLookupTable::build(map, self.pipeline)
    }

    /// Decode the color samples through `lut` when the image has one.
    /// `color_key` holds a `[min max]` pair of raw sample values per
    /// component; pixels inside every range become transparent.
    pub fn decode(
        &self,
        src: &ImageSource<'_>,
        lut: Option<&ColorLookupTable>,
        color_key: Option<&[i32]>,
    ) -> RasterResult<Canvas> {
        let map = src.color_map;
        let ncomps = map.components();
        let mut out = self.canvas(src.width, src.height, color_key.is_some())?;
        let mut stream = ImageStream::new(src.data, src.width, ncomps, map.bits())?;
        // Sixteen bit keys are compared against the high byte kept per sample.
        let key_shift = if map.bits() == 16 { 8 } else { 0 };
        for y in 0..src.height as i32 {
            let line = stream.next_line();
            for (x, px) in line.chunks_exact(ncomps.max(1)).enumerate() {
                let x = x as i32;
                let c = match lut {
                    Some(t) => t.get(px[0]),
                    None => self.pipeline.convert(map.color_space(), &map.color(px)),
                };
                out.set_pixel(x, y, &c);
                if let Some(key) = color_key {
                    let outside = px.iter().enumerate().any(|(i, &s)| {
                        let lo = key.get(2 * i).map_or(0, |v| v >> key_shift);
                        let hi = key.get(2 * i + 1).map_or(255, |v| v >> key_shift);
                        (s as i32) < lo || s as i32 > hi
                    });
                    out.set_alpha(x, y, if outside { 255 } else { 0 });
                }
            }
        }
        Ok(out)
    }

    /// Decode an image whose stencil mask is no larger than the image,
    /// scaling the mask to the image grid.
    pub fn decode_masked(
        &self,
        src: &ImageSource<'_>,
        lut: Option<&ColorLookupTable>,
        mask: &StencilSource<'_>,
    ) -> RasterResult<Canvas> {
        let out = self.decode(src, lut, None)?;
        let stencil = stencil_bits(mask)?;
        let mut with_alpha = self.canvas(src.width, src.height, true)?;
        for y in 0..src.height {
            let my = (y * mask.height / src.height) as i32;
            for x in 0..src.width {
                let mx = (x * mask.width / src.width) as i32;
                let (xi, yi) = (x as i32, y as i32);
                with_alpha.set_pixel(xi, yi, &out.pixel(xi, yi));
                with_alpha.set_alpha(xi, yi, stencil.pixel(mx, my)[0]);
            }
        }
        Ok(with_alpha)
    }

    /// The soft-mask channel of an image, one gray byte per sample.
    pub fn soft_mask(&self, src: &ImageSource<'_>) -> RasterResult<Canvas> {
        let map = src.color_map;
        let gray_pipeline = ColorPipeline::new(ColorMode::Mono8, false, false);
        let lut = ColorLookupTable::build(map, &gray_pipeline);
        let ncomps = map.components();
        let mut out = Canvas::mono8(src.width, src.height)?;
        let mut stream = ImageStream::new(src.data, src.width, ncomps, map.bits())?;
        let mut c = [0u8; MAX_COLOR_COMPS];
        for y in 0..src.height as i32 {
            let line = stream.next_line();
            for (x, px) in line.chunks_exact(ncomps.max(1)).enumerate() {
                c[0] = match &lut {
                    Some(t) => t.get(px[0])[0],
                    None => super::color::col_to_byte(map.gray(px)),
                };
                out.set_pixel(x as i32, y, &c);
            }
        }
        Ok(out)
    }

    /// Device bytes of a matte color given in the image's space.
    pub fn matte_color(&self, space: &ColorSpace, matte: &[f64]) -> DeviceColor {
        self.pipeline.convert(space, matte)
    }
}

/// Expand a stencil into a Mono8 canvas, 255 where it paints.
pub fn stencil_bits(src: &StencilSource<'_>) -> RasterResult<Canvas> {
    let mut out = Canvas::mono8(src.width, src.height)?;
    let mut stream = ImageStream::new(src.data, src.width, 1, 1)?;
    let mut c = [0u8; MAX_COLOR_COMPS];
    for y in 0..src.height as i32 {
        let line = stream.next_line();
        for (x, &bit) in line.iter().enumerate() {
            c[0] = if (bit == 0) != src.invert { 255 } else { 0 };
            out.set_pixel(x as i32, y, &c);
        }
    }
    Ok(out)
}

/// Reverse premultiplication against a matte color, using the soft-mask
/// value of each pixel. The two canvases must have the same size.
pub fn undo_matte(image: &mut Canvas, mask: &Canvas, matte: &DeviceColor) {
    if image.width() != mask.width() || image.height() != mask.height() {
        warn!(
            "matte mask {}x{} does not match image {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        );
        return;
    }
    let comps = match image.mode() {
        ColorMode::Xbgr8 => 3,
        m => m.components(),
    };
    for y in 0..image.height() as i32 {
        for x in 0..image.width() as i32 {
            let a = mask.pixel(x, y)[0] as i32;
            let mut c = image.pixel(x, y);
            for i in 0..comps {
                let m = matte[i] as i32;
                c[i] = if a == 0 {
                    matte[i]
                } else {
                    (m + (c[i] as i32 - m) * 255 / a).clamp(0, 255) as u8
                };
            }
            image.set_pixel(x, y, &c);
        }
    }
}

/// Stretch a Mono8 mask image over the unit square of `mat` and return it
/// as a page soft mask, combined with whatever mask is already active.
pub fn soft_mask_from_image(ctx: &RenderContext, mask: &Canvas, mat: &Matrix) -> Option<SoftMask> {
    let place = ctx.place_image(mat, mask.width(), mask.height())?;
    let region = place.region();
    let mut out = Canvas::mono8(region.width(), region.height()).ok()?;
    let existing = ctx.state().soft_mask.as_ref();
    let mut c = [0u8; MAX_COLOR_COMPS];
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            let cov = place.coverage(x, y) as u32;
            if cov == 0 {
                continue;
            }
            let (col, row) = place.texel(x, y);
            let mut v = div255(cov * mask.pixel(col, row)[0] as u32);
            if let Some(sm) = existing {
                v = div255(v as u32 * sm.value(x, y) as u32);
            }
            c[0] = v;
            out.set_pixel(x - region.x0, y - region.y0, &c);
        }
    }
    Some(SoftMask::new(out, region.x0, region.y0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::function::ExponentialFunction;
    use std::rc::Rc;

    fn gray_map(bits: u8) -> ImageColorMap {
        ImageColorMap::new(bits, None, ColorSpace::DeviceGray).unwrap()
    }

    #[test]
    fn test_unpack_bit_depths() {
        let mut s = ImageStream::new(&[0b1011_0000], 4, 1, 1).unwrap();
        assert_eq!(s.next_line(), &[1, 0, 1, 1]);
        let mut s = ImageStream::new(&[0b1110_0100], 4, 1, 2).unwrap();
        assert_eq!(s.next_line(), &[3, 2, 1, 0]);
        let mut s = ImageStream::new(&[0xab, 0xcd], 2, 1, 4).unwrap();
        assert_eq!(s.next_line(), &[0xa, 0xb]);
        let mut s = ImageStream::new(&[0x12, 0x34, 0x56, 0x78], 2, 1, 16).unwrap();
        assert_eq!(s.next_line(), &[0x12, 0x56]);
    }

    #[test]
    fn test_short_data_reads_zero() {
        let mut s = ImageStream::new(&[9, 9, 9], 2, 1, 8).unwrap();
        assert_eq!(s.next_line(), &[9, 9]);
        assert_eq!(s.next_line(), &[9, 0]);
        assert_eq!(s.next_line(), &[0, 0]);
    }

    #[test]
    fn test_rejects_odd_depth() {
        assert!(ImageStream::new(&[], 1, 1, 3).is_err());
    }

    #[test]
    fn test_decode_array_inverts() {
        let map = ImageColorMap::new(1, Some(&[1.0, 0.0]), ColorSpace::DeviceGray).unwrap();
        assert_eq!(map.color(&[0])[0], 1.0);
        assert_eq!(map.color(&[1])[0], 0.0);
        assert!(ImageColorMap::new(8, Some(&[0.0]), ColorSpace::DeviceGray).is_err());
    }

    #[test]
    fn test_indexed_default_decode_is_identity() {
        let space = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceRgb),
            hival: 1,
            lookup: vec![255, 0, 0, 0, 0, 255],
        };
        let map = ImageColorMap::new(8, None, space).unwrap();
        assert_eq!(map.color(&[1])[0], 1.0);
        let pipeline = ColorPipeline::new(ColorMode::Rgb8, false, false);
        let lut = ColorLookupTable::build(&map, &pipeline).unwrap();
        assert_eq!(lut.len(), 256);
        assert_eq!(&lut.get(0)[..3], &[255, 0, 0]);
        assert_eq!(&lut.get(1)[..3], &[0, 0, 255]);
    }

    #[test]
    fn test_lookup_only_for_single_component() {
        let map = ImageColorMap::new(8, None, ColorSpace::DeviceRgb).unwrap();
        let pipeline = ColorPipeline::new(ColorMode::Rgb8, false, false);
        assert!(ColorLookupTable::build(&map, &pipeline).is_none());
    }

    #[test]
    fn test_gray_indexed_detection() {
        let gray_palette = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceGray),
            hival: 1,
            lookup: vec![0, 255],
        };
        let pipeline = ColorPipeline::new(ColorMode::Cmyk8, false, false);
        let images = ImagePipeline::new(&pipeline);
        let gray_indexed = |map: &ImageColorMap| images.lookup_table(map).is_some_and(|t| t.is_gray_indexed());
        assert!(gray_indexed(&ImageColorMap::new(1, None, gray_palette).unwrap()));
        assert!(!gray_indexed(&gray_map(8)));
        let tinted = ColorSpace::Separation {
            name: "Spot".into(),
            alt: Box::new(ColorSpace::DeviceCmyk),
            tint: Rc::new(ExponentialFunction::new(vec![0.0; 4], vec![1.0, 0.0, 0.0, 0.0], 1.0)),
        };
        assert!(!gray_indexed(&ImageColorMap::new(8, None, tinted).unwrap()));
    }

    #[test]
    fn test_color_key_alpha() {
        let map = gray_map(8);
        let pipeline = ColorPipeline::new(ColorMode::Mono8, false, false);
        let src = ImageSource {
            data: &[10, 50, 200],
            width: 3,
            height: 1,
            color_map: &map,
        };
        let images = ImagePipeline::new(&pipeline);
        let lut = images.lookup_table(&map);
        let img = images.decode(&src, lut.as_ref(), Some(&[40, 60])).unwrap();
        assert_eq!(img.alpha(0, 0), 255);
        assert_eq!(img.alpha(1, 0), 0);
        assert_eq!(img.alpha(2, 0), 255);
        assert_eq!(img.pixel(2, 0)[0], 200);
    }

    #[test]
    fn test_sixteen_bit_color_key() {
        let map = gray_map(16);
        let pipeline = ColorPipeline::new(ColorMode::Mono8, false, false);
        let src = ImageSource {
            data: &[0x10, 0x00, 0x80, 0x40, 0xf0, 0xff],
            width: 3,
            height: 1,
            color_map: &map,
        };
        let img = ImagePipeline::new(&pipeline)
            .decode(&src, None, Some(&[0x7000, 0x90ff]))
            .unwrap();
        assert_eq!(img.alpha(0, 0), 255);
        assert_eq!(img.alpha(1, 0), 0);
        assert_eq!(img.alpha(2, 0), 255);
    }

    #[test]
    fn test_mono1_decodes_to_mono8() {
        let pipeline = ColorPipeline::new(ColorMode::Mono1, false, false);
        let map = gray_map(8);
        let src = ImageSource {
            data: &[77],
            width: 1,
            height: 1,
            color_map: &map,
        };
        let img = ImagePipeline::new(&pipeline).decode(&src, None, None).unwrap();
        assert_eq!(img.mode(), ColorMode::Mono8);
        assert_eq!(img.pixel(0, 0)[0], 77);
    }

    #[test]
    fn test_stencil_polarity() {
        let set = StencilSource {
            data: &[0xff],
            width: 8,
            height: 1,
            invert: false,
        };
        let bits = stencil_bits(&set).unwrap();
        assert!(bits.data().iter().all(|&b| b == 0));
        let inverted = stencil_bits(&StencilSource { invert: true, ..set }).unwrap();
        assert!(inverted.data().iter().all(|&b| b == 255));
    }

    #[test]
    fn test_masked_image_scales_mask() {
        let map = gray_map(8);
        let pipeline = ColorPipeline::new(ColorMode::Mono8, false, false);
        let src = ImageSource {
            data: &[1, 2, 3, 4],
            width: 4,
            height: 1,
            color_map: &map,
        };
        let mask = StencilSource {
            data: &[0b0100_0000],
            width: 2,
            height: 1,
            invert: false,
        };
        let img = ImagePipeline::new(&pipeline).decode_masked(&src, None, &mask).unwrap();
        let alphas: Vec<u8> = (0..4).map(|x| img.alpha(x, 0)).collect();
        assert_eq!(alphas, vec![255, 255, 0, 0]);
        assert_eq!(img.pixel(3, 0)[0], 4);
    }

    #[test]
    fn test_undo_matte() {
        let mut img = Canvas::mono8(3, 1).unwrap();
        img.set_pixel(0, 0, &[100; MAX_COLOR_COMPS]);
        img.set_pixel(1, 0, &[100; MAX_COLOR_COMPS]);
        let mut mask = Canvas::mono8(3, 1).unwrap();
        mask.set_pixel(0, 0, &[255; MAX_COLOR_COMPS]);
        mask.set_pixel(1, 0, &[128; MAX_COLOR_COMPS]);
        let matte = [200u8; MAX_COLOR_COMPS];
        undo_matte(&mut img, &mask, &matte);
        assert_eq!(img.pixel(0, 0)[0], 100);
        // 200 + (100 - 200) * 255 / 128 = 0.8, truncated toward zero
        assert_eq!(img.pixel(1, 0)[0], 1);
        assert_eq!(img.pixel(2, 0)[0], 200);
    }

    #[test]
    fn test_soft_mask_channel() {
        let map = ImageColorMap::new(8, Some(&[1.0, 0.0]), ColorSpace::DeviceGray).unwrap();
        let pipeline = ColorPipeline::new(ColorMode::Rgb8, false, false);
        let src = ImageSource {
            data: &[0, 255],
            width: 2,
            height: 1,
            color_map: &map,
        };
        let sm = ImagePipeline::new(&pipeline).soft_mask(&src).unwrap();
        assert_eq!(sm.pixel(0, 0)[0], 255);
        assert_eq!(sm.pixel(1, 0)[0], 0);
    }
}
