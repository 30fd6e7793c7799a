//! Color spaces and the conversion of color samples to device bytes.
//!
//! `ColorPipeline` turns a `(ColorSpace, GfxColor)` pair into the bytes of
//! the active color mode, complements gray and RGB for reverse video, and
//! derives overprint component masks. Spot colorants are assigned to
//! DeviceN8 spot channels on first use.

use smallvec::{SmallVec, smallvec};

use super::canvas::{ColorMode, DeviceColor, MAX_COLOR_COMPS, SPOT_COMPS};
use super::function::FunctionRef;

/// A color sample in its own space, components nominally in `[0, 1]`.
pub type GfxColor = SmallVec<[f64; MAX_COLOR_COMPS]>;

/// Convert a `[0, 1]` component to a byte, rounding to nearest.
#[inline]
pub fn col_to_byte(x: f64) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

#[inline]
pub fn byte_to_col(b: u8) -> f64 {
    b as f64 / 255.0
}

/// Process colorant names recognized in Separation and DeviceN spaces.
const PROCESS_NAMES: [&str; 4] = ["Cyan", "Magenta", "Yellow", "Black"];

fn process_index(name: &str) -> Option<usize> {
    PROCESS_NAMES.iter().position(|&n| n == name)
}

/// The color spaces this layer renders directly. Calibrated and ICC
/// spaces reach it already mapped to their device alternates.
#[derive(Debug, Clone)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRgb,
    DeviceCmyk,
    Separation {
        name: String,
        alt: Box<ColorSpace>,
        tint: FunctionRef,
    },
    DeviceN {
        names: Vec<String>,
        alt: Box<ColorSpace>,
        tint: FunctionRef,
    },
    Indexed {
        base: Box<ColorSpace>,
        hival: usize,
        /// `(hival + 1) * base.components()` bytes
        lookup: Vec<u8>,
    },
}

impl ColorSpace {
    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray => 1,
            ColorSpace::DeviceRgb => 3,
            ColorSpace::DeviceCmyk => 4,
            ColorSpace::Separation { .. } => 1,
            ColorSpace::DeviceN { names, .. } => names.len(),
            ColorSpace::Indexed { .. } => 1,
        }
    }

    /// Initial color of the space (black for device spaces, full tint for
    /// separations, index 0 for indexed).
    pub fn default_color(&self) -> GfxColor {
        match self {
            ColorSpace::DeviceGray | ColorSpace::Indexed { .. } => smallvec![0.0],
            ColorSpace::DeviceRgb => smallvec![0.0, 0.0, 0.0],
            ColorSpace::DeviceCmyk => smallvec![0.0, 0.0, 0.0, 1.0],
            ColorSpace::Separation { .. } => smallvec![1.0],
            ColorSpace::DeviceN { names, .. } => names.iter().map(|_| 1.0).collect(),
        }
    }

    /// Painting in this space leaves every page component untouched.
    pub fn is_non_marking(&self) -> bool {
        match self {
            ColorSpace::Separation { name, .. } => name == "None",
            ColorSpace::DeviceN { names, .. } => !names.is_empty() && names.iter().all(|n| n == "None"),
            _ => false,
        }
    }

    /// Decode range of component `i` for an image with `bits` per component.
    pub fn default_decode(&self, _i: usize, bits: u8) -> (f64, f64) {
        match self {
            ColorSpace::Indexed { .. } => (0.0, ((1u32 << bits) - 1) as f64),
            _ => (0.0, 1.0),
        }
    }

    fn alternate_color(&self, color: &[f64]) -> Option<(&ColorSpace, GfxColor)> {
        match self {
            ColorSpace::Separation { alt, tint, .. } | ColorSpace::DeviceN { alt, tint, .. } => {
                let mut out: GfxColor = smallvec![0.0; tint.output_size().max(alt.components())];
                tint.transform(color, &mut out);
                Some((alt.as_ref(), out))
            }
            ColorSpace::Indexed { base, hival, lookup } => {
                let n = base.components();
                let idx = (color.first().copied().unwrap_or(0.0) + 0.5).floor().clamp(0.0, *hival as f64) as usize;
                let out = (0..n)
                    .map(|i| lookup.get(idx * n + i).copied().map(byte_to_col).unwrap_or(0.0))
                    .collect();
                Some((base.as_ref(), out))
            }
            _ => None,
        }
    }

    pub fn to_gray(&self, color: &[f64]) -> f64 {
        let c = |i: usize| color.get(i).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        match self {
            ColorSpace::DeviceGray => c(0),
            ColorSpace::DeviceRgb => 0.299 * c(0) + 0.587 * c(1) + 0.114 * c(2),
            ColorSpace::DeviceCmyk => 1.0 - (0.3 * c(0) + 0.59 * c(1) + 0.11 * c(2) + c(3)).min(1.0),
            _ => match self.alternate_color(color) {
                Some((alt, out)) => alt.to_gray(&out),
                None => 0.0,
            },
        }
    }

    pub fn to_rgb(&self, color: &[f64]) -> [f64; 3] {
        let c = |i: usize| color.get(i).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        match self {
            ColorSpace::DeviceGray => [c(0); 3],
            ColorSpace::DeviceRgb => [c(0), c(1), c(2)],
            ColorSpace::DeviceCmyk => {
                let k = c(3);
                [
                    1.0 - (c(0) + k).min(1.0),
                    1.0 - (c(1) + k).min(1.0),
                    1.0 - (c(2) + k).min(1.0),
                ]
            }
            _ => match self.alternate_color(color) {
                Some((alt, out)) => alt.to_rgb(&out),
                None => [0.0; 3],
            },
        }
    }

    pub fn to_cmyk(&self, color: &[f64]) -> [f64; 4] {
        let c = |i: usize| color.get(i).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        match self {
            ColorSpace::DeviceGray => [0.0, 0.0, 0.0, 1.0 - c(0)],
            ColorSpace::DeviceRgb => {
                let (cc, m, y) = (1.0 - c(0), 1.0 - c(1), 1.0 - c(2));
                let k = cc.min(m).min(y);
                [cc - k, m - k, y - k, k]
            }
            ColorSpace::DeviceCmyk => [c(0), c(1), c(2), c(3)],
            _ => match self.alternate_color(color) {
                Some((alt, out)) => alt.to_cmyk(&out),
                None => [0.0, 0.0, 0.0, 1.0],
            },
        }
    }
}

/// Which device components an operation may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverprintMask {
    /// Bit `i` set means component `i` is composited
    pub mask: u32,
    /// Spot components add to the destination instead of replacing it
    pub additive: bool,
}

impl Default for OverprintMask {
    fn default() -> Self {
        OverprintMask::ALL
    }
}

impl OverprintMask {
    pub const ALL: OverprintMask = OverprintMask {
        mask: 0xffff_ffff,
        additive: false,
    };

    #[inline]
    pub fn includes(&self, component: usize) -> bool {
        self.mask & (1 << component) != 0
    }
}

/// Converts color samples into device bytes for one color mode.
#[derive(Debug, Clone)]
pub struct ColorPipeline {
    mode: ColorMode,
    reverse_video: bool,
    overprint_preview: bool,
    /// Spot colorants in spot-channel order
    separations: Vec<String>,
}

impl ColorPipeline {
    pub fn new(mode: ColorMode, reverse_video: bool, overprint_preview: bool) -> Self {
        ColorPipeline {
            mode,
            reverse_video,
            overprint_preview,
            separations: Vec::new(),
        }
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn separations(&self) -> &[String] {
        &self.separations
    }

    /// Forget every spot channel assignment (used when a page starts).
    pub fn reset_separations(&mut self) {
        self.separations.clear();
    }

    /// Spot channel for a colorant, registering it while slots remain.
    pub fn spot_channel(&mut self, name: &str) -> Option<usize> {
        if let Some(i) = self.separations.iter().position(|s| s == name) {
            return Some(i);
        }
        if self.mode != ColorMode::DeviceN8 || self.separations.len() >= SPOT_COMPS {
            return None;
        }
        self.separations.push(name.to_string());
        Some(self.separations.len() - 1)
    }

    /// Assign spot channels to every colorant `space` names, so that later
    /// conversions through [`ColorPipeline::convert`] can find them.
    pub fn register_spots(&mut self, space: &ColorSpace) {
        match space {
            ColorSpace::Separation { name, .. } => {
                if name != "All" && name != "None" && process_index(name).is_none() {
                    self.spot_channel(name);
                }
            }
            ColorSpace::DeviceN { names, .. } => {
                for name in names {
                    if name != "None" && process_index(name).is_none() {
                        self.spot_channel(name);
                    }
                }
            }
            ColorSpace::Indexed { base, .. } => self.register_spots(base),
            _ => {}
        }
    }

    /// True when samples in `space` already are device components, so
    /// they can be scaled to bytes without a space conversion.
    pub fn is_direct(&self, space: &ColorSpace) -> bool {
        !self.reverse_video
            && matches!(
                (self.mode, space),
                (ColorMode::Mono8, ColorSpace::DeviceGray)
                    | (ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8, ColorSpace::DeviceRgb)
                    | (ColorMode::Cmyk8 | ColorMode::DeviceN8, ColorSpace::DeviceCmyk)
            )
    }

    /// Device bytes for a color sample, registering spot colorants first.
    pub fn device_color(&mut self, space: &ColorSpace, color: &[f64]) -> DeviceColor {
        if self.mode == ColorMode::DeviceN8 {
            self.register_spots(space);
        }
        self.convert(space, color)
    }

    /// Device bytes for a color sample in the active color mode. Spot
    /// colorants without a registered channel fall back to the alternate
    /// space.
    pub fn convert(&self, space: &ColorSpace, color: &[f64]) -> DeviceColor {
        let mut out = [0u8; MAX_COLOR_COMPS];
        match self.mode {
            ColorMode::Mono1 | ColorMode::Mono8 => {
                let mut g = space.to_gray(color);
                if self.reverse_video {
                    g = 1.0 - g;
                }
                out[0] = col_to_byte(g);
            }
            ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8 => {
                let mut rgb = space.to_rgb(color);
                if self.reverse_video {
                    rgb.iter_mut().for_each(|c| *c = 1.0 - *c);
                }
                for i in 0..3 {
                    out[i] = col_to_byte(rgb[i]);
                }
            }
            ColorMode::Cmyk8 => {
                let cmyk = space.to_cmyk(color);
                for i in 0..4 {
                    out[i] = col_to_byte(cmyk[i]);
                }
            }
            ColorMode::DeviceN8 => self.device_n(space, color, &mut out),
        }
        out
    }

    fn device_n(&self, space: &ColorSpace, color: &[f64], out: &mut DeviceColor) {
        let names: SmallVec<[&str; MAX_COLOR_COMPS]> = match space {
            ColorSpace::Separation { name, .. } => smallvec![name.as_str()],
            ColorSpace::DeviceN { names, .. } => names.iter().map(|s| s.as_str()).collect(),
            ColorSpace::Indexed { .. } => {
                if let Some((base, base_color)) = space.alternate_color(color) {
                    self.device_n(base, &base_color, out);
                }
                return;
            }
            _ => {
                let cmyk = space.to_cmyk(color);
                for i in 0..4 {
                    out[i] = col_to_byte(cmyk[i]);
                }
                return;
            }
        };
        if names.len() == 1 && names[0] == "All" {
            let v = col_to_byte(color.first().copied().unwrap_or(0.0));
            out[..4 + SPOT_COMPS].fill(v);
            return;
        }
        let mut channels: SmallVec<[usize; MAX_COLOR_COMPS]> = SmallVec::new();
        for name in &names {
            if *name == "None" {
                channels.push(usize::MAX);
            } else if let Some(p) = process_index(name) {
                channels.push(p);
            } else if let Some(s) = self.separations.iter().position(|s| s == name) {
                channels.push(4 + s);
            } else {
                channels.clear();
                break;
            }
        }
        if channels.len() != names.len() {
            let cmyk = space.to_cmyk(color);
            for i in 0..4 {
                out[i] = col_to_byte(cmyk[i]);
            }
            return;
        }
        for (i, &ch) in channels.iter().enumerate() {
            if ch != usize::MAX {
                out[ch] = col_to_byte(color.get(i).copied().unwrap_or(0.0));
            }
        }
    }

    /// Components that a paint in `space` touches, before overprint rules.
    fn space_mask(&mut self, space: &ColorSpace) -> u32 {
        match space {
            ColorSpace::DeviceGray => 0x08,
            ColorSpace::DeviceRgb => 0x07,
            ColorSpace::DeviceCmyk => 0x0f,
            ColorSpace::Indexed { base, .. } => self.space_mask(base),
            ColorSpace::Separation { name, .. } => self.colorant_mask(name),
            ColorSpace::DeviceN { names, .. } => {
                names.iter().fold(0, |m, n| m | self.colorant_mask(n))
            }
        }
    }

    fn colorant_mask(&mut self, name: &str) -> u32 {
        match name {
            "None" => 0,
            "All" => 0xffff_ffff,
            _ => match process_index(name) {
                Some(p) => 1 << p,
                None => match self.spot_channel(name) {
                    Some(s) => 1 << (4 + s),
                    None => 0x0f,
                },
            },
        }
    }

    /// Overprint mask for a paint operation.
    ///
    /// `gray_indexed` is set by the image path for indexed images whose
    /// palette is pure gray, which only ever mark the black plane.
    pub fn overprint_mask(
        &mut self,
        space: &ColorSpace,
        overprint: bool,
        overprint_mode: i32,
        color: Option<&[f64]>,
        gray_indexed: bool,
    ) -> OverprintMask {
        if let ColorSpace::Indexed { base, .. } = space {
            return self.overprint_mask(base, overprint, overprint_mode, None, gray_indexed);
        }
        if !(overprint && self.overprint_preview) {
            return OverprintMask::ALL;
        }
        let mut mask = self.space_mask(space);
        if let (ColorSpace::DeviceCmyk, Some(color), 1) = (space, color, overprint_mode) {
            for i in 0..4 {
                if color.get(i).copied().unwrap_or(0.0) == 0.0 {
                    mask &= !(1 << i);
                }
            }
        }
        if gray_indexed {
            mask &= !7;
        }
        let additive = match space {
            ColorSpace::Separation { name, .. } => {
                name != "All" && mask == 0x0f && !space.is_non_marking()
            }
            ColorSpace::DeviceN { names, .. } => {
                mask == 0x0f
                    && !space.is_non_marking()
                    && !names.iter().any(|n| process_index(n).is_some())
            }
            _ => false,
        };
        OverprintMask { mask, additive }
    }
}

/// Transfer lookup tables applied to source colors before compositing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTables {
    pub red: [u8; 256],
    pub green: [u8; 256],
    pub blue: [u8; 256],
    pub gray: [u8; 256],
}

impl Default for TransferTables {
    fn default() -> Self {
        TransferTables::identity()
    }
}

impl TransferTables {
    pub fn identity() -> Self {
        let mut t = [0u8; 256];
        for (i, v) in t.iter_mut().enumerate() {
            *v = i as u8;
        }
        TransferTables {
            red: t,
            green: t,
            blue: t,
            gray: t,
        }
    }

    /// Build from the graphics state's transfer functions: four (red,
    /// green, blue, gray) or one applied to every table. Any other count
    /// yields the identity.
    pub fn from_functions(funcs: &[FunctionRef]) -> Self {
        let mut tables = TransferTables::identity();
        let table = |f: &FunctionRef| {
            let mut out = [0u8; 256];
            let mut y = [0.0f64; 1];
            for (i, v) in out.iter_mut().enumerate() {
                f.transform(&[i as f64 / 255.0], &mut y);
                *v = (y[0].clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
            }
            out
        };
        match funcs.len() {
            4 => {
                tables.red = table(&funcs[0]);
                tables.green = table(&funcs[1]);
                tables.blue = table(&funcs[2]);
                tables.gray = table(&funcs[3]);
            }
            1 => {
                let t = table(&funcs[0]);
                tables.red = t;
                tables.green = t;
                tables.blue = t;
                tables.gray = t;
            }
            _ => {}
        }
        tables
    }

    pub fn is_identity(&self) -> bool {
        *self == TransferTables::identity()
    }

    /// Map a device color in place. Ink channels go through the
    /// complemented light tables.
    pub fn apply(&self, c: &mut DeviceColor, mode: ColorMode) {
        let inv = |t: &[u8; 256], v: u8| 255 - t[(255 - v) as usize];
        match mode {
            ColorMode::Mono1 | ColorMode::Mono8 => c[0] = self.gray[c[0] as usize],
            ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8 => {
                c[0] = self.red[c[0] as usize];
                c[1] = self.green[c[1] as usize];
                c[2] = self.blue[c[2] as usize];
            }
            ColorMode::Cmyk8 | ColorMode::DeviceN8 => {
                c[0] = inv(&self.red, c[0]);
                c[1] = inv(&self.green, c[1]);
                c[2] = inv(&self.blue, c[2]);
                c[3] = inv(&self.gray, c[3]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::function::ExponentialFunction;
    use std::rc::Rc;

    fn spot(name: &str) -> ColorSpace {
        ColorSpace::Separation {
            name: name.to_string(),
            alt: Box::new(ColorSpace::DeviceCmyk),
            tint: Rc::new(ExponentialFunction::new(
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0, 0.0],
                1.0,
            )),
        }
    }

    #[test]
    fn test_reverse_video_complements_rgb() {
        let mut p = ColorPipeline::new(ColorMode::Rgb8, true, false);
        let c = p.device_color(&ColorSpace::DeviceRgb, &[1.0, 0.0, 0.2]);
        assert_eq!(&c[..3], &[0, 255, 204]);
    }

    #[test]
    fn test_reverse_video_leaves_cmyk() {
        let mut p = ColorPipeline::new(ColorMode::Cmyk8, true, false);
        let c = p.device_color(&ColorSpace::DeviceCmyk, &[1.0, 0.0, 0.0, 0.5]);
        assert_eq!(&c[..4], &[255, 0, 0, 128]);
    }

    #[test]
    fn test_indexed_lookup() {
        let space = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceRgb),
            hival: 1,
            lookup: vec![255, 0, 0, 0, 0, 255],
        };
        let mut p = ColorPipeline::new(ColorMode::Rgb8, false, false);
        assert_eq!(&p.device_color(&space, &[1.0])[..3], &[0, 0, 255]);
        assert_eq!(&p.device_color(&space, &[7.0])[..3], &[0, 0, 255]);
    }

    #[test]
    fn test_spot_maps_to_channel() {
        let mut p = ColorPipeline::new(ColorMode::DeviceN8, false, false);
        let c = p.device_color(&spot("PANTONE 123"), &[0.5]);
        assert_eq!(c, [0, 0, 0, 0, 128, 0, 0, 0]);
        assert_eq!(p.separations(), &["PANTONE 123".to_string()]);
    }

    #[test]
    fn test_spot_overflow_uses_alternate() {
        let mut p = ColorPipeline::new(ColorMode::DeviceN8, false, false);
        for name in ["A", "B", "C", "D"] {
            p.device_color(&spot(name), &[1.0]);
        }
        let c = p.device_color(&spot("E"), &[1.0]);
        assert_eq!(c, [0, 255, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_overprint_requires_preview() {
        let mut p = ColorPipeline::new(ColorMode::Cmyk8, false, false);
        let m = p.overprint_mask(&ColorSpace::DeviceCmyk, true, 1, Some(&[0.0, 1.0, 0.0, 0.0]), false);
        assert_eq!(m, OverprintMask::ALL);
    }

    #[test]
    fn test_overprint_mode_one_drops_zero_components() {
        let mut p = ColorPipeline::new(ColorMode::Cmyk8, false, true);
        let m = p.overprint_mask(&ColorSpace::DeviceCmyk, true, 1, Some(&[0.0, 1.0, 0.0, 0.5]), false);
        assert_eq!(m.mask, 0x0a);
        assert!(!m.additive);
        let m = p.overprint_mask(&ColorSpace::DeviceCmyk, true, 0, Some(&[0.0, 1.0, 0.0, 0.5]), false);
        assert_eq!(m.mask, 0x0f);
    }

    #[test]
    fn test_separation_additive() {
        let mut p = ColorPipeline::new(ColorMode::Cmyk8, false, true);
        let m = p.overprint_mask(&spot("Gold"), true, 0, Some(&[1.0]), false);
        assert_eq!(m, OverprintMask { mask: 0x0f, additive: true });
        let m = p.overprint_mask(&spot("Magenta"), true, 0, Some(&[1.0]), false);
        assert_eq!(m, OverprintMask { mask: 0x02, additive: false });
    }

    #[test]
    fn test_non_marking() {
        assert!(spot("None").is_non_marking());
        assert!(!spot("All").is_non_marking());
    }

    #[test]
    fn test_transfer_tables() {
        let invert: FunctionRef = Rc::new(ExponentialFunction::new(vec![1.0], vec![0.0], 1.0));
        let t = TransferTables::from_functions(&[invert]);
        let mut c = [10, 20, 30, 0, 0, 0, 0, 0];
        t.apply(&mut c, ColorMode::Rgb8);
        assert_eq!(&c[..3], &[245, 235, 225]);
        assert!(TransferTables::from_functions(&[]).is_identity());
    }
}
