//! The sixteen PDF blend modes on 8-bit device channels.
//!
//! Every formula is written for additive color. Subtractive modes (CMYK and
//! DeviceN) complement source and destination first and complement the
//! result afterwards, so the same arithmetic serves both.

use super::canvas::{ColorMode, DeviceColor, MAX_COLOR_COMPS};

/// `x / 255` rounded, exact for every product of two bytes.
#[inline]
pub fn div255(x: u32) -> u8 {
    let x = x + 0x80;
    ((x + (x >> 8)) >> 8) as u8
}

/// Blend mode of the graphics state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// Look a mode up by its PDF name (`/Multiply` without the slash).
    pub fn from_name(name: &str) -> Option<BlendMode> {
        Some(match name {
            "Normal" | "Compatible" => BlendMode::Normal,
            "Multiply" => BlendMode::Multiply,
            "Screen" => BlendMode::Screen,
            "Overlay" => BlendMode::Overlay,
            "Darken" => BlendMode::Darken,
            "Lighten" => BlendMode::Lighten,
            "ColorDodge" => BlendMode::ColorDodge,
            "ColorBurn" => BlendMode::ColorBurn,
            "HardLight" => BlendMode::HardLight,
            "SoftLight" => BlendMode::SoftLight,
            "Difference" => BlendMode::Difference,
            "Exclusion" => BlendMode::Exclusion,
            "Hue" => BlendMode::Hue,
            "Saturation" => BlendMode::Saturation,
            "Color" => BlendMode::Color,
            "Luminosity" => BlendMode::Luminosity,
            _ => return None,
        })
    }

    /// Hue, Saturation, Color and Luminosity mix channels together.
    pub fn is_non_separable(self) -> bool {
        matches!(
            self,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
        )
    }

    /// Blend `src` onto `dest`, writing every component of `mode` into
    /// `out`. `Normal` returns the source unchanged.
    pub fn apply(self, src: &DeviceColor, dest: &DeviceColor, out: &mut DeviceColor, mode: ColorMode) {
        if self.is_non_separable() {
            blend_non_separable(self, src, dest, out, mode);
            return;
        }
        let n = mode.components();
        let subtractive = mode.is_subtractive();
        for i in 0..n {
            let (mut s, mut d) = (src[i], dest[i]);
            if subtractive {
                s = 255 - s;
                d = 255 - d;
            }
            let mut b = separable(self, s, d);
            // Spot channels untouched by both inputs stay untouched.
            if mode == ColorMode::DeviceN8
                && i >= 4
                && src[i] == 0
                && dest[i] == 0
                && matches!(self, BlendMode::Difference | BlendMode::Exclusion)
            {
                b = 255;
            }
            out[i] = if subtractive { 255 - b } else { b };
        }
        for c in out.iter_mut().take(MAX_COLOR_COMPS).skip(n) {
            *c = 0;
        }
    }
}

/// Separable modes on additive bytes, `s` source and `d` destination.
fn separable(mode: BlendMode, s: u8, d: u8) -> u8 {
    let (s, d) = (s as i32, d as i32);
    let v = match mode {
        BlendMode::Normal => s,
        BlendMode::Multiply => d * s / 255,
        BlendMode::Screen => d + s - d * s / 255,
        BlendMode::Overlay => hard_light(d, s),
        BlendMode::Darken => d.min(s),
        BlendMode::Lighten => d.max(s),
        BlendMode::ColorDodge => {
            if s == 255 {
                255
            } else {
                (d * 255 / (255 - s)).min(255)
            }
        }
        BlendMode::ColorBurn => {
            if s == 0 {
                0
            } else {
                let x = (255 - d) * 255 / s;
                if x <= 255 { 255 - x } else { 0 }
            }
        }
        BlendMode::HardLight => hard_light(s, d),
        BlendMode::SoftLight => soft_light(s, d),
        BlendMode::Difference => (s - d).abs(),
        BlendMode::Exclusion => d + s - 2 * d * s / 255,
        BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity => s,
    };
    v.clamp(0, 255) as u8
}

fn hard_light(s: i32, d: i32) -> i32 {
    if s < 0x80 {
        2 * d * s / 255
    } else {
        255 - 2 * ((255 - d) * (255 - s)) / 255
    }
}

fn soft_light(s: i32, d: i32) -> i32 {
    if s < 0x80 {
        d - (255 - 2 * s) * d * (255 - d) / (255 * 255)
    } else {
        let x = if d < 0x40 {
            ((((16 * d - 12 * 255) * d) / 255 + 4 * 255) * d) / 255
        } else {
            ((255 * d) as f64).sqrt() as i32
        };
        d + (2 * s - 255) * (x - d) / 255
    }
}

/// Perceptual luminosity of an additive RGB triple.
pub fn lum(r: i32, g: i32, b: i32) -> i32 {
    (0.3 * r as f64 + 0.59 * g as f64 + 0.11 * b as f64) as i32
}

fn sat(r: i32, g: i32, b: i32) -> i32 {
    r.max(g).max(b) - r.min(g).min(b)
}

/// Pull an out-of-range triple back toward its luminosity.
fn clip_color(r: i32, g: i32, b: i32) -> (u8, u8, u8) {
    let l = lum(r, g, b);
    let n = r.min(g).min(b);
    let x = r.max(g).max(b);
    let (mut r, mut g, mut b) = (r, g, b);
    if n < 0 && l != n {
        r = l + (r - l) * l / (l - n);
        g = l + (g - l) * l / (l - n);
        b = l + (b - l) * l / (l - n);
    } else if x > 255 && x != l {
        r = l + (r - l) * (255 - l) / (x - l);
        g = l + (g - l) * (255 - l) / (x - l);
        b = l + (b - l) * (255 - l) / (x - l);
    }
    (r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8)
}

fn set_lum(r: u8, g: u8, b: u8, l: i32) -> (u8, u8, u8) {
    let d = l - lum(r as i32, g as i32, b as i32);
    clip_color(r as i32 + d, g as i32 + d, b as i32 + d)
}

fn set_sat(r: u8, g: u8, b: u8, s: i32) -> (u8, u8, u8) {
    let mut ch = [(r as i32, 0usize), (g as i32, 1), (b as i32, 2)];
    ch.sort_by_key(|c| c.0);
    let (min, mid, max) = (ch[0], ch[1], ch[2]);
    let mut out = [0i32; 3];
    if max.0 > min.0 {
        out[mid.1] = (mid.0 - min.0) * s / (max.0 - min.0);
        out[max.1] = s;
    }
    out[min.1] = 0;
    (out[0] as u8, out[1] as u8, out[2] as u8)
}

fn blend_non_separable(
    mode: BlendMode,
    src: &DeviceColor,
    dest: &DeviceColor,
    out: &mut DeviceColor,
    cmode: ColorMode,
) {
    *out = [0; MAX_COLOR_COMPS];
    let (s, d) = match cmode {
        // No hue in gray: the destination shows through.
        ColorMode::Mono1 | ColorMode::Mono8 => {
            out[0] = dest[0];
            return;
        }
        ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8 => {
            ((src[0], src[1], src[2]), (dest[0], dest[1], dest[2]))
        }
        ColorMode::Cmyk8 | ColorMode::DeviceN8 => (
            (255 - src[0], 255 - src[1], 255 - src[2]),
            (255 - dest[0], 255 - dest[1], 255 - dest[2]),
        ),
    };
    let (sr, sg, sb) = (s.0 as i32, s.1 as i32, s.2 as i32);
    let (dr, dg, db) = (d.0 as i32, d.1 as i32, d.2 as i32);
    let (r, g, b) = match mode {
        BlendMode::Hue => {
            let (r, g, b) = set_sat(s.0, s.1, s.2, sat(dr, dg, db));
            set_lum(r, g, b, lum(dr, dg, db))
        }
        BlendMode::Saturation => {
            let (r, g, b) = set_sat(d.0, d.1, d.2, sat(sr, sg, sb));
            set_lum(r, g, b, lum(dr, dg, db))
        }
        BlendMode::Color => set_lum(s.0, s.1, s.2, lum(dr, dg, db)),
        _ => set_lum(d.0, d.1, d.2, lum(sr, sg, sb)),
    };
    if cmode.is_subtractive() {
        out[0] = 255 - r;
        out[1] = 255 - g;
        out[2] = 255 - b;
        // Black follows the layer that supplies luminosity.
        out[3] = if mode == BlendMode::Luminosity { src[3] } else { dest[3] };
        if cmode == ColorMode::DeviceN8 {
            out[4..8].copy_from_slice(&dest[4..8]);
        }
    } else {
        out[0] = r;
        out[1] = g;
        out[2] = b;
    }
}
