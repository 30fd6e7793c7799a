//! Per-pixel color sources for fills.
//!
//! A [`Pattern`] answers "which device color does this pixel get, if any".
//! Shading patterns map the pixel back through the inverse of the paint
//! transform and solve for the shading parameter; the compositor never
//! needs to know which variant it is sampling.

use std::fmt;
use std::rc::Rc;

use super::canvas::{DeviceColor, MAX_COLOR_COMPS};
use super::color::{ColorPipeline, ColorSpace, GfxColor, col_to_byte};
use super::function::FunctionRef;
use super::shading::{
    AxialShading, FunctionShading, GouraudShading, RadialShading, eval_shading_functions,
};
use crate::core::geometry::{Matrix, Rect};

/// Tolerance below which the radial quadratic is treated as linear.
const RADIAL_EPSILON: f64 = 1.0 / 1024.0 / 1024.0;

/// A color source sampled at device pixels.
pub trait Pattern: fmt::Debug {
    /// Device color for pixel `(x, y)`, or `None` where the pattern does
    /// not paint.
    fn sample(&self, x: i32, y: i32) -> Option<DeviceColor>;

    /// Cheap coverage test that skips color computation.
    fn quick_cover(&self, x: i32, y: i32) -> bool {
        self.sample(x, y).is_some()
    }

    /// Color plus the pattern's own opacity at a pixel. Shadings are
    /// opaque wherever they paint.
    fn sample_with_alpha(&self, x: i32, y: i32) -> Option<(DeviceColor, u8)> {
        self.sample(x, y).map(|c| (c, 255))
    }

    /// Same color at every pixel.
    fn is_static(&self) -> bool {
        false
    }

    /// Colors are ink amounts (CMYK or DeviceN) rather than light.
    fn uses_subtractive_color(&self) -> bool;
}

pub type PatternRef = Rc<dyn Pattern>;

/// One color everywhere.
#[derive(Debug, Clone)]
pub struct SolidPattern {
    color: DeviceColor,
    subtractive: bool,
}

impl SolidPattern {
    pub fn new(color: DeviceColor, subtractive: bool) -> Self {
        SolidPattern { color, subtractive }
    }

    pub fn color(&self) -> &DeviceColor {
        &self.color
    }
}

impl Pattern for SolidPattern {
    fn sample(&self, _x: i32, _y: i32) -> Option<DeviceColor> {
        Some(self.color)
    }

    fn quick_cover(&self, _x: i32, _y: i32) -> bool {
        true
    }

    fn is_static(&self) -> bool {
        true
    }

    fn uses_subtractive_color(&self) -> bool {
        self.subtractive
    }
}

/// Converts shading colors into device bytes.
#[derive(Debug, Clone)]
struct ShadingColor {
    space: ColorSpace,
    functions: Vec<FunctionRef>,
    pipeline: ColorPipeline,
}

impl ShadingColor {
    fn new(space: &ColorSpace, functions: &[FunctionRef], pipeline: &ColorPipeline) -> Self {
        ShadingColor {
            space: space.clone(),
            functions: functions.to_vec(),
            pipeline: pipeline.clone(),
        }
    }

    fn from_input(&self, input: &[f64]) -> DeviceColor {
        let c = eval_shading_functions(&self.functions, input, self.space.components());
        self.device(&c)
    }

    fn device(&self, c: &GfxColor) -> DeviceColor {
        if self.pipeline.is_direct(&self.space) {
            let mut out = [0u8; MAX_COLOR_COMPS];
            for (o, v) in out.iter_mut().zip(c.iter()) {
                *o = col_to_byte(*v);
            }
            return out;
        }
        self.pipeline.convert(&self.space, c)
    }

    fn subtractive(&self) -> bool {
        self.pipeline.mode().is_subtractive()
    }
}

/// Pixel center in device space mapped into shading space.
#[inline]
fn to_shading(ictm: &Matrix, x: i32, y: i32) -> (f64, f64) {
    ictm.transform_point(x as f64 + 0.5, y as f64 + 0.5)
}

/// Map `s` in `[0, 1]` to the domain, hitting both ends exactly.
#[inline]
fn lerp_domain(t0: f64, t1: f64, s: f64) -> f64 {
    if s <= 0.0 {
        t0
    } else if s >= 1.0 {
        t1
    } else {
        t0 + (t1 - t0) * s
    }
}

#[derive(Debug, Clone)]
pub struct AxialPattern {
    ictm: Matrix,
    coords: [f64; 4],
    domain: [f64; 2],
    extend: [bool; 2],
    dx: f64,
    dy: f64,
    denom: f64,
    colors: ShadingColor,
}

impl AxialPattern {
    /// `ctm` maps shading space to device space. Returns `None` when it
    /// cannot be inverted.
    pub fn new(shading: &AxialShading, ctm: &Matrix, pipeline: &ColorPipeline) -> Option<Self> {
        let ictm = ctm.invert()?;
        let [x0, y0, x1, y1] = shading.coords;
        let (dx, dy) = (x1 - x0, y1 - y0);
        Some(AxialPattern {
            ictm,
            coords: shading.coords,
            domain: shading.domain,
            extend: shading.extend,
            dx,
            dy,
            denom: dx * dx + dy * dy,
            colors: ShadingColor::new(&shading.color_space, &shading.functions, pipeline),
        })
    }

    /// Shading parameter at a shading-space point.
    pub fn parameter(&self, xc: f64, yc: f64) -> Option<f64> {
        let s = if self.denom == 0.0 {
            0.0
        } else {
            ((xc - self.coords[0]) * self.dx + (yc - self.coords[1]) * self.dy) / self.denom
        };
        let [t0, t1] = self.domain;
        if s < 0.0 {
            return self.extend[0].then_some(t0);
        }
        if s > 1.0 {
            return self.extend[1].then_some(t1);
        }
        Some(lerp_domain(t0, t1, s))
    }
}

impl Pattern for AxialPattern {
    fn sample(&self, x: i32, y: i32) -> Option<DeviceColor> {
        let (xc, yc) = to_shading(&self.ictm, x, y);
        let t = self.parameter(xc, yc)?;
        Some(self.colors.from_input(&[t]))
    }

    fn quick_cover(&self, x: i32, y: i32) -> bool {
        let (xc, yc) = to_shading(&self.ictm, x, y);
        self.parameter(xc, yc).is_some()
    }

    fn uses_subtractive_color(&self) -> bool {
        self.colors.subtractive()
    }
}

#[derive(Debug, Clone)]
pub struct RadialPattern {
    ictm: Matrix,
    coords: [f64; 6],
    domain: [f64; 2],
    extend: [bool; 2],
    dx: f64,
    dy: f64,
    dr: f64,
    a: f64,
    colors: ShadingColor,
}

impl RadialPattern {
    pub fn new(shading: &RadialShading, ctm: &Matrix, pipeline: &ColorPipeline) -> Option<Self> {
        let ictm = ctm.invert()?;
        let [x0, y0, r0, x1, y1, r1] = shading.coords;
        let (dx, dy, dr) = (x1 - x0, y1 - y0, r1 - r0);
        Some(RadialPattern {
            ictm,
            coords: shading.coords,
            domain: shading.domain,
            extend: shading.extend,
            dx,
            dy,
            dr,
            a: dx * dx + dy * dy - dr * dr,
            colors: ShadingColor::new(&shading.color_space, &shading.functions, pipeline),
        })
    }

    /// Both roots `s` of the circle equation at a shading-space point,
    /// larger first. `None` when no real root exists (or, for concentric
    /// equal circles, when `s` is undetermined).
    pub fn roots(&self, xc: f64, yc: f64) -> Option<(f64, f64)> {
        let [x0, y0, r0, ..] = self.coords;
        let (xs, ys) = (xc - x0, yc - y0);
        let b = xs * self.dx + ys * self.dy + r0 * self.dr;
        let c = xs * xs + ys * ys - r0 * r0;
        if self.a.abs() <= RADIAL_EPSILON {
            if b.abs() <= RADIAL_EPSILON {
                return None;
            }
            let s = 0.5 * c / b;
            return Some((s, s));
        }
        let d = b * b - self.a * c;
        if d < 0.0 {
            return None;
        }
        let sq = d.sqrt();
        let s0 = (b + sq) / self.a;
        let s1 = (b - sq) / self.a;
        Some((s0.max(s1), s0.min(s1)))
    }

    fn accept(&self, s: f64) -> Option<f64> {
        let r0 = self.coords[2];
        if r0 + s * self.dr < 0.0 {
            return None;
        }
        let [t0, t1] = self.domain;
        if (0.0..=1.0).contains(&s) {
            Some(lerp_domain(t0, t1, s))
        } else if s < 0.0 && self.extend[0] {
            Some(t0)
        } else if s > 1.0 && self.extend[1] {
            Some(t1)
        } else {
            None
        }
    }

    /// Shading parameter at a shading-space point. The larger root is
    /// tried first, so later circles paint over earlier ones.
    pub fn parameter(&self, xc: f64, yc: f64) -> Option<f64> {
        if self.dx == 0.0 && self.dy == 0.0 && self.dr == 0.0 {
            // Every circle is the same circle: one color inside it, and
            // outside only where an extension paints.
            let [x0, y0, r0, ..] = self.coords;
            let inside = (xc - x0).powi(2) + (yc - y0).powi(2) <= r0 * r0;
            let [t0, t1] = self.domain;
            return if inside || self.extend[0] {
                Some(t0)
            } else if self.extend[1] {
                Some(t1)
            } else {
                None
            };
        }
        let (hi, lo) = self.roots(xc, yc)?;
        self.accept(hi).or_else(|| self.accept(lo))
    }
}

impl Pattern for RadialPattern {
    fn sample(&self, x: i32, y: i32) -> Option<DeviceColor> {
        let (xc, yc) = to_shading(&self.ictm, x, y);
        let t = self.parameter(xc, yc)?;
        Some(self.colors.from_input(&[t]))
    }

    fn quick_cover(&self, x: i32, y: i32) -> bool {
        let (xc, yc) = to_shading(&self.ictm, x, y);
        self.parameter(xc, yc).is_some()
    }

    fn uses_subtractive_color(&self) -> bool {
        self.colors.subtractive()
    }
}

#[derive(Debug, Clone)]
pub struct FunctionPattern {
    ictm: Matrix,
    domain: [f64; 4],
    colors: ShadingColor,
}

impl FunctionPattern {
    /// `ctm` maps shading space to device space; the shading's own matrix
    /// is applied in front of it.
    pub fn new(shading: &FunctionShading, ctm: &Matrix, pipeline: &ColorPipeline) -> Option<Self> {
        let ictm = shading.matrix.then(ctm).invert()?;
        Some(FunctionPattern {
            ictm,
            domain: shading.domain,
            colors: ShadingColor::new(&shading.color_space, &shading.functions, pipeline),
        })
    }

    fn domain_point(&self, x: i32, y: i32) -> Option<(f64, f64)> {
        let (xs, ys) = to_shading(&self.ictm, x, y);
        let [x0, x1, y0, y1] = self.domain;
        (xs >= x0 && xs <= x1 && ys >= y0 && ys <= y1).then_some((xs, ys))
    }
}

impl Pattern for FunctionPattern {
    fn sample(&self, x: i32, y: i32) -> Option<DeviceColor> {
        let (xs, ys) = self.domain_point(x, y)?;
        Some(self.colors.from_input(&[xs, ys]))
    }

    fn quick_cover(&self, x: i32, y: i32) -> bool {
        self.domain_point(x, y).is_some()
    }

    fn uses_subtractive_color(&self) -> bool {
        self.colors.subtractive()
    }
}

#[derive(Debug, Clone)]
enum VertexColors {
    /// Pre-converted device colors, interpolated per component
    Device([DeviceColor; 3]),
    /// Shading parameter, interpolated then run through the functions
    Parameter([f64; 3]),
}

#[derive(Debug, Clone)]
struct DeviceTriangle {
    points: [(f64, f64); 3],
    inv_det: f64,
    colors: VertexColors,
}

impl DeviceTriangle {
    /// Barycentric weights, or `None` when the point is outside.
    fn weights(&self, px: f64, py: f64) -> Option<[f64; 3]> {
        let [(x0, y0), (x1, y1), (x2, y2)] = self.points;
        let w0 = ((y1 - y2) * (px - x2) + (x2 - x1) * (py - y2)) * self.inv_det;
        let w1 = ((y2 - y0) * (px - x2) + (x0 - x2) * (py - y2)) * self.inv_det;
        let w2 = 1.0 - w0 - w1;
        const EDGE: f64 = -1e-9;
        (w0 >= EDGE && w1 >= EDGE && w2 >= EDGE).then_some([w0, w1, w2])
    }
}

#[derive(Debug, Clone)]
pub struct GouraudPattern {
    triangles: Vec<DeviceTriangle>,
    bounds: Option<Rect>,
    colors: ShadingColor,
    n_comps: usize,
}

impl GouraudPattern {
    pub fn new(shading: &GouraudShading, ctm: &Matrix, pipeline: &ColorPipeline) -> Self {
        let colors = ShadingColor::new(&shading.color_space, &shading.functions, pipeline);
        let mut bounds: Option<Rect> = None;
        let mut triangles = Vec::with_capacity(shading.triangles.len());
        for tri in &shading.triangles {
            let points = [
                ctm.transform_point(tri[0].x, tri[0].y),
                ctm.transform_point(tri[1].x, tri[1].y),
                ctm.transform_point(tri[2].x, tri[2].y),
            ];
            let [(x0, y0), (x1, y1), (x2, y2)] = points;
            let det = (y1 - y2) * (x0 - x2) + (x2 - x1) * (y0 - y2);
            if det == 0.0 || !det.is_finite() {
                continue;
            }
            for (x, y) in points {
                let r = bounds.get_or_insert(Rect::new(x, y, x, y));
                r.x_min = r.x_min.min(x);
                r.y_min = r.y_min.min(y);
                r.x_max = r.x_max.max(x);
                r.y_max = r.y_max.max(y);
            }
            let vertex_colors = if shading.is_parameterized() {
                VertexColors::Parameter([
                    tri[0].color.first().copied().unwrap_or(0.0),
                    tri[1].color.first().copied().unwrap_or(0.0),
                    tri[2].color.first().copied().unwrap_or(0.0),
                ])
            } else {
                VertexColors::Device([
                    colors.device(&tri[0].color),
                    colors.device(&tri[1].color),
                    colors.device(&tri[2].color),
                ])
            };
            triangles.push(DeviceTriangle {
                points,
                inv_det: 1.0 / det,
                colors: vertex_colors,
            });
        }
        GouraudPattern {
            triangles,
            bounds,
            n_comps: pipeline.mode().components(),
            colors,
        }
    }

    /// Device-space bounding box of all triangles.
    pub fn bounds(&self) -> Option<Rect> {
        self.bounds
    }
}

impl Pattern for GouraudPattern {
    fn sample(&self, x: i32, y: i32) -> Option<DeviceColor> {
        let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
        let (tri, w) = self
            .triangles
            .iter()
            .find_map(|t| t.weights(px, py).map(|w| (t, w)))?;
        match &tri.colors {
            VertexColors::Parameter(t) => {
                let t = w[0] * t[0] + w[1] * t[1] + w[2] * t[2];
                Some(self.colors.from_input(&[t]))
            }
            VertexColors::Device(c) => {
                let mut out = [0u8; MAX_COLOR_COMPS];
                for i in 0..self.n_comps {
                    let v = w[0] * c[0][i] as f64 + w[1] * c[1][i] as f64 + w[2] * c[2][i] as f64;
                    out[i] = (v + 0.5).clamp(0.0, 255.0) as u8;
                }
                Some(out)
            }
        }
    }

    fn quick_cover(&self, x: i32, y: i32) -> bool {
        let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
        self.triangles.iter().any(|t| t.weights(px, py).is_some())
    }

    fn uses_subtractive_color(&self) -> bool {
        self.colors.subtractive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::canvas::ColorMode;
    use crate::rendering::function::ExponentialFunction;
    use crate::rendering::shading::GouraudVertex;
    use smallvec::smallvec;

    fn gray_ramp() -> Vec<FunctionRef> {
        vec![Rc::new(ExponentialFunction::identity())]
    }

    fn pipeline() -> ColorPipeline {
        ColorPipeline::new(ColorMode::Mono8, false, false)
    }

    fn axial(extend: [bool; 2]) -> AxialPattern {
        let shading = AxialShading {
            color_space: ColorSpace::DeviceGray,
            coords: [0.0, 0.0, 10.0, 0.0],
            domain: [0.0, 1.0],
            extend,
            functions: gray_ramp(),
            bbox: None,
        };
        AxialPattern::new(&shading, &Matrix::identity(), &pipeline()).unwrap()
    }

    fn radial(coords: [f64; 6], extend: [bool; 2]) -> RadialPattern {
        let shading = RadialShading {
            color_space: ColorSpace::DeviceGray,
            coords,
            domain: [0.0, 1.0],
            extend,
            functions: gray_ramp(),
            bbox: None,
        };
        RadialPattern::new(&shading, &Matrix::identity(), &pipeline()).unwrap()
    }

    #[test]
    fn test_axial_endpoints_exact() {
        let p = axial([false, false]);
        assert_eq!(p.parameter(0.0, 3.0), Some(0.0));
        assert_eq!(p.parameter(10.0, -2.0), Some(1.0));
        assert_eq!(p.parameter(5.0, 0.0), Some(0.5));
        assert_eq!(p.parameter(10.5, 0.0), None);
        assert_eq!(p.parameter(-0.5, 0.0), None);
    }

    #[test]
    fn test_axial_extend_clamps() {
        let p = axial([true, true]);
        assert_eq!(p.parameter(-100.0, 0.0), Some(0.0));
        assert_eq!(p.parameter(100.0, 0.0), Some(1.0));
    }

    #[test]
    fn test_axial_sample_colors() {
        let p = axial([false, false]);
        // Pixel 4 has center 4.5.
        assert_eq!(p.sample(4, 0).map(|c| c[0]), Some(col_to_byte(0.45)));
        assert!(p.sample(12, 0).is_none());
        assert!(!p.quick_cover(-5, 0));
    }

    #[test]
    fn test_radial_prefers_larger_root() {
        let p = radial([0.0, 0.0, 1.0, 10.0, 0.0, 1.0], [false, false]);
        let (hi, lo) = p.roots(5.0, 0.0).unwrap();
        assert!((hi - 0.6).abs() < 1e-12 && (lo - 0.4).abs() < 1e-12);
        assert!((p.parameter(5.0, 0.0).unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_radial_negative_radius_rejected() {
        // Shrinking to zero radius: the larger root would need r < 0.
        let p = radial([0.0, 0.0, 5.0, 0.0, 0.0, 0.0], [true, true]);
        let t = p.parameter(1.0, 0.0).unwrap();
        assert!((t - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_radial_concentric_equal_circles() {
        let p = radial([0.0, 0.0, 2.0, 0.0, 0.0, 2.0], [false, false]);
        assert_eq!(p.parameter(0.5, 0.5), Some(0.0));
        assert_eq!(p.parameter(1.0, -1.0), Some(0.0));
        assert_eq!(p.parameter(3.0, 0.0), None);
        let p = radial([0.0, 0.0, 2.0, 0.0, 0.0, 2.0], [false, true]);
        assert_eq!(p.parameter(3.0, 0.0), Some(1.0));
    }

    #[test]
    fn test_function_pattern_domain() {
        let f: FunctionRef = Rc::new(ExponentialFunction::identity());
        let shading = FunctionShading {
            color_space: ColorSpace::DeviceGray,
            domain: [0.0, 4.0, 0.0, 4.0],
            matrix: Matrix::identity(),
            functions: vec![f],
            bbox: None,
        };
        let p = FunctionPattern::new(&shading, &Matrix::identity(), &pipeline()).unwrap();
        assert!(p.quick_cover(1, 1));
        assert!(p.sample(5, 1).is_none());
    }

    #[test]
    fn test_gouraud_interpolates_device_colors() {
        let v = |x, y, g| GouraudVertex {
            x,
            y,
            color: smallvec![g],
        };
        let shading = GouraudShading {
            color_space: ColorSpace::DeviceGray,
            triangles: vec![[v(0.0, 0.0, 0.0), v(10.0, 0.0, 1.0), v(0.0, 10.0, 0.0)]],
            functions: vec![],
            bbox: None,
        };
        let p = GouraudPattern::new(&shading, &Matrix::identity(), &pipeline());
        let c = p.sample(4, 0).unwrap();
        assert_eq!(c[0], (255.0f64 * 0.45 + 0.5) as u8);
        assert!(p.sample(9, 9).is_none());
        assert_eq!(p.bounds(), Some(Rect::new(0.0, 0.0, 10.0, 10.0)));
    }
}
