//! Property-based tests for the compositing arithmetic and shading math.
//!
//! These tests use proptest to generate random inputs and verify invariants.

use std::rc::Rc;

use pdf_x_raster::core::{Matrix, Rect};
use pdf_x_raster::rendering::blend::div255;
use pdf_x_raster::rendering::canvas::MAX_COLOR_COMPS;
use pdf_x_raster::rendering::pattern::{AxialPattern, RadialPattern};
use pdf_x_raster::rendering::tiling::plan_cell;
use pdf_x_raster::rendering::{
    AxialShading, BlendMode, Canvas, ColorMode, ColorPipeline, ColorSpace, ExponentialFunction, PaintType,
    RadialShading, RenderContext, TileRange, TilingParams, TransparencyEngine,
};
use proptest::prelude::*;

fn gray_pipeline() -> ColorPipeline {
    ColorPipeline::new(ColorMode::Mono8, false, false)
}

fn radial(coords: [f64; 6], extend: [bool; 2]) -> RadialPattern {
    let shading = RadialShading {
        color_space: ColorSpace::DeviceGray,
        coords,
        domain: [0.0, 1.0],
        extend,
        functions: vec![Rc::new(ExponentialFunction::identity())],
        bbox: None,
    };
    RadialPattern::new(&shading, &Matrix::identity(), &gray_pipeline()).unwrap()
}

fn rgb(c: [u8; 3]) -> [u8; MAX_COLOR_COMPS] {
    let mut out = [0u8; MAX_COLOR_COMPS];
    out[..3].copy_from_slice(&c);
    out
}

// ============================================================================
// Blend Mode Property Tests
// ============================================================================

const SYMMETRIC_MODES: [BlendMode; 6] = [
    BlendMode::Multiply,
    BlendMode::Screen,
    BlendMode::Darken,
    BlendMode::Lighten,
    BlendMode::Difference,
    BlendMode::Exclusion,
];

/// Property: the symmetric separable modes do not care which side is the
/// source
proptest! {
    #[test]
    fn prop_symmetric_blend_modes_commute(
        a in prop::array::uniform3(any::<u8>()),
        b in prop::array::uniform3(any::<u8>()),
        which in 0usize..SYMMETRIC_MODES.len(),
    ) {
        let mode = SYMMETRIC_MODES[which];
        let (src, dest) = (rgb(a), rgb(b));
        let mut ab = [0u8; MAX_COLOR_COMPS];
        let mut ba = [0u8; MAX_COLOR_COMPS];
        mode.apply(&src, &dest, &mut ab, ColorMode::Rgb8);
        mode.apply(&dest, &src, &mut ba, ColorMode::Rgb8);
        prop_assert_eq!(ab, ba);
    }
}

/// Property: subtractive canvases blend with the same symmetry
proptest! {
    #[test]
    fn prop_symmetric_blend_modes_commute_cmyk(
        a in prop::array::uniform4(any::<u8>()),
        b in prop::array::uniform4(any::<u8>()),
        which in 0usize..SYMMETRIC_MODES.len(),
    ) {
        let mode = SYMMETRIC_MODES[which];
        let mut src = [0u8; MAX_COLOR_COMPS];
        let mut dest = [0u8; MAX_COLOR_COMPS];
        src[..4].copy_from_slice(&a);
        dest[..4].copy_from_slice(&b);
        let mut ab = [0u8; MAX_COLOR_COMPS];
        let mut ba = [0u8; MAX_COLOR_COMPS];
        mode.apply(&src, &dest, &mut ab, ColorMode::Cmyk8);
        mode.apply(&dest, &src, &mut ba, ColorMode::Cmyk8);
        prop_assert_eq!(ab, ba);
    }
}

/// Property: Normal returns the source untouched
proptest! {
    #[test]
    fn prop_normal_blend_is_source(a in prop::array::uniform3(any::<u8>()), b in prop::array::uniform3(any::<u8>())) {
        let mut out = [0u8; MAX_COLOR_COMPS];
        BlendMode::Normal.apply(&rgb(a), &rgb(b), &mut out, ColorMode::Rgb8);
        prop_assert_eq!(out, rgb(a));
    }
}

/// Property: the fast division matches rounded division on byte products
proptest! {
    #[test]
    fn prop_div255_rounds(a in any::<u8>(), b in any::<u8>()) {
        let x = a as u32 * b as u32;
        let expected = ((x as f64) / 255.0).round() as u8;
        prop_assert_eq!(div255(x), expected);
    }
}

// ============================================================================
// Shading Property Tests
// ============================================================================

/// Property: the axial parameter is exactly the domain bound at each axis
/// endpoint
proptest! {
    #[test]
    fn prop_axial_endpoints_exact(
        x0 in -100.0f64..100.0, y0 in -100.0f64..100.0,
        dx in 1.0f64..50.0, dy in -50.0f64..50.0,
        t0 in -10.0f64..10.0, span in 0.1f64..10.0,
    ) {
        let t1 = t0 + span;
        let shading = AxialShading {
            color_space: ColorSpace::DeviceGray,
            coords: [x0, y0, x0 + dx, y0 + dy],
            domain: [t0, t1],
            extend: [false, false],
            functions: vec![Rc::new(ExponentialFunction::identity())],
            bbox: None,
        };
        let pattern = AxialPattern::new(&shading, &Matrix::identity(), &gray_pipeline()).unwrap();
        prop_assert_eq!(pattern.parameter(x0, y0), Some(t0));
        prop_assert_eq!(pattern.parameter(x0 + dx, y0 + dy), Some(t1));
    }
}

/// Property: for two disjoint circles, a point strictly inside either one
/// is reached by exactly one circle of the sweep from s = 0 to s = 1
proptest! {
    #[test]
    fn prop_radial_single_root_inside_end_circles(
        r0 in 0.5f64..5.0, r1 in 0.5f64..5.0, gap in 0.5f64..20.0,
        f in -0.9f64..0.9, angle in 0.0f64..std::f64::consts::TAU, at_end in any::<bool>(),
    ) {
        let d = r0 + r1 + gap;
        let pattern = radial([0.0, 0.0, r0, d, 0.0, r1], [false, false]);
        let (cx, r) = if at_end { (d, r1) } else { (0.0, r0) };
        let (x, y) = (cx + f * r * angle.cos(), f * r * angle.sin());
        let (hi, lo) = pattern.roots(x, y).unwrap();
        prop_assert!(hi >= lo);
        let in_sweep = [hi, lo].iter().filter(|s| (0.0..=1.0).contains(*s)).count();
        prop_assert_eq!(in_sweep, 1, "roots {} {}", hi, lo);
        let t = pattern.parameter(x, y).unwrap();
        prop_assert!((0.0..=1.0).contains(&t));
    }
}

/// Property: every root returned lies on the matching interpolated circle
proptest! {
    #[test]
    fn prop_radial_roots_satisfy_circle(
        r0 in 0.5f64..5.0, r1 in 0.5f64..5.0, gap in 0.5f64..20.0,
        x in -10.0f64..40.0, y in -10.0f64..10.0,
    ) {
        let d = r0 + r1 + gap;
        let pattern = radial([0.0, 0.0, r0, d, 0.0, r1], [true, true]);
        if let Some((hi, lo)) = pattern.roots(x, y) {
            for s in [hi, lo] {
                let (cx, r) = (s * d, r0 + s * (r1 - r0));
                let lhs = (x - cx).powi(2) + y * y;
                prop_assert!((lhs - r * r).abs() < 1e-6 * (1.0 + lhs), "s = {}", s);
            }
        }
    }
}

/// Property: concentric equal circles paint one constant color inside
proptest! {
    #[test]
    fn prop_radial_concentric_equal_circles_constant(
        cx in -50.0f64..50.0, cy in -50.0f64..50.0, r in 1.0f64..20.0,
        f in 0.0f64..0.99, angle in 0.0f64..std::f64::consts::TAU,
    ) {
        let pattern = radial([cx, cy, r, cx, cy, r], [false, false]);
        let (x, y) = (cx + f * r * angle.cos(), cy + f * r * angle.sin());
        prop_assert_eq!(pattern.parameter(x, y), Some(0.0));
        prop_assert_eq!(pattern.parameter(cx + 3.0 * r, cy), None);
    }
}

// ============================================================================
// Tiling and Group Geometry Property Tests
// ============================================================================

/// Property: a planned tiling cell never exceeds the pixel ceiling
proptest! {
    #[test]
    fn prop_tiling_cell_under_ceiling(
        w in 1.0f64..100.0, h in 1.0f64..100.0,
        scale in 0.01f64..100_000.0, max_pixels in 1024usize..0x80_0000,
    ) {
        let params = TilingParams {
            bbox: Rect::new(0.0, 0.0, w, h),
            x_step: w,
            y_step: h,
            matrix: Matrix::identity(),
            paint_type: PaintType::Colored,
        };
        let ctm = Matrix([scale, 0.0, 0.0, scale, 0.0, 0.0]);
        let plan = plan_cell(&params, &ctm, TileRange::new(0, 0, 100, 100), max_pixels).unwrap();
        prop_assert!(plan.width * plan.height <= max_pixels);
        prop_assert!(plan.width >= 1 && plan.height >= 1);
        prop_assert_eq!(plan.fast_blit, plan.halvings == 0);
    }
}

/// Property: a group region is never empty and always on the canvas
proptest! {
    #[test]
    fn prop_group_region_inside_canvas(
        x0 in -1.0e6f64..1.0e6, y0 in -1.0e6f64..1.0e6,
        w in 0.0f64..1.0e6, h in 0.0f64..1.0e6,
    ) {
        let canvas = Canvas::new(32, 24, ColorMode::Mono8, 1, true, false).unwrap();
        let ctx = RenderContext::new(canvas, false);
        let region = TransparencyEngine::group_region(&ctx, &Rect::new(x0, y0, x0 + w, y0 + h));
        prop_assert!(!region.is_empty());
        let page = ctx.page_bounds();
        prop_assert_eq!(region.intersect(&page), region);
    }
}
