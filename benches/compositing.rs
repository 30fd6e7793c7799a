/// Benchmarks for the compositing paths
///
/// Run with: cargo bench
use std::rc::Rc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pdf_x_raster::core::{Matrix, Rect};
use pdf_x_raster::rendering::{
    AxialShading, BlendMode, ColorMode, ColorSpace, ExponentialFunction, FontId, GraphicsState, OutputDevice,
    PaintType, RasterDevice, RasterOptions, TileRange, TilingParams,
};
use smallvec::smallvec;

const PAGE: f64 = 612.0;

fn page_device(mode: ColorMode, type3_cache: bool) -> RasterDevice {
    let options = RasterOptions {
        color_mode: mode,
        paper_color: Some(mode.white()),
        type3_cache,
        ..Default::default()
    };
    let mut dev = RasterDevice::new(options).unwrap();
    dev.start_page(PAGE, PAGE).unwrap();
    dev
}

fn rect_fill(x: f64, y: f64, w: f64, h: f64, opacity: f64) -> GraphicsState {
    let mut state = GraphicsState::default();
    state.path.rect(x, y, w, h);
    state.fill_color_space = ColorSpace::DeviceRgb;
    state.fill_color = smallvec![0.2, 0.4, 0.8];
    state.fill_opacity = opacity;
    state
}

/// Benchmark opaque and translucent rectangle fills per color mode
fn benchmark_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");
    group.throughput(Throughput::Elements((PAGE * PAGE) as u64));

    for mode in [ColorMode::Mono8, ColorMode::Rgb8, ColorMode::Cmyk8] {
        for opacity in [1.0, 0.5] {
            let id = format!("{:?}/alpha={}", mode, opacity);
            group.bench_with_input(BenchmarkId::from_parameter(id), &(mode, opacity), |b, &(mode, opacity)| {
                let mut dev = page_device(mode, true);
                let state = rect_fill(0.0, 0.0, PAGE, PAGE, opacity);
                dev.update_all(&state);
                b.iter(|| dev.fill(black_box(&state)));
            });
        }
    }

    group.finish();
}

/// Benchmark a full-page group composited with a separable and a
/// non-separable blend mode
fn benchmark_group_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("transparency_group");
    let whole = Rect::new(0.0, 0.0, PAGE, PAGE);

    for blend in [BlendMode::Normal, BlendMode::Multiply, BlendMode::Luminosity] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", blend)), &blend, |b, &blend| {
            let mut dev = page_device(ColorMode::Rgb8, true);
            let base = GraphicsState::default();
            let inner = rect_fill(100.0, 100.0, 400.0, 400.0, 0.7);
            let mut paint = GraphicsState::default();
            paint.blend_mode = blend;
            b.iter(|| {
                dev.begin_transparency_group(&base, &whole, None, true, false, false);
                dev.update_all(&inner);
                dev.fill(&inner);
                dev.end_transparency_group(&base);
                dev.update_all(&paint);
                dev.paint_transparency_group(&paint, black_box(&whole));
            });
        });
    }

    group.finish();
}

/// Benchmark an axial shading filling the page
fn benchmark_axial(c: &mut Criterion) {
    let mut group = c.benchmark_group("shading");
    group.throughput(Throughput::Elements((PAGE * PAGE) as u64));

    let shading = AxialShading {
        color_space: ColorSpace::DeviceGray,
        coords: [0.0, 0.0, PAGE, PAGE],
        domain: [0.0, 1.0],
        extend: [true, true],
        functions: vec![Rc::new(ExponentialFunction::identity())],
        bbox: None,
    };
    group.bench_function("axial", |b| {
        let mut dev = page_device(ColorMode::Rgb8, true);
        let state = GraphicsState::default();
        dev.update_all(&state);
        b.iter(|| dev.axial_shaded_fill(&state, black_box(&shading)));
    });

    group.finish();
}

/// Benchmark native tiling fills, with and without a fast blit
fn benchmark_tiling(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiling");

    for (name, matrix) in [
        ("axis_aligned", Matrix::identity()),
        ("rotated", Matrix([0.8, 0.6, -0.6, 0.8, 0.0, 0.0])),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &matrix, |b, matrix| {
            let mut dev = page_device(ColorMode::Rgb8, true);
            let state = rect_fill(0.0, 0.0, PAGE, PAGE, 1.0);
            dev.update_all(&state);
            let params = TilingParams {
                bbox: Rect::new(0.0, 0.0, 24.0, 24.0),
                x_step: 24.0,
                y_step: 24.0,
                matrix: *matrix,
                paint_type: PaintType::Colored,
            };
            let tiles = TileRange::new(-40, -40, 40, 40);
            b.iter(|| {
                let mut painter = |dev: &mut dyn OutputDevice, cell: &GraphicsState| {
                    let mut s = cell.clone();
                    s.path.rect(2.0, 2.0, 12.0, 12.0);
                    dev.fill(&s);
                };
                dev.tiling_pattern_fill(&state, black_box(&params), tiles, &mut painter)
            });
        });
    }

    group.finish();
}

/// Benchmark Type 3 text with the glyph cache on and off
fn benchmark_type3(c: &mut Criterion) {
    let mut group = c.benchmark_group("type3_glyphs");
    let font_bbox = Rect::new(0.0, 0.0, 1.0, 1.0);

    for cache in [true, false] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("cache={}", cache)), &cache, |b, &cache| {
            let mut dev = page_device(ColorMode::Rgb8, cache);
            let mut state = GraphicsState::default();
            state.font = Some(FontId::new(3, 0));
            dev.update_all(&state);
            b.iter(|| {
                for i in 0..100 {
                    state.ctm = Matrix([12.0, 0.0, 0.0, 12.0, 6.0 * (i % 90) as f64 + 0.3, 12.0 * (i / 90) as f64]);
                    if dev.begin_type3_char(&state, 65 + (i % 26), Some(&font_bbox)) {
                        continue;
                    }
                    dev.type3_d1(&state, 0.6, 0.0, 0.0, 0.0, 1.0, 1.0);
                    let mut glyph = state.clone();
                    glyph.path.rect(0.1, 0.1, 0.5, 0.8);
                    dev.fill(&glyph);
                    dev.end_type3_char(&state);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fill,
    benchmark_group_composite,
    benchmark_axial,
    benchmark_tiling,
    benchmark_type3
);
criterion_main!(benches);
