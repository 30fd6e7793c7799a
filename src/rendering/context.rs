//! The compositor: one canvas plus the paint state that governs how new
//! marks land on it.
//!
//! Every coordinate that crosses this API is in page device space. A
//! context whose canvas covers only part of the page (a transparency
//! group, a pattern cell) records where its canvas origin sits, so paths,
//! patterns, clips and soft masks never need to be re-expressed when a
//! nested context is created.
//!
//! Coverage comes from the scan converter as 8-bit masks; the pixel
//! arithmetic (shape, source alpha, blending, overprint, transfer) is done
//! here.

use std::rc::Rc;

use log::{trace, warn};

use super::blend::{BlendMode, div255};
use super::canvas::{Canvas, ColorMode, DeviceColor, MAX_COLOR_COMPS};
use super::color::{OverprintMask, TransferTables};
use super::graphics_state::{FillRule, LineCap, LineJoin, StrokeProps};
use super::path::Path;
use super::pattern::{Pattern, PatternRef, SolidPattern};
use crate::core::error::{RasterError, RasterResult};
use crate::core::geometry::{Matrix, PixelRect};

#[inline]
fn mul8(a: u8, b: u8) -> u8 {
    div255(a as u32 * b as u32)
}

/// Opacity in `[0, 1]` as a byte.
#[inline]
pub fn opacity_byte(a: f64) -> u8 {
    (a.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

fn to_skia_fill_rule(rule: FillRule) -> tiny_skia::FillRule {
    match rule {
        FillRule::NonZero => tiny_skia::FillRule::Winding,
        FillRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
    }
}

fn to_skia_line_cap(cap: LineCap) -> tiny_skia::LineCap {
    match cap {
        LineCap::Butt => tiny_skia::LineCap::Butt,
        LineCap::Round => tiny_skia::LineCap::Round,
        LineCap::ProjectingSquare => tiny_skia::LineCap::Square,
    }
}

fn to_skia_line_join(join: LineJoin) -> tiny_skia::LineJoin {
    match join {
        LineJoin::Miter => tiny_skia::LineJoin::Miter,
        LineJoin::Round => tiny_skia::LineJoin::Round,
        LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
    }
}

/// 8-bit coverage over a pixel rectangle of the page.
#[derive(Debug, Clone)]
pub struct CoverageMask {
    x0: i32,
    y0: i32,
    mask: tiny_skia::Mask,
}

impl CoverageMask {
    /// Scan-convert a device-space path, restricted to `limit`. Returns
    /// `None` when nothing of the path falls inside.
    pub fn rasterize(
        path: &tiny_skia::Path,
        rule: FillRule,
        antialias: bool,
        limit: PixelRect,
    ) -> Option<CoverageMask> {
        let b = path.bounds();
        let region = PixelRect::new(
            b.left().floor() as i32 - 1,
            b.top().floor() as i32 - 1,
            b.right().ceil() as i32 + 1,
            b.bottom().ceil() as i32 + 1,
        )
        .intersect(&limit);
        if region.is_empty() {
            return None;
        }
        let mut mask = tiny_skia::Mask::new(region.width() as u32, region.height() as u32)?;
        let ts = tiny_skia::Transform::from_translate(-region.x0 as f32, -region.y0 as f32);
        mask.fill_path(path, to_skia_fill_rule(rule), antialias, ts);
        Some(CoverageMask {
            x0: region.x0,
            y0: region.y0,
            mask,
        })
    }

    /// Coverage from a bitmap laid out row by row, one byte per pixel.
    pub fn from_bytes(x0: i32, y0: i32, width: usize, height: usize, data: &[u8]) -> Option<CoverageMask> {
        let mut mask = tiny_skia::Mask::new(width as u32, height as u32)?;
        let n = width * height;
        if data.len() < n {
            return None;
        }
        mask.data_mut().copy_from_slice(&data[..n]);
        Some(CoverageMask { x0, y0, mask })
    }

    pub fn region(&self) -> PixelRect {
        PixelRect::new(
            self.x0,
            self.y0,
            self.x0 + self.mask.width() as i32,
            self.y0 + self.mask.height() as i32,
        )
    }

    /// Coverage at a page pixel; zero outside the mask.
    #[inline]
    pub fn value(&self, x: i32, y: i32) -> u8 {
        let (mx, my) = (x - self.x0, y - self.y0);
        let (w, h) = (self.mask.width() as i32, self.mask.height() as i32);
        if mx < 0 || my < 0 || mx >= w || my >= h {
            return 0;
        }
        self.mask.data()[(my * w + mx) as usize]
    }
}

/// The clip: a pixel rectangle intersected with any number of path masks.
#[derive(Debug, Clone)]
pub struct Clip {
    rect: PixelRect,
    masks: Vec<Rc<CoverageMask>>,
}

impl Clip {
    pub fn new(rect: PixelRect) -> Self {
        Clip {
            rect,
            masks: Vec::new(),
        }
    }

    /// Bounding rectangle of everything the clip lets through.
    pub fn bounds(&self) -> PixelRect {
        self.rect
    }

    pub fn is_rectangular(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn intersect_rect(&mut self, r: &PixelRect) {
        self.rect = self.rect.intersect(r);
    }

    pub fn intersect_mask(&mut self, mask: CoverageMask) {
        self.rect = self.rect.intersect(&mask.region());
        self.masks.push(Rc::new(mask));
    }

    #[inline]
    pub fn value(&self, x: i32, y: i32) -> u8 {
        if !self.rect.contains(x, y) {
            return 0;
        }
        let mut v = 255u8;
        for m in &self.masks {
            v = mul8(v, m.value(x, y));
            if v == 0 {
                break;
            }
        }
        v
    }
}

/// A Mono8 canvas whose gray levels scale the shape of every paint.
#[derive(Debug, Clone)]
pub struct SoftMask {
    canvas: Rc<Canvas>,
    x0: i32,
    y0: i32,
}

impl SoftMask {
    pub fn new(canvas: Canvas, x0: i32, y0: i32) -> Self {
        SoftMask {
            canvas: Rc::new(canvas),
            x0,
            y0,
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    #[inline]
    pub fn value(&self, x: i32, y: i32) -> u8 {
        let (mx, my) = (x - self.x0, y - self.y0);
        if !self.canvas.contains(mx, my) {
            return 0;
        }
        self.canvas.pixel(mx, my)[0]
    }
}

/// Everything that decides how a mark is composited, saved and restored
/// with the graphics state.
#[derive(Debug, Clone)]
pub struct PaintState {
    pub fill_pattern: PatternRef,
    pub stroke_pattern: PatternRef,
    pub fill_alpha: f64,
    pub stroke_alpha: f64,
    pub blend_mode: BlendMode,
    pub soft_mask: Option<SoftMask>,
    pub clip: Clip,
    pub fill_overprint: OverprintMask,
    pub stroke_overprint: OverprintMask,
    /// `None` is the identity transfer
    pub transfer: Option<Rc<TransferTables>>,
}

impl PaintState {
    fn new(mode: ColorMode, clip: Clip) -> Self {
        let black: PatternRef = Rc::new(SolidPattern::new(black(mode), mode.is_subtractive()));
        PaintState {
            fill_pattern: black.clone(),
            stroke_pattern: black,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            blend_mode: BlendMode::Normal,
            soft_mask: None,
            clip,
            fill_overprint: OverprintMask::ALL,
            stroke_overprint: OverprintMask::ALL,
            transfer: None,
        }
    }
}

/// Device black for a color mode.
pub fn black(mode: ColorMode) -> DeviceColor {
    let mut c = [0u8; MAX_COLOR_COMPS];
    if mode.is_subtractive() {
        c[3] = 255;
    }
    c
}

/// How a finished group canvas is painted back.
#[derive(Debug, Clone, Copy)]
pub struct GroupComposite<'a> {
    /// The group started as a copy of this context's pixels
    pub non_isolated: bool,
    /// Set when the destination is a knockout group
    pub knockout: Option<Knockout<'a>>,
    /// Per-pixel shape of the group's marks, row-major at the group
    /// canvas width. Pixels outside it leave the destination alone.
    pub shape: Option<&'a [u8]>,
}

impl GroupComposite<'static> {
    /// Plain source-over compositing, as for an isolated group or a tile.
    pub const OVER: Self = GroupComposite {
        non_isolated: false,
        knockout: None,
        shape: None,
    };
}

/// Knockout parameters: marks replace the initial backdrop rather than
/// the current destination.
#[derive(Debug, Clone, Copy)]
pub struct Knockout<'a> {
    /// Initial backdrop in this context's canvas coordinates; `None` is
    /// fully transparent
    pub backdrop: Option<&'a Canvas>,
    pub opacity: f64,
}

/// Source-over compositing of one pixel with the separable blend
/// correction, overprint selection and additive spot handling.
pub fn mix(
    mode: ColorMode,
    blend: BlendMode,
    src: &DeviceColor,
    a_src: u8,
    dest: &DeviceColor,
    a_dest: u8,
    overprint: OverprintMask,
) -> (DeviceColor, u8) {
    if a_src == 0 {
        return (*dest, a_dest);
    }
    let n = mode.components();
    let mut s = *src;
    if blend != BlendMode::Normal && a_dest != 0 {
        let mut b = [0u8; MAX_COLOR_COMPS];
        blend.apply(src, dest, &mut b, mode);
        let ad = a_dest as u32;
        for i in 0..n {
            s[i] = div255((255 - ad) * src[i] as u32 + ad * b[i] as u32);
        }
    }
    let (a_s, a_d) = (a_src as u32, a_dest as u32);
    let a_result = a_s + a_d - div255(a_s * a_d) as u32;
    let mut out = *dest;
    for i in 0..n {
        if !overprint.includes(i) {
            continue;
        }
        out[i] = if overprint.additive {
            (dest[i] as u32 + div255(a_s * s[i] as u32) as u32).min(255) as u8
        } else {
            let num = (a_result - a_s) * dest[i] as u32 + a_s * s[i] as u32;
            ((num + a_result / 2) / a_result) as u8
        };
    }
    (out, a_result as u8)
}

#[inline]
fn lerp8(a: u8, b: u8, w: u8) -> u8 {
    let (a, b, w) = (a as u32, b as u32, w as u32);
    div255(a * (255 - w) + b * w)
}

/// Union of two shape values.
#[inline]
fn union8(a: u8, b: u8) -> u8 {
    (a as u32 + b as u32 - div255(a as u32 * b as u32) as u32) as u8
}

/// A canvas, its page position, and the paint state stack.
#[derive(Debug)]
pub struct RenderContext {
    canvas: Canvas,
    x0: i32,
    y0: i32,
    /// Sub-pixel translation added to every incoming transform
    shift: (f64, f64),
    antialias: bool,
    state: PaintState,
    saved: Vec<PaintState>,
    /// Accumulated shape of every mark, when tracked
    shape: Option<Vec<u8>>,
}

impl RenderContext {
    /// A context for a whole page: canvas origin at the page origin and a
    /// clip covering the canvas.
    pub fn new(canvas: Canvas, antialias: bool) -> Self {
        Self::at(canvas, 0, 0, antialias)
    }

    /// A context whose canvas origin sits at page pixel `(x0, y0)`.
    pub fn at(canvas: Canvas, x0: i32, y0: i32, antialias: bool) -> Self {
        let mode = canvas.mode();
        let b = canvas.bounds();
        let clip = Clip::new(PixelRect::new(x0, y0, x0 + b.x1, y0 + b.y1));
        RenderContext {
            canvas,
            x0,
            y0,
            shift: (0.0, 0.0),
            antialias,
            state: PaintState::new(mode, clip),
            saved: Vec::new(),
            shape: None,
        }
    }

    /// A context for a nested canvas that inherits clip, paint sources and
    /// sub-pixel shift from `parent`. Opacity, blend mode and soft mask
    /// start fresh.
    pub fn nested(canvas: Canvas, x0: i32, y0: i32, parent: &RenderContext) -> Self {
        let mut ctx = Self::at(canvas, x0, y0, parent.antialias);
        ctx.shift = parent.shift;
        let own = ctx.state.clip.bounds();
        let parent = &parent.state;
        ctx.state = PaintState {
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            blend_mode: BlendMode::Normal,
            soft_mask: None,
            ..parent.clone()
        };
        ctx.state.clip.intersect_rect(&own);
        ctx
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn into_canvas(self) -> Canvas {
        self.canvas
    }

    /// Start recording which pixels get marked.
    pub fn track_shape(&mut self) {
        self.shape = Some(vec![0; self.canvas.width() * self.canvas.height()]);
    }

    pub fn tracks_shape(&self) -> bool {
        self.shape.is_some()
    }

    pub fn take_shape(&mut self) -> Option<Vec<u8>> {
        self.shape.take()
    }

    /// Swap in a different canvas, returning the old one.
    pub fn replace_canvas(&mut self, canvas: Canvas) -> Canvas {
        self.shape = None;
        std::mem::replace(&mut self.canvas, canvas)
    }

    pub fn origin(&self) -> (i32, i32) {
        (self.x0, self.y0)
    }

    /// Canvas extent in page device space.
    pub fn page_bounds(&self) -> PixelRect {
        let b = self.canvas.bounds();
        PixelRect::new(self.x0, self.y0, self.x0 + b.x1, self.y0 + b.y1)
    }

    pub fn shift(&self) -> (f64, f64) {
        self.shift
    }

    pub fn set_shift(&mut self, dx: f64, dy: f64) {
        self.shift = (dx, dy);
    }

    /// An incoming page transform with this context's shift applied.
    pub fn adjust(&self, ctm: &Matrix) -> Matrix {
        ctm.post_translate(self.shift.0, self.shift.1)
    }

    pub fn antialias(&self) -> bool {
        self.antialias
    }

    pub fn set_antialias(&mut self, on: bool) {
        self.antialias = on;
    }

    pub fn state(&self) -> &PaintState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PaintState {
        &mut self.state
    }

    pub fn save(&mut self) {
        self.saved.push(self.state.clone());
    }

    pub fn restore(&mut self) -> RasterResult<()> {
        match self.saved.pop() {
            Some(s) => {
                self.state = s;
                Ok(())
            }
            None => Err(RasterError::StateViolation("restore without matching save".into())),
        }
    }

    pub fn save_depth(&self) -> usize {
        self.saved.len()
    }

    /// Pixels a paint may touch: the canvas intersected with the clip.
    pub fn paint_bounds(&self) -> PixelRect {
        self.page_bounds().intersect(&self.state.clip.bounds())
    }

    /// Core paint loop. `source` yields the color and coverage of each
    /// page pixel in `region`, or `None` where nothing is painted.
    pub fn paint_pixels<F>(&mut self, region: PixelRect, alpha: f64, overprint: OverprintMask, mut source: F)
    where
        F: FnMut(i32, i32) -> Option<(DeviceColor, u8)>,
    {
        let r = region.intersect(&self.paint_bounds());
        if r.is_empty() {
            return;
        }
        let mode = self.canvas.mode();
        let a_in = opacity_byte(alpha);
        let state = &self.state;
        let width = self.canvas.width();
        let canvas = &mut self.canvas;
        let mut marks = self.shape.as_mut();
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                let clip = state.clip.value(x, y);
                if clip == 0 {
                    continue;
                }
                let Some((mut color, coverage)) = source(x, y) else {
                    continue;
                };
                let mut shape = mul8(coverage, clip);
                if let Some(sm) = &state.soft_mask {
                    shape = mul8(shape, sm.value(x, y));
                }
                if shape == 0 {
                    continue;
                }
                if let Some(t) = &state.transfer {
                    t.apply(&mut color, mode);
                }
                let (cx, cy) = (x - self.x0, y - self.y0);
                let (dest, a_dest) = (canvas.pixel(cx, cy), canvas.alpha(cx, cy));
                let (out, a_out) = mix(
                    mode,
                    state.blend_mode,
                    &color,
                    mul8(a_in, shape),
                    &dest,
                    a_dest,
                    overprint,
                );
                canvas.set_pixel(cx, cy, &out);
                canvas.set_alpha(cx, cy, a_out);
                if let Some(m) = marks.as_deref_mut().and_then(|m| m.get_mut(cy as usize * width + cx as usize)) {
                    *m = union8(*m, shape);
                }
            }
        }
    }

    /// Paint a coverage mask with a pattern.
    pub fn paint_mask(&mut self, mask: &CoverageMask, pattern: &dyn Pattern, alpha: f64, overprint: OverprintMask) {
        self.paint_pixels(mask.region(), alpha, overprint, |x, y| {
            let cov = mask.value(x, y);
            if cov == 0 {
                return None;
            }
            pattern.sample_with_alpha(x, y).map(|(c, a)| (c, mul8(cov, a)))
        });
    }

    fn device_fill_path(&self, path: &Path, ctm: &Matrix) -> Option<tiny_skia::Path> {
        path.transformed(&self.adjust(ctm)).to_skia(true)
    }

    /// Stroke outline in device space, dashed when the props say so.
    pub fn stroke_outline(path: &Path, ctm: &Matrix, props: &StrokeProps) -> Option<tiny_skia::Path> {
        let mut sk = path.to_skia(false)?;
        let ts = ctm.to_skia();
        let res_scale = tiny_skia::PathStroker::compute_resolution_scale(&ts);
        if !props.dash_array.is_empty() {
            let mut dashes: Vec<f32> = props.dash_array.iter().map(|&d| d.max(0.0) as f32).collect();
            if dashes.len() % 2 == 1 {
                dashes.extend_from_within(..);
            }
            if let Some(dash) = tiny_skia::StrokeDash::new(dashes, props.dash_offset as f32) {
                sk = sk.dash(&dash, res_scale)?;
            }
        }
        let mut width = props.line_width;
        let expansion = ctm.expansion();
        if width <= 0.0 && expansion > 0.0 {
            width = 1.0 / expansion;
        }
        let stroke = tiny_skia::Stroke {
            width: width as f32,
            miter_limit: props.miter_limit as f32,
            line_cap: to_skia_line_cap(props.line_cap),
            line_join: to_skia_line_join(props.line_join),
            dash: None,
        };
        sk.stroke(&stroke, res_scale)?.transform(ts)
    }

    /// Fill a user-space path. Returns false when nothing was rasterized.
    pub fn fill_path(&mut self, path: &Path, ctm: &Matrix, rule: FillRule) -> bool {
        let Some(sk) = self.device_fill_path(path, ctm) else {
            return false;
        };
        let Some(mask) = CoverageMask::rasterize(&sk, rule, self.antialias, self.paint_bounds()) else {
            return false;
        };
        let pattern = self.state.fill_pattern.clone();
        let (alpha, op) = (self.state.fill_alpha, self.state.fill_overprint);
        self.paint_mask(&mask, pattern.as_ref(), alpha, op);
        true
    }

    pub fn stroke_path(&mut self, path: &Path, ctm: &Matrix, props: &StrokeProps) -> bool {
        let Some(sk) = Self::stroke_outline(path, &self.adjust(ctm), props) else {
            trace!("stroke produced no outline");
            return false;
        };
        let Some(mask) = CoverageMask::rasterize(&sk, FillRule::NonZero, self.antialias, self.paint_bounds())
        else {
            return false;
        };
        let pattern = self.state.stroke_pattern.clone();
        let (alpha, op) = (self.state.stroke_alpha, self.state.stroke_overprint);
        self.paint_mask(&mask, pattern.as_ref(), alpha, op);
        true
    }

    /// Fill a device-space region with a pattern, limited by the clip.
    pub fn fill_region(&mut self, region: PixelRect, pattern: &dyn Pattern) {
        let (alpha, op) = (self.state.fill_alpha, self.state.fill_overprint);
        self.paint_pixels(region, alpha, op, |x, y| pattern.sample_with_alpha(x, y));
    }

    /// Paint a glyph or other coverage bitmap with the fill pattern.
    /// `(x0, y0)` is the bitmap's top-left page pixel.
    pub fn fill_coverage(&mut self, x0: i32, y0: i32, width: usize, height: usize, data: &[u8]) {
        let Some(mask) = CoverageMask::from_bytes(x0, y0, width, height, data) else {
            return;
        };
        let pattern = self.state.fill_pattern.clone();
        let (alpha, op) = (self.state.fill_alpha, self.state.fill_overprint);
        self.paint_mask(&mask, pattern.as_ref(), alpha, op);
    }

    /// Intersect the clip with a filled path.
    pub fn clip_to_path(&mut self, path: &Path, ctm: &Matrix, rule: FillRule) {
        let sk = self.device_fill_path(path, ctm);
        self.clip_to_device_path(sk.as_ref(), rule);
    }

    /// Intersect the clip with the area a stroke would cover.
    pub fn clip_to_stroke(&mut self, path: &Path, ctm: &Matrix, props: &StrokeProps) {
        let sk = Self::stroke_outline(path, &self.adjust(ctm), props);
        self.clip_to_device_path(sk.as_ref(), FillRule::NonZero);
    }

    pub fn clip_to_device_path(&mut self, path: Option<&tiny_skia::Path>, rule: FillRule) {
        let limit = self.state.clip.bounds();
        match path.and_then(|p| CoverageMask::rasterize(p, rule, self.antialias, limit)) {
            Some(mask) => self.state.clip.intersect_mask(mask),
            None => self.state.clip.intersect_rect(&PixelRect::new(0, 0, 0, 0)),
        }
    }

    /// Where an image with matrix `mat` (unit square to page device space,
    /// row 0 at `v = 0`) lands, with antialiased edges.
    pub fn place_image(&self, mat: &Matrix, width: usize, height: usize) -> Option<ImagePlacement> {
        if !mat.is_finite() || width == 0 || height == 0 {
            return None;
        }
        let mat = self.adjust(mat);
        let inverse = mat.invert()?;
        let mut unit = Path::new();
        unit.rect(0.0, 0.0, 1.0, 1.0);
        let sk = unit.transformed(&mat).to_skia(true)?;
        let edges = CoverageMask::rasterize(&sk, FillRule::NonZero, self.antialias, self.paint_bounds())?;
        Some(ImagePlacement {
            inverse,
            edges,
            width,
            height,
        })
    }

    /// Draw a device-mode image, honoring its alpha plane.
    pub fn draw_image(&mut self, image: &Canvas, mat: &Matrix) -> bool {
        let Some(place) = self.place_image(mat, image.width(), image.height()) else {
            return false;
        };
        let (alpha, op) = (self.state.fill_alpha, self.state.fill_overprint);
        self.paint_pixels(place.edges.region(), alpha, op, |x, y| {
            let cov = place.edges.value(x, y);
            if cov == 0 {
                return None;
            }
            let (col, row) = place.texel(x, y);
            let a = image.alpha(col, row);
            Some((image.pixel(col, row), mul8(cov, a)))
        });
        true
    }

    /// Paint the fill pattern through a Mono8 mask image stretched over
    /// the unit square (255 paints).
    pub fn fill_image_mask(&mut self, mask: &Canvas, mat: &Matrix) -> bool {
        let Some(place) = self.place_image(mat, mask.width(), mask.height()) else {
            return false;
        };
        let pattern = self.state.fill_pattern.clone();
        let (alpha, op) = (self.state.fill_alpha, self.state.fill_overprint);
        self.paint_pixels(place.edges.region(), alpha, op, |x, y| {
            let cov = place.edges.value(x, y);
            if cov == 0 {
                return None;
            }
            let (col, row) = place.texel(x, y);
            let m = mask.pixel(col, row)[0];
            if m == 0 {
                return None;
            }
            pattern
                .sample_with_alpha(x, y)
                .map(|(c, a)| (c, mul8(mul8(cov, m), a)))
        });
        true
    }

    /// Paint a finished group (or tile) canvas whose origin is at page
    /// pixel `(gx, gy)`.
    pub fn composite_group(&mut self, group: &Canvas, gx: i32, gy: i32, how: GroupComposite<'_>) {
        if group.mode() != self.canvas.mode() {
            warn!(
                "group canvas mode {:?} does not match destination {:?}",
                group.mode(),
                self.canvas.mode()
            );
            return;
        }
        let gb = group.bounds();
        let region = PixelRect::new(gx, gy, gx + gb.x1, gy + gb.y1).intersect(&self.paint_bounds());
        if region.is_empty() {
            return;
        }
        let mode = self.canvas.mode();
        let opacity = match &how.knockout {
            Some(k) => opacity_byte(k.opacity),
            None => opacity_byte(self.state.fill_alpha),
        };
        let n = mode.components();
        let state = &self.state;
        let width = self.canvas.width();
        let canvas = &mut self.canvas;
        let mut marks = self.shape.as_mut();
        for y in region.y0..region.y1 {
            for x in region.x0..region.x1 {
                let mut shape = state.clip.value(x, y);
                if let Some(sm) = &state.soft_mask {
                    shape = mul8(shape, sm.value(x, y));
                }
                if shape == 0 {
                    continue;
                }
                let (sx, sy) = (x - gx, y - gy);
                let (cx, cy) = (x - self.x0, y - self.y0);
                let a_group = group.alpha(sx, sy);
                let g_shape = match how.shape {
                    Some(sh) => sh.get(sy as usize * group.width() + sx as usize).copied().unwrap_or(0),
                    None => a_group,
                };
                if how.shape.is_some() && g_shape == 0 {
                    continue;
                }
                let src = group.pixel(sx, sy);
                let (dest, a_dest) = match &how.knockout {
                    Some(k) => {
                        if a_group == 0 {
                            continue;
                        }
                        match k.backdrop {
                            Some(b) => (b.pixel(cx, cy), b.alpha(cx, cy)),
                            None => ([0u8; MAX_COLOR_COMPS], 0),
                        }
                    }
                    None => (canvas.pixel(cx, cy), canvas.alpha(cx, cy)),
                };
                let weight = mul8(opacity, shape);
                let (out, a_out) = if how.non_isolated {
                    // Blend toward the group result, then keep the current
                    // pixel where the group left no marks.
                    let (cur, a_cur) = (canvas.pixel(cx, cy), canvas.alpha(cx, cy));
                    let f = if how.shape.is_some() { g_shape } else { 255 };
                    let mut out = dest;
                    for i in 0..n {
                        out[i] = lerp8(cur[i], lerp8(dest[i], src[i], weight), f);
                    }
                    (out, lerp8(a_cur, lerp8(a_dest, a_group, weight), f))
                } else {
                    mix(
                        mode,
                        state.blend_mode,
                        &src,
                        mul8(weight, a_group),
                        &dest,
                        a_dest,
                        OverprintMask::ALL,
                    )
                };
                canvas.set_pixel(cx, cy, &out);
                canvas.set_alpha(cx, cy, a_out);
                if let Some(m) = marks.as_deref_mut().and_then(|m| m.get_mut(cy as usize * width + cx as usize)) {
                    *m = union8(*m, mul8(shape, g_shape));
                }
            }
        }
    }
}

/// Device placement of an image: inverse transform plus edge coverage.
#[derive(Debug, Clone)]
pub struct ImagePlacement {
    inverse: Matrix,
    edges: CoverageMask,
    width: usize,
    height: usize,
}

impl ImagePlacement {
    pub fn region(&self) -> PixelRect {
        self.edges.region()
    }

    pub fn coverage(&self, x: i32, y: i32) -> u8 {
        self.edges.value(x, y)
    }

    /// Image column and row sampled by a page pixel's center.
    #[inline]
    pub fn texel(&self, x: i32, y: i32) -> (i32, i32) {
        let (u, v) = self.inverse.transform_point(x as f64 + 0.5, y as f64 + 0.5);
        let col = ((u * self.width as f64).floor() as i64).clamp(0, self.width as i64 - 1);
        let row = ((v * self.height as f64).floor() as i64).clamp(0, self.height as i64 - 1);
        (col as i32, row as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: u8) -> DeviceColor {
        let mut c = [0u8; MAX_COLOR_COMPS];
        c[0] = v;
        c
    }

    fn rgb(r: u8, g: u8, b: u8) -> DeviceColor {
        let mut c = [0u8; MAX_COLOR_COMPS];
        c[..3].copy_from_slice(&[r, g, b]);
        c
    }

    fn white_page(w: usize, h: usize, mode: ColorMode) -> RenderContext {
        let mut canvas = Canvas::new(w, h, mode, 1, true, false).unwrap();
        canvas.clear(&mode.white(), 255);
        RenderContext::new(canvas, false)
    }

    fn square(x: f64, y: f64, s: f64) -> Path {
        let mut p = Path::new();
        p.rect(x, y, s, s);
        p
    }

    #[test]
    fn test_mix_opaque_source_replaces() {
        let (c, a) = mix(
            ColorMode::Rgb8,
            BlendMode::Normal,
            &rgb(10, 20, 30),
            255,
            &rgb(200, 200, 200),
            255,
            OverprintMask::ALL,
        );
        assert_eq!(&c[..3], &[10, 20, 30]);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_mix_half_alpha_over_transparent() {
        let (c, a) = mix(
            ColorMode::Mono8,
            BlendMode::Normal,
            &gray(100),
            128,
            &gray(0),
            0,
            OverprintMask::ALL,
        );
        assert_eq!(c[0], 100);
        assert_eq!(a, 128);
    }

    #[test]
    fn test_mix_overprint_keeps_masked_components() {
        let op = OverprintMask {
            mask: 0x08,
            additive: false,
        };
        let src = [0, 0, 0, 200, 0, 0, 0, 0];
        let dest = [50, 60, 70, 10, 0, 0, 0, 0];
        let (c, _) = mix(ColorMode::Cmyk8, BlendMode::Normal, &src, 255, &dest, 255, op);
        assert_eq!(&c[..4], &[50, 60, 70, 200]);
    }

    #[test]
    fn test_mix_additive_clamps() {
        let op = OverprintMask {
            mask: 0x0f,
            additive: true,
        };
        let src = [200, 0, 0, 0, 0, 0, 0, 0];
        let dest = [100, 0, 0, 0, 0, 0, 0, 0];
        let (c, _) = mix(ColorMode::Cmyk8, BlendMode::Normal, &src, 255, &dest, 255, op);
        assert_eq!(c[0], 255);
    }

    #[test]
    fn test_fill_square() {
        let mut ctx = white_page(10, 10, ColorMode::Mono8);
        assert!(ctx.fill_path(&square(2.0, 2.0, 4.0), &Matrix::identity(), FillRule::NonZero));
        assert_eq!(ctx.canvas().pixel(3, 3)[0], 0);
        assert_eq!(ctx.canvas().pixel(7, 7)[0], 255);
        assert_eq!(ctx.canvas().pixel(1, 3)[0], 255);
    }

    #[test]
    fn test_clip_limits_fill() {
        let mut ctx = white_page(10, 10, ColorMode::Mono8);
        ctx.clip_to_path(&square(0.0, 0.0, 5.0), &Matrix::identity(), FillRule::NonZero);
        ctx.fill_path(&square(0.0, 0.0, 10.0), &Matrix::identity(), FillRule::NonZero);
        assert_eq!(ctx.canvas().pixel(2, 2)[0], 0);
        assert_eq!(ctx.canvas().pixel(7, 7)[0], 255);
    }

    #[test]
    fn test_save_restore_clip() {
        let mut ctx = white_page(10, 10, ColorMode::Mono8);
        ctx.save();
        ctx.clip_to_path(&square(0.0, 0.0, 2.0), &Matrix::identity(), FillRule::NonZero);
        ctx.restore().unwrap();
        ctx.fill_path(&square(0.0, 0.0, 10.0), &Matrix::identity(), FillRule::NonZero);
        assert_eq!(ctx.canvas().pixel(8, 8)[0], 0);
        assert!(ctx.restore().is_err());
    }

    #[test]
    fn test_stroke_marks_outline_only() {
        let mut ctx = white_page(20, 20, ColorMode::Mono8);
        let props = StrokeProps {
            line_width: 2.0,
            ..StrokeProps::default()
        };
        ctx.stroke_path(&square(4.0, 4.0, 12.0), &Matrix::identity(), &props);
        assert_eq!(ctx.canvas().pixel(4, 10)[0], 0);
        assert_eq!(ctx.canvas().pixel(10, 10)[0], 255);
    }

    #[test]
    fn test_nested_context_uses_page_coordinates() {
        let canvas = Canvas::new(4, 4, ColorMode::Mono8, 1, true, true).unwrap();
        let parent = white_page(10, 10, ColorMode::Mono8);
        let mut group = RenderContext::nested(canvas, 5, 5, &parent);
        group.fill_path(&square(5.0, 5.0, 2.0), &Matrix::identity(), FillRule::NonZero);
        assert_eq!(group.canvas().alpha(0, 0), 255);
        assert_eq!(group.canvas().alpha(3, 3), 0);
    }

    #[test]
    fn test_composite_isolated_group() {
        let mut ctx = white_page(4, 1, ColorMode::Mono8);
        let mut g = Canvas::new(2, 1, ColorMode::Mono8, 1, true, true).unwrap();
        g.set_pixel(0, 0, &gray(0));
        g.set_alpha(0, 0, 255);
        ctx.state_mut().fill_alpha = 0.5;
        ctx.composite_group(&g, 1, 0, GroupComposite::OVER);
        let p = ctx.canvas();
        assert_eq!(p.pixel(0, 0)[0], 255);
        assert_eq!(p.pixel(1, 0)[0], 127);
        assert_eq!(p.pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_knockout_replaces_backdrop() {
        let mut ctx = white_page(1, 1, ColorMode::Mono8);
        ctx.canvas_mut().set_pixel(0, 0, &gray(0));
        let backdrop = {
            let mut b = Canvas::new(1, 1, ColorMode::Mono8, 1, true, false).unwrap();
            b.clear(&gray(255), 255);
            b
        };
        let mut g = Canvas::new(1, 1, ColorMode::Mono8, 1, true, true).unwrap();
        g.set_pixel(0, 0, &gray(100));
        g.set_alpha(0, 0, 128);
        let how = GroupComposite {
            non_isolated: false,
            knockout: Some(Knockout {
                backdrop: Some(&backdrop),
                opacity: 1.0,
            }),
            shape: None,
        };
        ctx.composite_group(&g, 0, 0, how);
        // 100 at half alpha over the white backdrop, not over black
        assert_eq!(ctx.canvas().pixel(0, 0)[0], 177);
    }

    #[test]
    fn test_image_placement_rows() {
        let mut ctx = white_page(4, 4, ColorMode::Mono8);
        let mut img = Canvas::new(1, 2, ColorMode::Mono8, 1, true, false).unwrap();
        img.set_pixel(0, 0, &gray(0));
        img.set_pixel(0, 1, &gray(200));
        // First row lands at the top of the device rectangle.
        assert!(ctx.draw_image(&img, &Matrix([4.0, 0.0, 0.0, 4.0, 0.0, 0.0])));
        assert_eq!(ctx.canvas().pixel(1, 0)[0], 0);
        assert_eq!(ctx.canvas().pixel(1, 3)[0], 200);
    }

    #[test]
    fn test_soft_mask_scales_shape() {
        let mut ctx = white_page(2, 1, ColorMode::Mono8);
        let mut sm = Canvas::mono8(2, 1).unwrap();
        sm.set_pixel(0, 0, &gray(255));
        sm.set_pixel(1, 0, &gray(0));
        ctx.state_mut().soft_mask = Some(SoftMask::new(sm, 0, 0));
        ctx.fill_path(&square(0.0, 0.0, 2.0), &Matrix::identity(), FillRule::NonZero);
        assert_eq!(ctx.canvas().pixel(0, 0)[0], 0);
        assert_eq!(ctx.canvas().pixel(1, 0)[0], 255);
    }
}
