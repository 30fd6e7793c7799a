//! Software raster output device.
//!
//! `RasterDevice` owns the page canvas and everything needed to composite
//! onto it: the active [`RenderContext`], the color pipeline for the
//! current canvas mode, the Type 3 glyph cache and the transparency group
//! stack. Nested renders (transparency groups, Type 3 glyphs, tiling
//! cells) swap a new context in and keep the parent in an explicit frame,
//! so exactly one canvas is being drawn on at any time.

use std::mem;
use std::rc::Rc;

use log::{debug, warn};
use rustc_hash::FxHashMap;

#[cfg(feature = "debug-logging")]
use log::trace;

use super::blend::BlendMode;
use super::canvas::{Canvas, ColorMode, DeviceColor};
use super::color::{ColorPipeline, ColorSpace, GfxColor, TransferTables};
use super::context::{Clip, GroupComposite, RenderContext, SoftMask};
use super::device::{CellPainter, OutputDevice};
use super::font::{GlyphSource, TrueTypeFont};
use super::function::FunctionRef;
use super::glyph_cache::{FontCacheKey, GlyphBox, GlyphCache, GlyphRenderFrame, MAX_GLYPH_OFFSET};
use super::graphics_state::{FillRule, FontId, GraphicsState, TextRenderingMode};
use super::image::{
    ColorLookupTable, ImageColorMap, ImagePipeline, ImageSource, StencilSource, soft_mask_from_image, source_mode,
    stencil_bits, undo_matte,
};
use super::path::Path;
use super::pattern::{AxialPattern, FunctionPattern, GouraudPattern, PatternRef, RadialPattern, SolidPattern};
use super::shading::{AxialShading, FunctionShading, GouraudShading, RadialShading, ShadingKind};
use super::tiling::{PaintType, TileRange, TilingParams, TilingPattern, plan_cell};
use super::transparency::TransparencyEngine;
use crate::core::error::{RasterError, RasterResult};
use crate::core::geometry::{Matrix, PixelRect, Rect};

/// Default pixel budget for one tiling cell.
pub const DEFAULT_MAX_TILING_CELL_PIXELS: usize = 0x800000;

/// Tiling cells nested deeper than this are left to the interpreter.
const MAX_CELL_DEPTH: usize = 16;

/// Rendering options for [`RasterDevice`].
#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub color_mode: ColorMode,
    /// Rows are padded to a multiple of this many bytes
    pub row_pad: usize,
    /// Complement gray and RGB output
    pub reverse_video: bool,
    /// Color the page is cleared to, in `color_mode` bytes. `None` keeps
    /// an alpha channel on the page canvas instead.
    pub paper_color: Option<DeviceColor>,
    pub top_down: bool,
    /// Honor overprint settings when compositing
    pub overprint_preview: bool,
    pub vector_antialias: bool,
    /// Cache rendered Type 3 glyphs
    pub type3_cache: bool,
    pub max_tiling_cell_pixels: usize,
    pub skip_horizontal_text: bool,
    pub skip_rotated_text: bool,
    pub hdpi: f64,
    pub vdpi: f64,
}

impl Default for RasterOptions {
    fn default() -> Self {
        RasterOptions {
            color_mode: ColorMode::Rgb8,
            row_pad: 1,
            reverse_video: false,
            paper_color: Some(ColorMode::Rgb8.white()),
            top_down: true,
            overprint_preview: false,
            vector_antialias: true,
            type3_cache: true,
            max_tiling_cell_pixels: DEFAULT_MAX_TILING_CELL_PIXELS,
            skip_horizontal_text: false,
            skip_rotated_text: false,
            hdpi: 72.0,
            vdpi: 72.0,
        }
    }
}

/// What a pushed context belongs to, innermost last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nesting {
    Group,
    Glyph,
}

/// Device state set aside while one tiling cell renders.
#[derive(Debug)]
struct CellFrame {
    parent: RenderContext,
    pipeline: Option<ColorPipeline>,
    transparency: TransparencyEngine,
    nesting: Vec<Nesting>,
    text_clip: Option<Path>,
    image_mask_soft_masks: usize,
}

/// Unit square of an image to page device space, row 0 at the top.
fn image_matrix(ctm: &Matrix) -> Option<Matrix> {
    if !ctm.is_finite() {
        warn!("image skipped: non-finite transform");
        return None;
    }
    let [c0, c1, c2, c3, c4, c5] = ctm.0;
    Some(Matrix([c0, c1, -c2, -c3, c2 + c4, c3 + c5]))
}

/// Renders page content into a [`Canvas`].
#[derive(Debug)]
pub struct RasterDevice {
    options: RasterOptions,
    ctx: RenderContext,
    pipeline: ColorPipeline,
    /// Pipelines of enclosing groups that rendered in another mode
    saved_pipelines: Vec<ColorPipeline>,
    glyph_cache: GlyphCache,
    glyph_frames: Vec<GlyphRenderFrame>,
    transparency: TransparencyEngine,
    nesting: Vec<Nesting>,
    cell_frames: Vec<CellFrame>,
    fonts: FxHashMap<FontId, Rc<dyn GlyphSource>>,
    /// Glyph outlines in device space collected by clipping render modes
    text_clip: Option<Path>,
    /// Pending `set_soft_mask_from_image_mask` saves
    image_mask_soft_masks: usize,
}

impl RasterDevice {
    pub fn new(options: RasterOptions) -> RasterResult<Self> {
        let mode = options.color_mode;
        let canvas = Canvas::new(1, 1, mode, options.row_pad, options.top_down, options.paper_color.is_none())?;
        Ok(RasterDevice {
            ctx: RenderContext::new(canvas, options.vector_antialias),
            pipeline: ColorPipeline::new(mode, options.reverse_video, options.overprint_preview),
            saved_pipelines: Vec::new(),
            glyph_cache: GlyphCache::new(options.type3_cache),
            glyph_frames: Vec::new(),
            transparency: TransparencyEngine::new(),
            nesting: Vec::new(),
            cell_frames: Vec::new(),
            fonts: FxHashMap::default(),
            text_clip: None,
            image_mask_soft_masks: 0,
            options,
        })
    }

    pub fn options(&self) -> &RasterOptions {
        &self.options
    }

    /// The canvas currently drawn on.
    pub fn canvas(&self) -> &Canvas {
        self.ctx.canvas()
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn glyph_cache(&self) -> &GlyphCache {
        &self.glyph_cache
    }

    /// Hand the finished page canvas to the caller, leaving a 1x1
    /// placeholder behind.
    pub fn take_canvas(&mut self) -> Canvas {
        let placeholder = self.ctx.canvas().placeholder();
        self.ctx.replace_canvas(placeholder)
    }

    /// Register an outline source for a font the caller loaded itself.
    pub fn register_glyph_source(&mut self, id: FontId, source: Rc<dyn GlyphSource>) {
        self.fonts.insert(id, source);
    }

    fn new_pipeline(&self, mode: ColorMode) -> ColorPipeline {
        ColorPipeline::new(mode, self.options.reverse_video, self.options.overprint_preview)
    }

    fn subtractive(&self) -> bool {
        self.pipeline.mode().is_subtractive()
    }

    /// Copy newly registered spot colorants onto the current canvas.
    fn sync_separations(&mut self) {
        if self.pipeline.mode() != ColorMode::DeviceN8 {
            return;
        }
        if self.ctx.canvas().separations().len() != self.pipeline.separations().len() {
            let names = self.pipeline.separations().to_vec();
            self.ctx.canvas_mut().set_separations(names);
        }
    }

    fn solid(&mut self, space: &ColorSpace, color: &[f64]) -> PatternRef {
        let c = self.pipeline.device_color(space, color);
        self.sync_separations();
        Rc::new(SolidPattern::new(c, self.subtractive()))
    }

    fn sync_fill_overprint(&mut self, state: &GraphicsState) {
        let mask = self.pipeline.overprint_mask(
            &state.fill_color_space,
            state.fill_overprint,
            state.overprint_mode,
            Some(state.fill_color.as_slice()),
            false,
        );
        self.ctx.state_mut().fill_overprint = mask;
    }

    fn sync_stroke_overprint(&mut self, state: &GraphicsState) {
        let mask = self.pipeline.overprint_mask(
            &state.stroke_color_space,
            state.stroke_overprint,
            state.overprint_mode,
            Some(state.stroke_color.as_slice()),
            false,
        );
        self.ctx.state_mut().stroke_overprint = mask;
    }

    /// Whether glyphs with this orientation are suppressed.
    fn skips_text(&self, state: &GraphicsState) -> bool {
        let (skip_h, skip_r) = (self.options.skip_horizontal_text, self.options.skip_rotated_text);
        if !skip_h && !skip_r {
            return false;
        }
        let m = state.font_transform().0;
        let horizontal = m[0] > 0.0 && m[1].abs() < 0.001 && m[2].abs() < 0.001 && m[3] < 0.0;
        (skip_h && horizontal) || (skip_r && !horizontal)
    }

    fn push_pipeline(&mut self, mode: ColorMode) {
        let next = self.new_pipeline(mode);
        self.saved_pipelines.push(mem::replace(&mut self.pipeline, next));
    }

    fn pop_pipeline(&mut self) {
        match self.saved_pipelines.pop() {
            Some(p) => self.pipeline = p,
            None => warn!("color pipeline stack underflow"),
        }
    }

    fn abandon_group(&mut self) {
        if self.transparency.abandon(&mut self.ctx) {
            self.pop_pipeline();
        }
    }

    fn abandon_glyph(&mut self) {
        if let Some(frame) = self.glyph_frames.pop() {
            self.ctx = frame.parent;
        }
    }

    /// Close every nested context still open at this level, restoring the
    /// context that was current before the first of them.
    fn unwind_nesting(&mut self) {
        while let Some(kind) = self.nesting.pop() {
            match kind {
                Nesting::Group => self.abandon_group(),
                Nesting::Glyph => self.abandon_glyph(),
            }
        }
    }

    fn pop_group_marker(&mut self) {
        if self.nesting.last() == Some(&Nesting::Group) {
            self.nesting.pop();
        }
    }

    /// Fill with a shading pattern, limited to the shading's own box when
    /// it has one and to `region` (page pixels) otherwise.
    fn shaded_fill(
        &mut self,
        state: &GraphicsState,
        space: &ColorSpace,
        pattern: PatternRef,
        bbox: Option<&Rect>,
        region: Option<PixelRect>,
    ) {
        let overprint = self
            .pipeline
            .overprint_mask(space, state.fill_overprint, state.overprint_mode, None, false);
        self.ctx.save();
        {
            let paint = self.ctx.state_mut();
            paint.fill_pattern = pattern.clone();
            paint.fill_alpha = state.fill_opacity;
            paint.fill_overprint = overprint;
        }
        if let Some(b) = bbox {
            self.ctx.clip_to_path(&Path::from_rect(b), &state.ctm, FillRule::NonZero);
        }
        let bounds = self.ctx.paint_bounds();
        let region = region.map_or(bounds, |r| r.intersect(&bounds));
        self.ctx.fill_region(region, pattern.as_ref());
        if let Err(e) = self.ctx.restore() {
            warn!("shaded fill: {}", e);
        }
    }

    fn draw_decoded(
        &mut self,
        state: &GraphicsState,
        image: &ImageSource<'_>,
        lut: Option<&ColorLookupTable>,
        canvas: &Canvas,
        mat: &Matrix,
    ) {
        let gray_indexed = lut.is_some_and(|t| t.is_gray_indexed());
        let overprint = self.pipeline.overprint_mask(
            image.color_map.color_space(),
            state.fill_overprint,
            state.overprint_mode,
            None,
            gray_indexed,
        );
        self.ctx.state_mut().fill_overprint = overprint;
        self.ctx.draw_image(canvas, mat);
    }

    fn render_cell(
        &mut self,
        state: &GraphicsState,
        cell: Canvas,
        cell_matrix: &Matrix,
        uncolored: bool,
        painter: &mut dyn CellPainter,
    ) -> Canvas {
        let cell_ctx = RenderContext::new(cell, self.options.vector_antialias);
        let parent = mem::replace(&mut self.ctx, cell_ctx);
        let pipeline = uncolored.then(|| {
            let mono = self.new_pipeline(ColorMode::Mono8);
            mem::replace(&mut self.pipeline, mono)
        });
        self.cell_frames.push(CellFrame {
            parent,
            pipeline,
            transparency: mem::take(&mut self.transparency),
            nesting: mem::take(&mut self.nesting),
            text_clip: self.text_clip.take(),
            image_mask_soft_masks: mem::take(&mut self.image_mask_soft_masks),
        });

        let mut cell_state = state.clone();
        cell_state.ctm = *cell_matrix;
        cell_state.path = Path::new();
        cell_state.fill_opacity = 1.0;
        cell_state.stroke_opacity = 1.0;
        cell_state.blend_mode = BlendMode::Normal;
        if uncolored {
            // Stencil cells are drawn in black; coverage is recovered at blit time.
            cell_state.fill_color_space = ColorSpace::DeviceGray;
            cell_state.fill_color = GfxColor::from_slice(&[0.0]);
            cell_state.stroke_color_space = ColorSpace::DeviceGray;
            cell_state.stroke_color = GfxColor::from_slice(&[0.0]);
        }
        self.update_all(&cell_state);
        painter.paint_cell(self, &cell_state);

        if !self.nesting.is_empty() {
            warn!("tiling cell left {} nested contexts open", self.nesting.len());
            self.unwind_nesting();
        }
        let Some(frame) = self.cell_frames.pop() else {
            return self.ctx.canvas().placeholder();
        };
        let cell_ctx = mem::replace(&mut self.ctx, frame.parent);
        if let Some(p) = frame.pipeline {
            self.pipeline = p;
        }
        self.transparency = frame.transparency;
        self.nesting = frame.nesting;
        self.text_clip = frame.text_clip;
        self.image_mask_soft_masks = frame.image_mask_soft_masks;
        cell_ctx.into_canvas()
    }
}

impl OutputDevice for RasterDevice {
    fn upside_down(&self) -> bool {
        self.options.top_down
    }

    fn use_draw_char(&self) -> bool {
        true
    }

    fn use_tiling_pattern_fill(&self) -> bool {
        true
    }

    fn use_shaded_fills(&self, kind: ShadingKind) -> bool {
        matches!(
            kind,
            ShadingKind::Function
                | ShadingKind::Axial
                | ShadingKind::Radial
                | ShadingKind::FreeFormGouraud
                | ShadingKind::LatticeGouraud
        )
    }

    fn interpret_type3_chars(&self) -> bool {
        true
    }

    fn start_doc(&mut self) {
        self.glyph_cache.clear();
        self.fonts.clear();
    }

    fn start_page(&mut self, width: f64, height: f64) -> RasterResult<()> {
        if !(width.is_finite() && height.is_finite()) {
            return Err(RasterError::InvalidGeometry(format!("page size {}x{}", width, height)));
        }
        self.unwind_nesting();
        let w = ((width + 0.5) as usize).max(1);
        let h = ((height + 0.5) as usize).max(1);
        let mode = self.options.color_mode;
        let paper = self.options.paper_color;
        let mut canvas = Canvas::new(w, h, mode, self.options.row_pad, self.options.top_down, paper.is_none())?;
        match paper {
            Some(c) => canvas.clear(&c, 255),
            None => canvas.clear(&mode.white(), 0),
        }
        debug!("start page {}x{} {:?}", w, h, mode);
        self.pipeline = self.new_pipeline(mode);
        self.saved_pipelines.clear();
        self.transparency.reset();
        self.glyph_frames.clear();
        self.cell_frames.clear();
        self.text_clip = None;
        self.image_mask_soft_masks = 0;
        self.ctx = RenderContext::new(canvas, self.options.vector_antialias);
        Ok(())
    }

    fn end_page(&mut self) {
        if !self.nesting.is_empty() {
            warn!("page ended with {} nested contexts open", self.nesting.len());
            self.unwind_nesting();
        }
        if !self.transparency.is_empty() {
            self.transparency.reset();
        }
    }

    fn save_state(&mut self, _state: &GraphicsState) {
        if let Some(frame) = self.glyph_frames.last_mut() {
            if !frame.have_dx && frame.cacheable {
                warn!("Type 3 glyph saves state before d0/d1; not caching it");
                frame.cacheable = false;
            }
        }
        self.ctx.save();
    }

    fn restore_state(&mut self, _state: &GraphicsState) {
        if let Err(e) = self.ctx.restore() {
            warn!("{}", e);
        }
    }

    fn update_fill_color(&mut self, state: &GraphicsState) {
        let pattern = self.solid(&state.fill_color_space, &state.fill_color);
        self.ctx.state_mut().fill_pattern = pattern;
        self.sync_fill_overprint(state);
    }

    fn update_stroke_color(&mut self, state: &GraphicsState) {
        let pattern = self.solid(&state.stroke_color_space, &state.stroke_color);
        self.ctx.state_mut().stroke_pattern = pattern;
        self.sync_stroke_overprint(state);
    }

    fn update_fill_color_space(&mut self, state: &GraphicsState) {
        self.pipeline.register_spots(&state.fill_color_space);
        self.sync_separations();
    }

    fn update_stroke_color_space(&mut self, state: &GraphicsState) {
        self.pipeline.register_spots(&state.stroke_color_space);
        self.sync_separations();
    }

    fn update_blend_mode(&mut self, state: &GraphicsState) {
        self.ctx.state_mut().blend_mode = state.blend_mode;
    }

    fn update_fill_opacity(&mut self, state: &GraphicsState) {
        self.ctx.state_mut().fill_alpha = state.fill_opacity;
        self.transparency.note_opacity(state.fill_opacity);
    }

    fn update_stroke_opacity(&mut self, state: &GraphicsState) {
        self.ctx.state_mut().stroke_alpha = state.stroke_opacity;
        self.transparency.note_opacity(state.stroke_opacity);
    }

    fn update_fill_overprint(&mut self, state: &GraphicsState) {
        self.sync_fill_overprint(state);
    }

    fn update_stroke_overprint(&mut self, state: &GraphicsState) {
        self.sync_stroke_overprint(state);
    }

    fn update_overprint_mode(&mut self, state: &GraphicsState) {
        self.sync_fill_overprint(state);
        self.sync_stroke_overprint(state);
    }

    fn update_transfer(&mut self, state: &GraphicsState) {
        let tables = TransferTables::from_functions(&state.transfer);
        self.ctx.state_mut().transfer = (!tables.is_identity()).then(|| Rc::new(tables));
    }

    fn stroke(&mut self, state: &GraphicsState) {
        if state.stroke_color_space.is_non_marking() {
            return;
        }
        self.sync_stroke_overprint(state);
        self.ctx.stroke_path(&state.path, &state.ctm, &state.stroke_props);
    }

    fn fill(&mut self, state: &GraphicsState) {
        if state.fill_color_space.is_non_marking() {
            return;
        }
        self.sync_fill_overprint(state);
        self.ctx.fill_path(&state.path, &state.ctm, FillRule::NonZero);
    }

    fn eo_fill(&mut self, state: &GraphicsState) {
        if state.fill_color_space.is_non_marking() {
            return;
        }
        self.sync_fill_overprint(state);
        self.ctx.fill_path(&state.path, &state.ctm, FillRule::EvenOdd);
    }

    fn clip(&mut self, state: &GraphicsState) {
        self.ctx.clip_to_path(&state.path, &state.ctm, FillRule::NonZero);
    }

    fn eo_clip(&mut self, state: &GraphicsState) {
        self.ctx.clip_to_path(&state.path, &state.ctm, FillRule::EvenOdd);
    }

    fn clip_to_stroke_path(&mut self, state: &GraphicsState) {
        self.ctx.clip_to_stroke(&state.path, &state.ctm, &state.stroke_props);
    }

    fn load_font(&mut self, id: FontId, data: Vec<u8>, index: u32) -> RasterResult<()> {
        match TrueTypeFont::new(data, index) {
            Ok(font) => {
                debug!("loaded font {:?}", id);
                self.fonts.insert(id, Rc::new(font));
                Ok(())
            }
            Err(e) => {
                warn!("font {:?} could not be loaded: {}", id, e);
                Err(e)
            }
        }
    }

    fn draw_char(&mut self, state: &GraphicsState, x: f64, y: f64, code: u32) {
        let mode = state.text_rendering_mode;
        if mode == TextRenderingMode::Invisible || self.skips_text(state) {
            return;
        }
        let Some(id) = state.font else {
            return;
        };
        let Some(source) = self.fonts.get(&id).cloned() else {
            debug!("no glyph source for font {:?}", id);
            return;
        };
        let Some(outline) = source.glyph_path(code) else {
            return;
        };
        let (ox, oy) = state.ctm.transform_point(x, y);
        let glyph_matrix = state.font_transform().post_translate(ox, oy);

        if mode.fills() && !state.fill_color_space.is_non_marking() {
            self.sync_fill_overprint(state);
            self.ctx.fill_path(&outline, &glyph_matrix, FillRule::NonZero);
        }
        if mode.strokes() && !state.stroke_color_space.is_non_marking() {
            if let Some(inverse) = state.ctm.invert() {
                let user_path = outline.transformed(&glyph_matrix.then(&inverse));
                let mut props = state.stroke_props.clone();
                if props.line_width <= 0.0 {
                    props.line_width = 1.0 / state.vdpi;
                }
                self.sync_stroke_overprint(state);
                self.ctx.stroke_path(&user_path, &state.ctm, &props);
            }
        }
        if mode.clips() {
            let device_path = outline.transformed(&glyph_matrix);
            self.text_clip.get_or_insert_with(Path::new).append(&device_path);
        }
    }

    fn end_text_object(&mut self, _state: &GraphicsState) {
        if let Some(path) = self.text_clip.take() {
            self.ctx.clip_to_path(&path, &Matrix::identity(), FillRule::NonZero);
        }
    }

    fn begin_type3_char(&mut self, state: &GraphicsState, code: u32, font_bbox: Option<&Rect>) -> bool {
        if state.text_rendering_mode == TextRenderingMode::Invisible || self.skips_text(state) {
            return true;
        }
        let Some(font) = state.font else {
            return false;
        };
        let ctm = state.ctm;
        let (xt, yt) = ctm.transform_point(0.0, 0.0);
        let device_bbox = font_bbox.filter(|b| !b.is_zero()).map(|b| ctm.transform_rect(b));
        let key = FontCacheKey::new(font, &ctm);
        let (ax, ay) = self.ctx.adjust(&ctm).transform_point(0.0, 0.0);
        if !(ax.abs() <= MAX_GLYPH_OFFSET && ay.abs() <= MAX_GLYPH_OFFSET) {
            warn!("Type 3 glyph skipped: origin {:.1},{:.1} out of range", ax, ay);
            return true;
        }
        let origin = (ax.floor() as i32, ay.floor() as i32);
        // A cache hit blits straight onto the page with the fill's overprint.
        self.sync_fill_overprint(state);

        let (glyph, valid_bbox, cacheable) = if self.glyph_cache.is_enabled() {
            let in_use: Vec<FontCacheKey> = self.glyph_frames.iter().map(|f| f.key).collect();
            match self
                .glyph_cache
                .font_cache(key, &in_use, || GlyphBox::from_bounds(device_bbox, xt, yt))
            {
                Some(cache) => {
                    let glyph = cache.glyph_box();
                    if let Some(bitmap) = cache.lookup(code) {
                        self.ctx.fill_coverage(
                            origin.0 + glyph.x,
                            origin.1 + glyph.y,
                            glyph.width,
                            glyph.height,
                            bitmap,
                        );
                        return true;
                    }
                    (glyph, cache.has_valid_bbox(), cache.can_store())
                }
                None => {
                    let (glyph, valid) = GlyphBox::from_bounds(device_bbox, xt, yt);
                    (glyph, valid, false)
                }
            }
        } else {
            let (glyph, valid) = GlyphBox::from_bounds(device_bbox, xt, yt);
            (glyph, valid, false)
        };

        let parent_canvas = self.ctx.canvas();
        let canvas = match Canvas::new(
            glyph.width,
            glyph.height,
            parent_canvas.mode(),
            1,
            parent_canvas.is_top_down(),
            true,
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!("Type 3 glyph skipped: {}", e);
                return true;
            }
        };
        let (bx, by) = (origin.0 + glyph.x, origin.1 + glyph.y);
        let mut glyph_ctx = RenderContext::nested(canvas, bx, by, &self.ctx);
        glyph_ctx.state_mut().clip = Clip::new(glyph_ctx.page_bounds());
        // Render with the glyph origin on a pixel corner so the bitmap does
        // not depend on where the glyph first appeared.
        let (sx, sy) = self.ctx.shift();
        glyph_ctx.set_shift(sx + origin.0 as f64 - ax, sy + origin.1 as f64 - ay);
        let parent = mem::replace(&mut self.ctx, glyph_ctx);
        self.glyph_frames.push(GlyphRenderFrame {
            key,
            code,
            glyph,
            origin,
            xt,
            yt,
            parent,
            have_dx: false,
            uncolored: false,
            cacheable,
            valid_bbox,
        });
        self.nesting.push(Nesting::Glyph);
        false
    }

    fn end_type3_char(&mut self, state: &GraphicsState) {
        if !self.nesting.contains(&Nesting::Glyph) {
            warn!("end of Type 3 glyph without begin");
            return;
        }
        while self.nesting.last() == Some(&Nesting::Group) {
            warn!("Type 3 glyph ended inside an open group");
            self.nesting.pop();
            self.abandon_group();
        }
        self.nesting.pop();
        let Some(frame) = self.glyph_frames.pop() else {
            return;
        };
        let (bx, by) = frame.bitmap_origin();
        let glyph_ctx = mem::replace(&mut self.ctx, frame.parent);
        let canvas = glyph_ctx.into_canvas();
        if !frame.uncolored {
            self.ctx.composite_group(&canvas, bx, by, GroupComposite::OVER);
            return;
        }
        let Some(coverage) = canvas.alpha_plane() else {
            return;
        };
        self.sync_fill_overprint(state);
        self.ctx
            .fill_coverage(bx, by, frame.glyph.width, frame.glyph.height, coverage);
        if frame.cacheable {
            if let Some(cache) = self.glyph_cache.peek_mut(&frame.key) {
                if cache.glyph_box() == frame.glyph && cache.store(frame.code, coverage) {
                    debug!("cached Type 3 glyph {} of {:?}", frame.code, frame.key.font());
                }
            }
        }
    }

    fn type3_d0(&mut self, _state: &GraphicsState, _wx: f64, _wy: f64) {
        let Some(frame) = self.glyph_frames.last_mut() else {
            warn!("d0 outside a Type 3 glyph");
            return;
        };
        if frame.have_dx {
            warn!("Type 3 glyph metrics set twice");
            frame.cacheable = false;
            return;
        }
        frame.have_dx = true;
        frame.uncolored = false;
        frame.cacheable = false;
    }

    fn type3_d1(&mut self, state: &GraphicsState, _wx: f64, _wy: f64, llx: f64, lly: f64, urx: f64, ury: f64) {
        let Some(frame) = self.glyph_frames.last_mut() else {
            warn!("d1 outside a Type 3 glyph");
            return;
        };
        if frame.have_dx {
            warn!("Type 3 glyph metrics set twice");
            frame.cacheable = false;
            return;
        }
        frame.have_dx = true;
        frame.uncolored = true;
        if !frame.cacheable {
            return;
        }
        let ink = state.ctm.transform_rect(&Rect::new(llx, lly, urx, ury));
        if !ink.is_finite() || !frame.glyph.contains(&ink, frame.xt, frame.yt) {
            if frame.valid_bbox {
                warn!("Type 3 glyph {} ink exceeds the font bounding box", frame.code);
            }
            frame.cacheable = false;
        }
    }

    fn draw_image(&mut self, state: &GraphicsState, image: &ImageSource<'_>, color_key: Option<&[i32]>) {
        let Some(mat) = image_matrix(&state.ctm) else {
            return;
        };
        self.pipeline.register_spots(image.color_map.color_space());
        self.sync_separations();
        let images = ImagePipeline::new(&self.pipeline);
        let lut = images.lookup_table(image.color_map);
        match images.decode(image, lut.as_ref(), color_key) {
            Ok(canvas) => self.draw_decoded(state, image, lut.as_ref(), &canvas, &mat),
            Err(e) => warn!("image skipped: {}", e),
        }
    }

    fn draw_image_mask(&mut self, state: &GraphicsState, mask: &StencilSource<'_>) {
        if state.fill_color_space.is_non_marking() {
            return;
        }
        let Some(mat) = image_matrix(&state.ctm) else {
            return;
        };
        match stencil_bits(mask) {
            Ok(bits) => {
                self.sync_fill_overprint(state);
                self.ctx.fill_image_mask(&bits, &mat);
            }
            Err(e) => warn!("image mask skipped: {}", e),
        }
    }

    fn draw_masked_image(&mut self, state: &GraphicsState, image: &ImageSource<'_>, mask: &StencilSource<'_>) {
        if mask.width > image.width || mask.height > image.height {
            // A finer mask keeps its own resolution as a soft mask.
            let decode = if mask.invert { [0.0, 1.0] } else { [1.0, 0.0] };
            let map = match ImageColorMap::new(1, Some(&decode), ColorSpace::DeviceGray) {
                Ok(m) => m,
                Err(e) => {
                    warn!("masked image skipped: {}", e);
                    return;
                }
            };
            let soft = ImageSource {
                data: mask.data,
                width: mask.width,
                height: mask.height,
                color_map: &map,
            };
            self.draw_soft_masked_image(state, image, &soft, None);
            return;
        }
        let Some(mat) = image_matrix(&state.ctm) else {
            return;
        };
        self.pipeline.register_spots(image.color_map.color_space());
        self.sync_separations();
        let images = ImagePipeline::new(&self.pipeline);
        let lut = images.lookup_table(image.color_map);
        match images.decode_masked(image, lut.as_ref(), mask) {
            Ok(canvas) => self.draw_decoded(state, image, lut.as_ref(), &canvas, &mat),
            Err(e) => warn!("masked image skipped: {}", e),
        }
    }

    fn draw_soft_masked_image(
        &mut self,
        state: &GraphicsState,
        image: &ImageSource<'_>,
        mask: &ImageSource<'_>,
        matte: Option<&[f64]>,
    ) {
        let Some(mat) = image_matrix(&state.ctm) else {
            return;
        };
        self.pipeline.register_spots(image.color_map.color_space());
        self.sync_separations();
        let images = ImagePipeline::new(&self.pipeline);
        let lut = images.lookup_table(image.color_map);
        let (mut canvas, mask_canvas) = match (images.decode(image, lut.as_ref(), None), images.soft_mask(mask)) {
            (Ok(c), Ok(m)) => (c, m),
            (Err(e), _) | (_, Err(e)) => {
                warn!("soft-masked image skipped: {}", e);
                return;
            }
        };
        if let Some(matte) = matte {
            let matte = images.matte_color(image.color_map.color_space(), matte);
            undo_matte(&mut canvas, &mask_canvas, &matte);
        }
        let Some(soft) = soft_mask_from_image(&self.ctx, &mask_canvas, &mat) else {
            return;
        };
        self.ctx.save();
        self.ctx.state_mut().soft_mask = Some(soft);
        self.draw_decoded(state, image, lut.as_ref(), &canvas, &mat);
        if let Err(e) = self.ctx.restore() {
            warn!("soft-masked image: {}", e);
        }
    }

    fn set_soft_mask_from_image_mask(&mut self, state: &GraphicsState, mask: &StencilSource<'_>) {
        let Some(mat) = image_matrix(&state.ctm) else {
            return;
        };
        let bits = match stencil_bits(mask) {
            Ok(b) => b,
            Err(e) => {
                warn!("image mask soft mask skipped: {}", e);
                return;
            }
        };
        // A mask that lands nowhere hides everything.
        let soft = soft_mask_from_image(&self.ctx, &bits, &mat)
            .or_else(|| Canvas::mono8(1, 1).ok().map(|c| SoftMask::new(c, 0, 0)));
        self.ctx.save();
        self.ctx.state_mut().soft_mask = soft;
        self.image_mask_soft_masks += 1;
    }

    fn unset_soft_mask_from_image_mask(&mut self, _state: &GraphicsState) {
        if self.image_mask_soft_masks == 0 {
            warn!("no image mask soft mask to remove");
            return;
        }
        self.image_mask_soft_masks -= 1;
        if let Err(e) = self.ctx.restore() {
            warn!("{}", e);
        }
    }

    fn tiling_pattern_fill(
        &mut self,
        state: &GraphicsState,
        params: &TilingParams,
        tiles: TileRange,
        painter: &mut dyn CellPainter,
    ) -> bool {
        if self.cell_frames.len() >= MAX_CELL_DEPTH {
            warn!("tiling patterns nested too deeply");
            return false;
        }
        let ctm = self.ctx.adjust(&state.ctm);
        let Some(plan) = plan_cell(params, &ctm, tiles, self.options.max_tiling_cell_pixels) else {
            return false;
        };
        let visible = plan.visible_tiles(&self.ctx.paint_bounds(), params.bbox.width(), params.bbox.height());
        if visible.columns() == 0 || visible.rows() == 0 {
            return true;
        }
        let uncolored = params.paint_type == PaintType::Uncolored;
        let device_mode = self.pipeline.mode();
        let cell_mode = if uncolored { ColorMode::Mono8 } else { source_mode(device_mode) };
        let mut cell = match Canvas::new(plan.width, plan.height, cell_mode, 1, self.options.top_down, true) {
            Ok(c) => c,
            Err(e) => {
                debug!("tiling cell not allocated: {}", e);
                return false;
            }
        };
        cell.clear(&cell_mode.white(), 0);
        cell.set_separations(self.ctx.canvas().separations().to_vec());
        debug!(
            "tiling cell {}x{} for {}x{} visible tiles",
            plan.width,
            plan.height,
            visible.columns(),
            visible.rows()
        );
        let cell = Rc::new(self.render_cell(state, cell, &plan.cell_matrix, uncolored, painter));
        let (width, height) = (params.bbox.width(), params.bbox.height());

        self.sync_fill_overprint(state);
        if plan.fast_blit && cell_mode == device_mode {
            for j in visible.y0..visible.y1 {
                for i in visible.x0..visible.x1 {
                    let r = plan.tile_bounds(i, j, width, height);
                    #[cfg(feature = "debug-logging")]
                    trace!("blit tile ({}, {}) at {:.2},{:.2}", i, j, r.x_min, r.y_min);
                    self.ctx
                        .composite_group(&cell, r.x_min.round() as i32, r.y_min.round() as i32, GroupComposite::OVER);
                }
            }
            return true;
        }
        let stencil = uncolored.then(|| self.pipeline.device_color(&state.fill_color_space, &state.fill_color));
        let Some(pattern) = TilingPattern::new(cell, &plan, width, height, stencil, self.subtractive()) else {
            return false;
        };
        let covered = Rect::new(
            visible.x0 as f64 * width,
            visible.y0 as f64 * height,
            visible.x1 as f64 * width,
            visible.y1 as f64 * height,
        );
        let region = plan
            .device_matrix
            .transform_rect(&covered)
            .round_out()
            .intersect(&self.ctx.paint_bounds());
        self.ctx.fill_region(region, &pattern);
        true
    }

    fn function_shaded_fill(&mut self, state: &GraphicsState, shading: &FunctionShading) -> bool {
        self.pipeline.register_spots(&shading.color_space);
        self.sync_separations();
        let ctm = self.ctx.adjust(&state.ctm);
        let Some(pattern) = FunctionPattern::new(shading, &ctm, &self.pipeline) else {
            debug!("function shading declined");
            return false;
        };
        self.shaded_fill(state, &shading.color_space, Rc::new(pattern), shading.bbox.as_ref(), None);
        true
    }

    fn axial_shaded_fill(&mut self, state: &GraphicsState, shading: &AxialShading) -> bool {
        self.pipeline.register_spots(&shading.color_space);
        self.sync_separations();
        let ctm = self.ctx.adjust(&state.ctm);
        let Some(pattern) = AxialPattern::new(shading, &ctm, &self.pipeline) else {
            debug!("axial shading declined");
            return false;
        };
        self.shaded_fill(state, &shading.color_space, Rc::new(pattern), shading.bbox.as_ref(), None);
        true
    }

    fn radial_shaded_fill(&mut self, state: &GraphicsState, shading: &RadialShading) -> bool {
        self.pipeline.register_spots(&shading.color_space);
        self.sync_separations();
        let ctm = self.ctx.adjust(&state.ctm);
        let Some(pattern) = RadialPattern::new(shading, &ctm, &self.pipeline) else {
            debug!("radial shading declined");
            return false;
        };
        self.shaded_fill(state, &shading.color_space, Rc::new(pattern), shading.bbox.as_ref(), None);
        true
    }

    fn gouraud_triangle_shaded_fill(&mut self, state: &GraphicsState, shading: &GouraudShading) -> bool {
        self.pipeline.register_spots(&shading.color_space);
        self.sync_separations();
        let ctm = self.ctx.adjust(&state.ctm);
        let pattern = GouraudPattern::new(shading, &ctm, &self.pipeline);
        let Some(bounds) = pattern.bounds() else {
            return true;
        };
        let region = bounds.round_out();
        self.shaded_fill(
            state,
            &shading.color_space,
            Rc::new(pattern),
            shading.bbox.as_ref(),
            Some(region),
        );
        true
    }

    fn check_transparency_group(&mut self, state: &GraphicsState, knockout: bool) -> bool {
        self.transparency
            .needs_group(state, self.ctx.state().soft_mask.is_some(), knockout)
    }

    fn begin_transparency_group(
        &mut self,
        state: &GraphicsState,
        bbox: &Rect,
        blending_space: Option<&ColorSpace>,
        isolated: bool,
        knockout: bool,
        for_soft_mask: bool,
    ) {
        let device_bbox = self.ctx.adjust(&state.ctm).transform_rect(bbox);
        self.transparency.begin(
            &mut self.ctx,
            &device_bbox,
            blending_space.cloned(),
            isolated,
            knockout,
            for_soft_mask,
        );
        self.nesting.push(Nesting::Group);
        if self.transparency.top().is_some_and(|f| f.mode_switched) {
            let mode = self.ctx.canvas().mode();
            debug!("group renders in {:?}", mode);
            self.push_pipeline(mode);
            self.update_fill_color(state);
            self.update_stroke_color(state);
        }
    }

    fn end_transparency_group(&mut self, _state: &GraphicsState) {
        match self.transparency.end(&mut self.ctx) {
            Ok(true) => self.pop_pipeline(),
            Ok(false) => {}
            Err(e) => warn!("{}", e),
        }
    }

    fn paint_transparency_group(&mut self, _state: &GraphicsState, _bbox: &Rect) {
        match self.transparency.paint(&mut self.ctx) {
            Ok(()) => self.pop_group_marker(),
            Err(e) => warn!("{}", e),
        }
    }

    fn set_soft_mask(
        &mut self,
        _state: &GraphicsState,
        _bbox: &Rect,
        alpha: bool,
        transfer: Option<&FunctionRef>,
        backdrop: &GfxColor,
    ) {
        match self.transparency.set_soft_mask(&mut self.ctx, alpha, transfer, backdrop) {
            Ok(()) => self.pop_group_marker(),
            Err(e) => warn!("soft mask not installed: {}", e),
        }
    }

    fn clear_soft_mask(&mut self, _state: &GraphicsState) {
        TransparencyEngine::clear_soft_mask(&mut self.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::font::OutlineFont;
    use smallvec::smallvec;

    fn device(mode: ColorMode) -> RasterDevice {
        let options = RasterOptions {
            color_mode: mode,
            paper_color: Some(mode.white()),
            vector_antialias: false,
            ..Default::default()
        };
        let mut dev = RasterDevice::new(options).unwrap();
        dev.start_page(8.0, 8.0).unwrap();
        dev
    }

    fn rect_state(x: f64, y: f64, w: f64, h: f64) -> GraphicsState {
        let mut state = GraphicsState::default();
        state.path.rect(x, y, w, h);
        state
    }

    fn gray_fill(state: &mut GraphicsState, g: f64) {
        state.fill_color_space = ColorSpace::DeviceGray;
        state.fill_color = smallvec![g];
    }

    #[test]
    fn test_start_page_clears_to_paper() {
        let mut dev = device(ColorMode::Rgb8);
        assert_eq!(dev.canvas().width(), 8);
        assert_eq!(dev.canvas().pixel(3, 3)[..3], [255, 255, 255]);
        let page = dev.take_canvas();
        assert_eq!(page.width(), 8);
        assert_eq!(dev.canvas().width(), 1);
    }

    #[test]
    fn test_no_paper_keeps_alpha() {
        let options = RasterOptions {
            paper_color: None,
            ..Default::default()
        };
        let mut dev = RasterDevice::new(options).unwrap();
        dev.start_page(2.0, 2.0).unwrap();
        assert!(dev.canvas().has_alpha());
        assert_eq!(dev.canvas().alpha(0, 0), 0);
    }

    #[test]
    fn test_fill_uses_fill_color() {
        let mut dev = device(ColorMode::Rgb8);
        let mut state = rect_state(0.0, 0.0, 4.0, 8.0);
        state.fill_color_space = ColorSpace::DeviceRgb;
        state.fill_color = smallvec![1.0, 0.0, 0.0];
        dev.update_all(&state);
        dev.fill(&state);
        assert_eq!(dev.canvas().pixel(1, 1)[..3], [255, 0, 0]);
        assert_eq!(dev.canvas().pixel(6, 1)[..3], [255, 255, 255]);
    }

    #[test]
    fn test_non_marking_fill_paints_nothing() {
        let mut dev = device(ColorMode::Mono8);
        let mut state = rect_state(0.0, 0.0, 8.0, 8.0);
        state.fill_color_space = ColorSpace::Separation {
            name: "None".into(),
            alt: Box::new(ColorSpace::DeviceGray),
            tint: Rc::new(crate::rendering::function::ExponentialFunction::identity()),
        };
        state.fill_color = smallvec![1.0];
        dev.update_all(&state);
        dev.fill(&state);
        assert_eq!(dev.canvas().pixel(4, 4)[0], 255);
    }

    #[test]
    fn test_draw_char_and_text_clip() {
        let mut dev = device(ColorMode::Mono8);
        let mut font = OutlineFont::new();
        let mut square = Path::new();
        square.rect(0.0, 0.0, 1.0, 1.0);
        font.insert(65, square);
        let id = FontId::new(1, 0);
        dev.register_glyph_source(id, Rc::new(font));

        let mut state = GraphicsState::default();
        state.font = Some(id);
        state.font_size = 4.0;
        dev.update_all(&state);
        dev.draw_char(&state, 0.0, 0.0, 65);
        assert_eq!(dev.canvas().pixel(1, 1)[0], 0);
        assert_eq!(dev.canvas().pixel(5, 5)[0], 255);

        state.text_rendering_mode = TextRenderingMode::Clip;
        dev.draw_char(&state, 4.0, 4.0, 65);
        assert_eq!(dev.canvas().pixel(5, 5)[0], 255);
        dev.end_text_object(&state);
        let mut fill = rect_state(0.0, 0.0, 8.0, 8.0);
        gray_fill(&mut fill, 0.5);
        dev.update_fill_color(&fill);
        dev.fill(&fill);
        assert_eq!(dev.canvas().pixel(5, 5)[0], 128);
        assert_eq!(dev.canvas().pixel(2, 6)[0], 255);
    }

    #[test]
    fn test_skip_horizontal_text() {
        let options = RasterOptions {
            color_mode: ColorMode::Mono8,
            paper_color: Some(ColorMode::Mono8.white()),
            skip_horizontal_text: true,
            ..Default::default()
        };
        let mut dev = RasterDevice::new(options).unwrap();
        dev.start_page(8.0, 8.0).unwrap();
        let mut state = GraphicsState::default();
        state.font_size = 4.0;
        state.ctm = Matrix([1.0, 0.0, 0.0, -1.0, 0.0, 8.0]);
        assert!(dev.skips_text(&state));
        state.ctm = Matrix([0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        assert!(!dev.skips_text(&state));
    }

    fn type3_state() -> GraphicsState {
        let mut state = GraphicsState::default();
        state.font = Some(FontId::new(7, 0));
        state.ctm = Matrix([4.0, 0.0, 0.0, 4.0, 2.0, 2.0]);
        state
    }

    /// Runs a `d1` glyph filling the unit square.
    fn run_glyph(dev: &mut RasterDevice, state: &GraphicsState) -> bool {
        let bbox = Rect::new(0.0, 0.0, 1.0, 1.0);
        if dev.begin_type3_char(state, 65, Some(&bbox)) {
            return true;
        }
        dev.type3_d1(state, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0);
        let mut glyph = state.clone();
        glyph.path.rect(0.0, 0.0, 1.0, 1.0);
        dev.fill(&glyph);
        dev.end_type3_char(state);
        false
    }

    #[test]
    fn test_type3_glyph_cached_on_second_use() {
        let mut dev = device(ColorMode::Mono8);
        let state = type3_state();
        dev.update_all(&state);
        assert!(!run_glyph(&mut dev, &state));
        let first = dev.canvas().data().to_vec();
        assert_eq!(dev.canvas().pixel(3, 3)[0], 0);
        assert_eq!(dev.glyph_cache().len(), 1);

        dev.start_page(8.0, 8.0).unwrap();
        dev.update_all(&state);
        assert!(run_glyph(&mut dev, &state));
        assert_eq!(dev.canvas().data(), &first[..]);
    }

    #[test]
    fn test_type3_save_before_d1_not_cached() {
        let mut dev = device(ColorMode::Mono8);
        let state = type3_state();
        dev.update_all(&state);
        let bbox = Rect::new(0.0, 0.0, 1.0, 1.0);
        assert!(!dev.begin_type3_char(&state, 66, Some(&bbox)));
        dev.save_state(&state);
        dev.restore_state(&state);
        dev.type3_d1(&state, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0);
        dev.end_type3_char(&state);
        assert!(!dev.begin_type3_char(&state, 66, Some(&bbox)));
        dev.end_type3_char(&state);
    }

    #[test]
    fn test_type3_invisible_is_handled() {
        let mut dev = device(ColorMode::Mono8);
        let mut state = type3_state();
        state.text_rendering_mode = TextRenderingMode::Invisible;
        assert!(dev.begin_type3_char(&state, 65, None));
        state.text_rendering_mode = TextRenderingMode::Fill;
        state.font = None;
        assert!(!dev.begin_type3_char(&state, 65, None));
    }

    #[test]
    fn test_stencil_all_ones_paints_nothing() {
        let mut dev = device(ColorMode::Mono8);
        let mut state = GraphicsState::default();
        state.ctm = Matrix([8.0, 0.0, 0.0, 8.0, 0.0, 0.0]);
        dev.update_all(&state);
        let mask = StencilSource {
            data: &[0xff],
            width: 8,
            height: 1,
            invert: false,
        };
        dev.draw_image_mask(&state, &mask);
        assert!(dev.canvas().data().iter().all(|&b| b == 255));
    }

    #[test]
    fn test_soft_mask_from_image_mask_gates_fill() {
        let mut dev = device(ColorMode::Mono8);
        let mut state = GraphicsState::default();
        state.ctm = Matrix([8.0, 0.0, 0.0, 8.0, 0.0, 0.0]);
        dev.update_all(&state);
        // Left half paints (0 bits), right half does not.
        let mask = StencilSource {
            data: &[0x0f],
            width: 8,
            height: 1,
            invert: false,
        };
        dev.set_soft_mask_from_image_mask(&state, &mask);
        let fill = rect_state(0.0, 0.0, 8.0, 8.0);
        dev.fill(&fill);
        dev.unset_soft_mask_from_image_mask(&state);
        assert_eq!(dev.canvas().pixel(1, 4)[0], 0);
        assert_eq!(dev.canvas().pixel(6, 4)[0], 255);
        assert!(dev.context().state().soft_mask.is_none());
    }

    #[test]
    fn test_tiling_fill_fast_blit() {
        let mut dev = device(ColorMode::Mono8);
        let state = rect_state(0.0, 0.0, 8.0, 8.0);
        dev.update_all(&state);
        let params = TilingParams {
            bbox: Rect::new(0.0, 0.0, 2.0, 2.0),
            x_step: 2.0,
            y_step: 2.0,
            matrix: Matrix::identity(),
            paint_type: PaintType::Colored,
        };
        let mut painter = |dev: &mut dyn OutputDevice, cell: &GraphicsState| {
            let mut s = cell.clone();
            s.path.rect(0.0, 0.0, 1.0, 2.0);
            dev.fill(&s);
        };
        assert!(dev.tiling_pattern_fill(&state, &params, TileRange::new(0, 0, 4, 4), &mut painter));
        assert_eq!(dev.canvas().pixel(0, 0)[0], 0);
        assert_eq!(dev.canvas().pixel(1, 0)[0], 255);
        assert_eq!(dev.canvas().pixel(6, 5)[0], 0);
        assert_eq!(dev.canvas().pixel(7, 5)[0], 255);
    }

    #[test]
    fn test_tiling_fill_refuses_step_mismatch() {
        let mut dev = device(ColorMode::Mono8);
        let state = GraphicsState::default();
        let params = TilingParams {
            bbox: Rect::new(0.0, 0.0, 2.0, 2.0),
            x_step: 3.0,
            y_step: 2.0,
            matrix: Matrix::identity(),
            paint_type: PaintType::Colored,
        };
        let mut painter = |_: &mut dyn OutputDevice, _: &GraphicsState| {};
        assert!(!dev.tiling_pattern_fill(&state, &params, TileRange::new(0, 0, 4, 4), &mut painter));
    }

    #[test]
    fn test_uncolored_tiling_uses_fill_color() {
        let mut dev = device(ColorMode::Rgb8);
        let mut state = GraphicsState::default();
        state.fill_color_space = ColorSpace::DeviceRgb;
        state.fill_color = smallvec![0.0, 0.0, 1.0];
        dev.update_all(&state);
        let params = TilingParams {
            bbox: Rect::new(0.0, 0.0, 2.0, 2.0),
            x_step: 2.0,
            y_step: 2.0,
            matrix: Matrix::identity(),
            paint_type: PaintType::Uncolored,
        };
        let mut painter = |dev: &mut dyn OutputDevice, cell: &GraphicsState| {
            let mut s = cell.clone();
            s.path.rect(0.0, 0.0, 1.0, 2.0);
            dev.fill(&s);
        };
        assert!(dev.tiling_pattern_fill(&state, &params, TileRange::new(0, 0, 4, 4), &mut painter));
        assert_eq!(dev.canvas().pixel(2, 3)[..3], [0, 0, 255]);
        assert_eq!(dev.canvas().pixel(3, 3)[..3], [255, 255, 255]);
        assert_eq!(dev.pipeline.mode(), ColorMode::Rgb8);
    }

    #[test]
    fn test_gray_soft_mask_group_switches_pipeline() {
        let mut dev = device(ColorMode::Rgb8);
        let state = GraphicsState::default();
        let whole = Rect::new(0.0, 0.0, 8.0, 8.0);
        dev.begin_transparency_group(&state, &whole, Some(&ColorSpace::DeviceGray), true, false, true);
        assert_eq!(dev.canvas().mode(), ColorMode::Mono8);
        assert_eq!(dev.pipeline.mode(), ColorMode::Mono8);
        let mut white = rect_state(0.0, 0.0, 4.0, 8.0);
        gray_fill(&mut white, 1.0);
        dev.update_fill_color(&white);
        dev.fill(&white);
        dev.end_transparency_group(&state);
        assert_eq!(dev.pipeline.mode(), ColorMode::Rgb8);
        dev.set_soft_mask(&state, &whole, false, None, &smallvec![0.0]);

        let mut red = rect_state(0.0, 0.0, 8.0, 8.0);
        red.fill_color_space = ColorSpace::DeviceRgb;
        red.fill_color = smallvec![1.0, 0.0, 0.0];
        dev.update_fill_color(&red);
        dev.fill(&red);
        assert_eq!(dev.canvas().pixel(1, 1)[..3], [255, 0, 0]);
        assert_eq!(dev.canvas().pixel(6, 1)[..3], [255, 255, 255]);
        dev.clear_soft_mask(&state);
        assert!(dev.context().state().soft_mask.is_none());
    }

    #[test]
    fn test_end_page_unwinds_open_groups() {
        let mut dev = device(ColorMode::Rgb8);
        let state = GraphicsState::default();
        let r = Rect::new(1.0, 1.0, 3.0, 3.0);
        dev.begin_transparency_group(&state, &r, Some(&ColorSpace::DeviceGray), true, false, true);
        dev.begin_transparency_group(&state, &r, None, true, false, false);
        dev.end_page();
        assert_eq!(dev.canvas().width(), 8);
        assert_eq!(dev.canvas().mode(), ColorMode::Rgb8);
        assert_eq!(dev.pipeline.mode(), ColorMode::Rgb8);
    }

    #[test]
    fn test_axial_fill_respects_clip() {
        let mut dev = device(ColorMode::Mono8);
        let mut state = rect_state(0.0, 0.0, 4.0, 8.0);
        dev.update_all(&state);
        dev.clip(&state);
        state.path = Path::new();
        let shading = AxialShading {
            color_space: ColorSpace::DeviceGray,
            coords: [0.0, 0.0, 8.0, 0.0],
            domain: [0.0, 1.0],
            extend: [true, true],
            functions: vec![Rc::new(crate::rendering::function::ExponentialFunction::identity())],
            bbox: None,
        };
        assert!(dev.axial_shaded_fill(&state, &shading));
        assert!(dev.canvas().pixel(0, 0)[0] < 32);
        assert_eq!(dev.canvas().pixel(6, 0)[0], 255);
    }
}
