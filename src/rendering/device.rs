//! The interface an interpreter drives while executing a content stream.
//!
//! An output device receives one call per operator class together with a
//! snapshot of the graphics state. Before calling it, the interpreter asks
//! a handful of capability questions so it knows which constructs it must
//! expand itself (tiling patterns, shadings, text) and which the device
//! renders natively.

use super::function::FunctionRef;
use super::graphics_state::{FontId, GraphicsState};
use super::color::{ColorSpace, GfxColor};
use super::image::{ImageSource, StencilSource};
use super::shading::{AxialShading, FunctionShading, GouraudShading, RadialShading, ShadingKind};
use super::tiling::{TileRange, TilingParams};
use crate::core::error::RasterResult;
use crate::core::geometry::Rect;

/// Replays the content stream of one tiling cell.
///
/// A device that renders tiling patterns natively calls back into the
/// interpreter through this trait exactly once per fill, with a graphics
/// state whose CTM maps pattern space onto the cell canvas.
pub trait CellPainter {
    fn paint_cell(&mut self, device: &mut dyn OutputDevice, state: &GraphicsState);
}

impl<F> CellPainter for F
where
    F: FnMut(&mut dyn OutputDevice, &GraphicsState),
{
    fn paint_cell(&mut self, device: &mut dyn OutputDevice, state: &GraphicsState) {
        self(device, state)
    }
}

/// A rendering backend for PDF page content.
///
/// Every drawing entry point takes the graphics state the operator runs
/// under; devices read what they need from it rather than mirroring the
/// whole state. Most methods have empty defaults so a device only
/// implements the operator classes it cares about.
pub trait OutputDevice {
    // ===== Capability queries =====

    /// Whether device space has its origin at the top-left corner.
    fn upside_down(&self) -> bool;

    /// Whether glyphs are drawn through [`OutputDevice::draw_char`]. When
    /// false the interpreter decomposes text into paths itself.
    fn use_draw_char(&self) -> bool;

    /// Whether [`OutputDevice::tiling_pattern_fill`] should be tried before
    /// expanding a tiling pattern into repeated cell drawing.
    fn use_tiling_pattern_fill(&self) -> bool {
        false
    }

    /// Whether the shaded fill for `kind` is handled natively.
    fn use_shaded_fills(&self, kind: ShadingKind) -> bool {
        let _ = kind;
        false
    }

    /// Whether Type 3 glyph procedures are run through
    /// [`OutputDevice::begin_type3_char`].
    fn interpret_type3_chars(&self) -> bool;

    /// Whether the device wants anything other than text.
    fn needs_non_text(&self) -> bool {
        true
    }

    // ===== Document and page =====

    fn start_doc(&mut self) {}

    /// Begin a page of `width` x `height` device pixels.
    ///
    /// # Returns
    /// An error only when the page canvas cannot be allocated.
    fn start_page(&mut self, width: f64, height: f64) -> RasterResult<()>;

    fn end_page(&mut self) {}

    // ===== Graphics state =====

    fn save_state(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn restore_state(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    /// Push every attribute of `state` to the device.
    fn update_all(&mut self, state: &GraphicsState) {
        self.update_fill_color_space(state);
        self.update_stroke_color_space(state);
        self.update_fill_color(state);
        self.update_stroke_color(state);
        self.update_blend_mode(state);
        self.update_fill_opacity(state);
        self.update_stroke_opacity(state);
        self.update_fill_overprint(state);
        self.update_stroke_overprint(state);
        self.update_overprint_mode(state);
        self.update_transfer(state);
        self.update_stroke_props(state);
    }

    fn update_fill_color(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_stroke_color(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_fill_color_space(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_stroke_color_space(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_blend_mode(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_fill_opacity(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_stroke_opacity(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_fill_overprint(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_stroke_overprint(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_overprint_mode(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    fn update_transfer(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    /// Line width, caps, joins, miter limit and dashes.
    fn update_stroke_props(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    // ===== Paths =====

    /// Stroke the current path.
    fn stroke(&mut self, state: &GraphicsState);

    /// Fill the current path with the nonzero winding rule.
    fn fill(&mut self, state: &GraphicsState);

    /// Fill the current path with the even-odd rule.
    fn eo_fill(&mut self, state: &GraphicsState);

    fn clip(&mut self, state: &GraphicsState);

    fn eo_clip(&mut self, state: &GraphicsState);

    /// Clip to the outline the current path would cover if stroked.
    fn clip_to_stroke_path(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    // ===== Text =====

    /// Load an embedded font program and register it under `id`.
    ///
    /// # Arguments
    /// * `id` - Identity the interpreter will refer to the font by
    /// * `data` - Complete font program
    /// * `index` - Face index inside a collection
    fn load_font(&mut self, id: FontId, data: Vec<u8>, index: u32) -> RasterResult<()> {
        let _ = (id, data, index);
        Ok(())
    }

    /// Draw one glyph of the current font with its origin at user-space
    /// `(x, y)`.
    fn draw_char(&mut self, state: &GraphicsState, x: f64, y: f64, code: u32) {
        let _ = (state, x, y, code);
    }

    /// Apply any clip accumulated by clipping text render modes.
    fn end_text_object(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    /// Start a Type 3 glyph. `state.ctm` maps glyph space to device space.
    ///
    /// # Arguments
    /// * `code` - Character code being drawn
    /// * `font_bbox` - The font's declared bounding box in glyph space
    ///
    /// # Returns
    /// `true` when the glyph was fully handled (drawn from a cache or
    /// suppressed) and the glyph procedure must not run. `false` means
    /// the interpreter runs the procedure and then calls
    /// [`OutputDevice::end_type3_char`].
    fn begin_type3_char(&mut self, state: &GraphicsState, code: u32, font_bbox: Option<&Rect>) -> bool {
        let _ = (state, code, font_bbox);
        false
    }

    fn end_type3_char(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    /// `d0`: the glyph sets its own colors.
    fn type3_d0(&mut self, state: &GraphicsState, wx: f64, wy: f64) {
        let _ = (state, wx, wy);
    }

    /// `d1`: the glyph is a shape painted with the fill color, with ink
    /// inside `(llx, lly)`-`(urx, ury)` in glyph space.
    #[allow(clippy::too_many_arguments)]
    fn type3_d1(&mut self, state: &GraphicsState, wx: f64, wy: f64, llx: f64, lly: f64, urx: f64, ury: f64) {
        let _ = (state, wx, wy, llx, lly, urx, ury);
    }

    // ===== Images =====

    /// Draw a color image over the unit square of the CTM.
    ///
    /// # Arguments
    /// * `color_key` - `[min0, max0, min1, max1, ...]` sample ranges that
    ///   are painted transparent
    fn draw_image(&mut self, state: &GraphicsState, image: &ImageSource<'_>, color_key: Option<&[i32]>) {
        let _ = (state, image, color_key);
    }

    /// Paint the fill color through a 1-bit stencil.
    fn draw_image_mask(&mut self, state: &GraphicsState, mask: &StencilSource<'_>) {
        let _ = (state, mask);
    }

    /// Draw an image through an explicit 1-bit mask.
    fn draw_masked_image(&mut self, state: &GraphicsState, image: &ImageSource<'_>, mask: &StencilSource<'_>) {
        let _ = (state, image, mask);
    }

    /// Draw an image through a grayscale soft mask.
    ///
    /// # Arguments
    /// * `matte` - Color the image was premultiplied against, in the
    ///   image's color space
    fn draw_soft_masked_image(
        &mut self,
        state: &GraphicsState,
        image: &ImageSource<'_>,
        mask: &ImageSource<'_>,
        matte: Option<&[f64]>,
    ) {
        let _ = (state, image, mask, matte);
    }

    /// Make a stencil the soft mask for the pattern fill that follows.
    fn set_soft_mask_from_image_mask(&mut self, state: &GraphicsState, mask: &StencilSource<'_>) {
        let _ = (state, mask);
    }

    fn unset_soft_mask_from_image_mask(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    // ===== Patterns and shadings =====

    /// Fill the clip region with a tiling pattern.
    ///
    /// # Returns
    /// `false` when the device declines and the interpreter must expand
    /// the pattern itself.
    fn tiling_pattern_fill(
        &mut self,
        state: &GraphicsState,
        params: &TilingParams,
        tiles: TileRange,
        painter: &mut dyn CellPainter,
    ) -> bool {
        let _ = (state, params, tiles, painter);
        false
    }

    fn function_shaded_fill(&mut self, state: &GraphicsState, shading: &FunctionShading) -> bool {
        let _ = (state, shading);
        false
    }

    fn axial_shaded_fill(&mut self, state: &GraphicsState, shading: &AxialShading) -> bool {
        let _ = (state, shading);
        false
    }

    fn radial_shaded_fill(&mut self, state: &GraphicsState, shading: &RadialShading) -> bool {
        let _ = (state, shading);
        false
    }

    fn gouraud_triangle_shaded_fill(&mut self, state: &GraphicsState, shading: &GouraudShading) -> bool {
        let _ = (state, shading);
        false
    }

    // ===== Transparency =====

    /// Whether a form drawn with this state needs its own group.
    fn check_transparency_group(&mut self, state: &GraphicsState, knockout: bool) -> bool {
        let _ = (state, knockout);
        true
    }

    /// Open a transparency group.
    ///
    /// # Arguments
    /// * `bbox` - Group box in user space
    /// * `blending_space` - The group's `/CS`, if any
    /// * `for_soft_mask` - The group will become a soft mask rather than
    ///   visible paint
    fn begin_transparency_group(
        &mut self,
        state: &GraphicsState,
        bbox: &Rect,
        blending_space: Option<&ColorSpace>,
        isolated: bool,
        knockout: bool,
        for_soft_mask: bool,
    ) {
        let _ = (state, bbox, blending_space, isolated, knockout, for_soft_mask);
    }

    fn end_transparency_group(&mut self, state: &GraphicsState) {
        let _ = state;
    }

    /// Composite the group closed by the last
    /// [`OutputDevice::end_transparency_group`].
    fn paint_transparency_group(&mut self, state: &GraphicsState, bbox: &Rect) {
        let _ = (state, bbox);
    }

    /// Turn the last closed group into the soft mask.
    ///
    /// # Arguments
    /// * `alpha` - Use the group's alpha rather than its luminosity
    /// * `transfer` - Optional `/TR` function applied to mask values
    /// * `backdrop` - `/BC` color in the group's blending space
    fn set_soft_mask(
        &mut self,
        state: &GraphicsState,
        bbox: &Rect,
        alpha: bool,
        transfer: Option<&FunctionRef>,
        backdrop: &GfxColor,
    ) {
        let _ = (state, bbox, alpha, transfer, backdrop);
    }

    fn clear_soft_mask(&mut self, state: &GraphicsState) {
        let _ = state;
    }
}
