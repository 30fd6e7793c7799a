//! Transparency groups and soft masks.
//!
//! Opening a group swaps a fresh [`RenderContext`] in for the current one
//! and parks the parent on a frame stack. Closing it hands the parent back
//! but keeps the frame (and the finished group canvas) until the caller
//! either paints the group or turns it into a soft mask.

use std::rc::Rc;

use log::{debug, warn};

use super::canvas::{Canvas, ColorMode, DeviceColor, MAX_COLOR_COMPS};
use super::color::{ColorSpace, GfxColor, col_to_byte};
use super::context::{GroupComposite, Knockout, RenderContext, SoftMask};
use super::function::FunctionRef;
use super::graphics_state::GraphicsState;
use crate::core::error::{RasterError, RasterResult};
use crate::core::geometry::{PixelRect, Rect};

/// One open (or closed but not yet consumed) transparency group.
#[derive(Debug)]
pub struct GroupFrame {
    /// Page pixel of the group canvas origin
    pub origin: (i32, i32),
    pub isolated: bool,
    /// Children painted into this group replace rather than accumulate
    pub knockout: bool,
    /// Initial backdrop of a non-isolated knockout group
    pub shape: Option<Rc<Canvas>>,
    /// Smallest fill or stroke opacity seen while the frame was on top
    pub knockout_opacity: f64,
    pub blending_space: Option<ColorSpace>,
    /// The group canvas uses a different color mode than its parent
    pub mode_switched: bool,
    parent: Option<RenderContext>,
    finished: Option<Canvas>,
    /// Marks made while the group was open, when its context tracked them
    finished_shape: Option<Vec<u8>>,
}

/// Color mode of a group canvas. Isolated soft-mask groups render in
/// their blending space.
pub fn group_color_mode(
    parent: ColorMode,
    for_soft_mask: bool,
    isolated: bool,
    blending_space: Option<&ColorSpace>,
) -> ColorMode {
    if !(for_soft_mask && isolated) {
        return parent;
    }
    match blending_space {
        Some(ColorSpace::DeviceGray) => ColorMode::Mono8,
        Some(ColorSpace::DeviceRgb) => ColorMode::Rgb8,
        Some(ColorSpace::DeviceCmyk) => ColorMode::Cmyk8,
        _ => parent,
    }
}

/// A color in `space` as device bytes for `mode`, without spot handling.
pub fn backdrop_color(space: &ColorSpace, color: &[f64], mode: ColorMode) -> DeviceColor {
    let mut out = [0u8; MAX_COLOR_COMPS];
    match mode {
        ColorMode::Mono1 | ColorMode::Mono8 => out[0] = col_to_byte(space.to_gray(color)),
        ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8 => {
            for (o, v) in out.iter_mut().zip(space.to_rgb(color)) {
                *o = col_to_byte(v);
            }
        }
        ColorMode::Cmyk8 | ColorMode::DeviceN8 => {
            for (o, v) in out.iter_mut().zip(space.to_cmyk(color)) {
                *o = col_to_byte(v);
            }
        }
    }
    out
}

/// Luminosity of a device color in `[0, 1]`.
pub fn luminosity(c: &DeviceColor, mode: ColorMode) -> f64 {
    match mode {
        ColorMode::Mono1 | ColorMode::Mono8 => c[0] as f64 / 255.0,
        ColorMode::Rgb8 | ColorMode::Bgr8 | ColorMode::Xbgr8 => {
            (0.3 / 255.0) * c[0] as f64 + (0.59 / 255.0) * c[1] as f64 + (0.11 / 255.0) * c[2] as f64
        }
        ColorMode::Cmyk8 | ColorMode::DeviceN8 => {
            let l = (1.0 - c[3] as f64 / 255.0)
                - (0.3 / 255.0) * c[0] as f64
                - (0.59 / 255.0) * c[1] as f64
                - (0.11 / 255.0) * c[2] as f64;
            l.max(0.0)
        }
    }
}

fn apply_transfer(transfer: Option<&FunctionRef>, v: f64) -> u8 {
    let v = match transfer {
        Some(f) => {
            let mut out = [0.0f64; 1];
            f.transform(&[v], &mut out);
            out[0]
        }
        None => v,
    };
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// The group stack.
#[derive(Debug, Default)]
pub struct TransparencyEngine {
    frames: Vec<GroupFrame>,
}

impl TransparencyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<&GroupFrame> {
        self.frames.last()
    }

    /// Forget every frame (used when a page is abandoned mid-group).
    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Whether a draw with this state must be wrapped in its own group.
    /// Inside a non-isolated knockout group every draw needs one, so
    /// siblings knock each other out.
    pub fn needs_group(&self, state: &GraphicsState, soft_mask_active: bool, knockout: bool) -> bool {
        if state.fill_opacity != 1.0
            || state.stroke_opacity != 1.0
            || state.alpha_is_shape
            || state.blend_mode != super::blend::BlendMode::Normal
            || soft_mask_active
            || knockout
        {
            return true;
        }
        self.frames.last().is_some_and(|f| f.shape.is_some())
    }

    /// Fold a fill or stroke opacity into the top frame's minimum.
    pub fn note_opacity(&mut self, opacity: f64) {
        if let Some(f) = self.frames.last_mut() {
            f.knockout_opacity = f.knockout_opacity.min(opacity);
        }
    }

    /// Device pixels a group with this device-space box occupies inside
    /// the current canvas; never empty.
    pub fn group_region(ctx: &RenderContext, bbox: &Rect) -> PixelRect {
        let pb = ctx.page_bounds();
        let (x_lo, x_hi) = (pb.x0 as f64, (pb.x1 - 1) as f64);
        let (y_lo, y_hi) = (pb.y0 as f64, (pb.y1 - 1) as f64);
        let (x_min, y_min, x_max, y_max) = if bbox.is_finite() {
            (bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max)
        } else {
            (x_lo, y_lo, pb.x1 as f64, pb.y1 as f64)
        };
        // Clamped in f64 so far-off boxes never reach the integer casts.
        let tx = x_min.floor().clamp(x_lo, x_hi) as i32;
        let ty = y_min.floor().clamp(y_lo, y_hi) as i32;
        let x1 = x_max.ceil().clamp(x_lo, pb.x1 as f64) as i32;
        let y1 = y_max.ceil().clamp(y_lo, pb.y1 as f64) as i32;
        let w = x1.saturating_sub(tx).saturating_add(1).min(pb.x1 - tx).max(1);
        let h = y1.saturating_sub(ty).saturating_add(1).min(pb.y1 - ty).max(1);
        PixelRect::new(tx, ty, tx + w, ty + h)
    }

    /// Open a group. `bbox` is the group box already in device space.
    pub fn begin(
        &mut self,
        ctx: &mut RenderContext,
        bbox: &Rect,
        blending_space: Option<ColorSpace>,
        isolated: bool,
        knockout: bool,
        for_soft_mask: bool,
    ) {
        let region = Self::group_region(ctx, bbox);
        let parent_canvas = ctx.canvas();
        let parent_mode = parent_canvas.mode();
        let mode = group_color_mode(parent_mode, for_soft_mask, isolated, blending_space.as_ref());
        let (w, h) = (region.width(), region.height());
        let open_shape = self
            .frames
            .last()
            .filter(|f| f.parent.is_some())
            .and_then(|f| f.shape.as_deref())
            .filter(|s| s.mode() == parent_mode);
        // A non-isolated group replacing pixels must know which ones it marked.
        let track_shape = !isolated && (open_shape.is_some() || ctx.tracks_shape());
        let (canvas, origin) =
            match Canvas::new(w, h, mode, parent_canvas.row_pad(), parent_canvas.is_top_down(), true) {
                Ok(c) => (c, (region.x0, region.y0)),
                Err(e) => {
                    warn!("transparency group fallback to 1x1: {}", e);
                    match Canvas::new(1, 1, mode, 1, parent_canvas.is_top_down(), true) {
                        Ok(c) => (c, (region.x0, region.y0)),
                        Err(_) => (parent_canvas.placeholder(), (region.x0, region.y0)),
                    }
                }
            };
        let mut canvas = canvas;
        canvas.set_separations(parent_canvas.separations().to_vec());
        if isolated {
            let mut clear = [0u8; MAX_COLOR_COMPS];
            if mode == ColorMode::Xbgr8 {
                clear[3] = 255;
            }
            canvas.clear(&clear, 0);
        } else if mode == parent_mode {
            // Inside a non-isolated knockout group every child starts from
            // that group's initial backdrop, not from its earlier siblings.
            let (px, py) = ctx.origin();
            let backdrop = open_shape.unwrap_or(parent_canvas);
            canvas.copy_region_from(backdrop, origin.0 - px, origin.1 - py);
        }
        let shape = (knockout && !isolated).then(|| Rc::new(canvas.clone()));
        debug!(
            "begin group {}x{} at {:?} isolated={} knockout={}",
            canvas.width(),
            canvas.height(),
            origin,
            isolated,
            knockout
        );
        let mut group_ctx = RenderContext::nested(canvas, origin.0, origin.1, ctx);
        if track_shape {
            group_ctx.track_shape();
        }
        let parent = std::mem::replace(ctx, group_ctx);
        self.frames.push(GroupFrame {
            origin,
            isolated,
            knockout: knockout && isolated,
            shape,
            knockout_opacity: 1.0,
            blending_space,
            mode_switched: mode != parent_mode,
            parent: Some(parent),
            finished: None,
            finished_shape: None,
        });
    }

    /// Close the innermost open group, restoring its parent context.
    /// Returns whether the group had switched color modes.
    pub fn end(&mut self, ctx: &mut RenderContext) -> RasterResult<bool> {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.parent.is_some())
            .ok_or_else(|| RasterError::StateViolation("end of group without begin".into()))?;
        let Some(parent) = frame.parent.take() else {
            return Err(RasterError::StateViolation("group already ended".into()));
        };
        let mut group_ctx = std::mem::replace(ctx, parent);
        frame.finished_shape = group_ctx.take_shape();
        frame.finished = Some(group_ctx.into_canvas());
        Ok(frame.mode_switched)
    }

    fn pop_finished(&mut self) -> RasterResult<(GroupFrame, Canvas)> {
        match self.frames.last() {
            Some(f) if f.finished.is_some() => {}
            _ => return Err(RasterError::StateViolation("no finished group to consume".into())),
        }
        let mut frame = self
            .frames
            .pop()
            .ok_or_else(|| RasterError::StateViolation("empty group stack".into()))?;
        let canvas = frame
            .finished
            .take()
            .ok_or_else(|| RasterError::StateViolation("group not finished".into()))?;
        Ok((frame, canvas))
    }

    /// Composite the finished group onto the current context.
    pub fn paint(&mut self, ctx: &mut RenderContext) -> RasterResult<()> {
        let (frame, canvas) = self.pop_finished()?;
        let next = self.frames.last_mut();
        let knockout_opacity = next
            .as_ref()
            .map_or(frame.knockout_opacity, |n| n.knockout_opacity);
        let (into_knockout, backdrop) = match next.as_ref() {
            Some(n) => (n.knockout, n.shape.clone()),
            None => (false, None),
        };
        let how = GroupComposite {
            non_isolated: !frame.isolated,
            knockout: into_knockout.then(|| Knockout {
                backdrop: backdrop.as_deref(),
                opacity: knockout_opacity,
            }),
            shape: frame.finished_shape.as_deref(),
        };
        ctx.composite_group(&canvas, frame.origin.0, frame.origin.1, how);
        if let Some(n) = next {
            if n.shape.is_some() {
                n.knockout = true;
            }
            n.knockout_opacity = n.knockout_opacity.min(frame.knockout_opacity);
        }
        Ok(())
    }

    /// Turn the finished group into the current context's soft mask.
    pub fn set_soft_mask(
        &mut self,
        ctx: &mut RenderContext,
        alpha: bool,
        transfer: Option<&FunctionRef>,
        backdrop: &GfxColor,
    ) -> RasterResult<()> {
        let (frame, mut group) = self.pop_finished()?;
        let mode = group.mode();
        if !alpha && mode != ColorMode::Mono1 {
            if let Some(space) = &frame.blending_space {
                group.composite_background(&backdrop_color(space, backdrop, mode));
            }
        }
        let target = ctx.canvas();
        let mut mask = Canvas::mono8(target.width(), target.height())?;
        let fill = frame
            .blending_space
            .as_ref()
            .map_or(0, |s| col_to_byte(s.to_gray(backdrop)));
        let mut fill_color = [0u8; MAX_COLOR_COMPS];
        fill_color[0] = fill;
        mask.clear(&fill_color, 255);
        let (px, py) = ctx.origin();
        let (dx, dy) = (frame.origin.0 - px, frame.origin.1 - py);
        for y in 0..group.height() as i32 {
            for x in 0..group.width() as i32 {
                if !mask.contains(x + dx, y + dy) {
                    continue;
                }
                let v = if alpha {
                    match transfer {
                        Some(_) => apply_transfer(transfer, group.alpha(x, y) as f64 / 255.0),
                        None => group.alpha(x, y),
                    }
                } else {
                    apply_transfer(transfer, luminosity(&group.pixel(x, y), mode))
                };
                let mut c = [0u8; MAX_COLOR_COMPS];
                c[0] = v;
                mask.set_pixel(x + dx, y + dy, &c);
            }
        }
        ctx.state_mut().soft_mask = Some(SoftMask::new(mask, px, py));
        Ok(())
    }

    pub fn clear_soft_mask(ctx: &mut RenderContext) {
        ctx.state_mut().soft_mask = None;
    }

    /// Drop the innermost frame without painting it. A frame that was
    /// never ended hands its parent context back. Returns whether that
    /// undid a color-mode switch.
    pub fn abandon(&mut self, ctx: &mut RenderContext) -> bool {
        match self.frames.pop() {
            Some(GroupFrame {
                parent: Some(parent),
                mode_switched,
                ..
            }) => {
                *ctx = parent;
                mode_switched
            }
            _ => false,
        }
    }
}
