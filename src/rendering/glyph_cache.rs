//! Bitmap cache for procedural (Type 3) glyphs.
//!
//! Up to [`FONT_CACHE_CAPACITY`] font caches are resident, keyed by font
//! identity and the 2x2 part of the glyph transform, and evicted as whole
//! caches in least-recently-used order. Each font cache is a
//! set-associative arena: a glyph code hashes to one set and may live in
//! any of its ways, the oldest way being replaced on a store.

use std::num::NonZeroUsize;

use log::{debug, warn};
use lru::LruCache;

use super::context::RenderContext;
use super::graphics_state::FontId;
use crate::core::geometry::{Matrix, Rect};

/// Resident font caches before whole-cache eviction.
pub const FONT_CACHE_CAPACITY: usize = 8;

const CACHE_ASSOC: usize = 8;
const CACHE_MAX_SETS: usize = 8;
/// Target arena size per font cache
const CACHE_TARGET_BYTES: usize = 128 * 1024;
/// Glyphs at or above `ARENA_CEILING / ways` bytes are never cached
const ARENA_CEILING: usize = 10_485_760;
/// Larger declared glyph boxes are assumed bogus
const MAX_GLYPH_AREA: usize = 100_000;
const GLYPH_MARGIN: i32 = 2;
/// Bound on glyph origins and bitmap offsets, in device pixels
pub const MAX_GLYPH_OFFSET: f64 = 16_777_216.0;

/// Identifies one font cache: a font at one glyph-space-to-device scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontCacheKey {
    font: FontId,
    matrix: [u64; 4],
}

impl FontCacheKey {
    pub fn new(font: FontId, m: &Matrix) -> Self {
        FontCacheKey {
            font,
            matrix: [m.0[0].to_bits(), m.0[1].to_bits(), m.0[2].to_bits(), m.0[3].to_bits()],
        }
    }

    pub fn font(&self) -> FontId {
        self.font
    }
}

/// Glyph bitmap geometry relative to the glyph origin's pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphBox {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
}

impl GlyphBox {
    /// Derive the bitmap box from the font's bounding box in device space,
    /// with the glyph origin at `(xt, yt)`. The flag reports whether the
    /// declared box can be trusted for ink validation.
    pub fn from_bounds(device_bbox: Option<Rect>, xt: f64, yt: f64) -> (GlyphBox, bool) {
        let fallback = |xt: f64, yt: f64| {
            let x_min = xt - 5.0;
            let y_max = yt + 15.0;
            Rect::new(x_min, y_max - 45.0, x_min + 30.0, y_max)
        };
        let (bbox, mut valid) = match device_bbox {
            Some(b) if b.is_finite() => (b, true),
            _ => (fallback(xt, yt), false),
        };
        let margin = 2.0 * GLYPH_MARGIN as f64;
        let w = bbox.x_max.ceil() - bbox.x_min.floor() + margin;
        let h = bbox.y_max.ceil() - bbox.y_min.floor() + margin;
        let sane = w > 0.0 && h > 0.0 && w * h <= MAX_GLYPH_AREA as f64;
        let offset = |v: f64| {
            let v = v.floor() - GLYPH_MARGIN as f64;
            (v.abs() <= MAX_GLYPH_OFFSET).then_some(v as i32)
        };
        let origin = offset(bbox.x_min - xt).zip(offset(bbox.y_min - yt));
        let (x, y) = match origin {
            Some(o) => o,
            None => {
                // Far-off boxes place the bitmap as for a missing one.
                valid = false;
                let f = fallback(xt, yt);
                (
                    (f.x_min - xt).floor() as i32 - GLYPH_MARGIN,
                    (f.y_min - yt).floor() as i32 - GLYPH_MARGIN,
                )
            }
        };
        let (width, height) = if sane {
            (w as usize, h as usize)
        } else {
            valid = false;
            (100, 100)
        };
        (GlyphBox { x, y, width, height }, valid)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Whether a device-space ink box, relative to the glyph origin, fits.
    pub fn contains(&self, ink: &Rect, xt: f64, yt: f64) -> bool {
        ink.x_min - xt >= self.x as f64
            && ink.y_min - yt >= self.y as f64
            && ink.x_max - xt <= (self.x + self.width as i32) as f64
            && ink.y_max - yt <= (self.y + self.height as i32) as f64
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CacheWay {
    code: Option<u32>,
    last_used: u64,
}

/// Set-associative glyph bitmaps for one font at one scale.
#[derive(Debug)]
pub struct Type3FontCache {
    glyph: GlyphBox,
    valid_bbox: bool,
    sets: usize,
    ways: Vec<CacheWay>,
    arena: Vec<u8>,
    tick: u64,
}

impl Type3FontCache {
    pub fn new(glyph: GlyphBox, valid_bbox: bool) -> Self {
        let size = glyph.area();
        let mut sets = CACHE_MAX_SETS;
        while sets > 1 && sets * CACHE_ASSOC * size > CACHE_TARGET_BYTES {
            sets >>= 1;
        }
        let mut arena = Vec::new();
        let mut ways = Vec::new();
        if size < ARENA_CEILING / CACHE_ASSOC / sets && arena.try_reserve_exact(sets * CACHE_ASSOC * size).is_ok() {
            arena.resize(sets * CACHE_ASSOC * size, 0);
            ways = vec![CacheWay::default(); sets * CACHE_ASSOC];
        } else {
            warn!("Type 3 glyph box {}x{} too large to cache", glyph.width, glyph.height);
        }
        Type3FontCache {
            glyph,
            valid_bbox,
            sets,
            ways,
            arena,
            tick: 0,
        }
    }

    pub fn glyph_box(&self) -> GlyphBox {
        self.glyph
    }

    pub fn has_valid_bbox(&self) -> bool {
        self.valid_bbox
    }

    pub fn sets(&self) -> usize {
        self.sets
    }

    /// False when the arena could not be allocated; glyphs are then
    /// rendered every time.
    pub fn can_store(&self) -> bool {
        !self.ways.is_empty()
    }

    fn set_range(&self, code: u32) -> std::ops::Range<usize> {
        let first = (code as usize & (self.sets - 1)) * CACHE_ASSOC;
        first..first + CACHE_ASSOC
    }

    /// The cached bitmap for `code`, refreshing its recency.
    pub fn lookup(&mut self, code: u32) -> Option<&[u8]> {
        if !self.can_store() {
            return None;
        }
        let size = self.glyph.area();
        let slot = self.set_range(code).find(|&i| self.ways[i].code == Some(code))?;
        self.tick += 1;
        self.ways[slot].last_used = self.tick;
        Some(&self.arena[slot * size..(slot + 1) * size])
    }

    /// Store a finished bitmap, replacing the oldest way of its set.
    pub fn store(&mut self, code: u32, bitmap: &[u8]) -> bool {
        let size = self.glyph.area();
        if !self.can_store() || bitmap.len() != size {
            return false;
        }
        let range = self.set_range(code);
        let slot = range
            .clone()
            .find(|&i| self.ways[i].code == Some(code))
            .or_else(|| range.min_by_key(|&i| (self.ways[i].code.is_some(), self.ways[i].last_used)));
        let Some(slot) = slot else {
            return false;
        };
        self.tick += 1;
        self.ways[slot] = CacheWay {
            code: Some(code),
            last_used: self.tick,
        };
        self.arena[slot * size..(slot + 1) * size].copy_from_slice(bitmap);
        true
    }
}

/// The resident font caches.
#[derive(Debug)]
pub struct GlyphCache {
    fonts: LruCache<FontCacheKey, Type3FontCache>,
    enabled: bool,
}

impl GlyphCache {
    pub fn new(enabled: bool) -> Self {
        let cap = NonZeroUsize::new(FONT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        GlyphCache {
            fonts: LruCache::new(cap),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Drop every resident cache.
    pub fn clear(&mut self) {
        self.fonts.clear();
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn contains(&self, key: &FontCacheKey) -> bool {
        self.fonts.contains(key)
    }

    /// Find or create the cache for `key`, promoting it to most recently
    /// used. `in_use` lists caches that in-flight glyph renders will store
    /// into; they are never evicted, and `None` is returned when the only
    /// candidate is one of them.
    pub fn font_cache(
        &mut self,
        key: FontCacheKey,
        in_use: &[FontCacheKey],
        make: impl FnOnce() -> (GlyphBox, bool),
    ) -> Option<&mut Type3FontCache> {
        if !self.fonts.contains(&key) {
            if self.fonts.len() >= self.fonts.cap().get() {
                let lru_key = self.fonts.peek_lru().map(|(k, _)| *k);
                if let Some(lru_key) = lru_key {
                    if in_use.contains(&lru_key) {
                        warn!("Type 3 font cache full while its oldest entry is still rendering");
                        return None;
                    }
                    debug!("evicting Type 3 font cache for {:?}", lru_key.font);
                    self.fonts.pop_lru();
                }
            }
            let (glyph, valid) = make();
            debug!(
                "new Type 3 font cache for {:?}: {}x{} glyphs",
                key.font, glyph.width, glyph.height
            );
            self.fonts.put(key, Type3FontCache::new(glyph, valid));
        }
        self.fonts.get_mut(&key)
    }

    /// A resident cache without changing recency.
    pub fn peek_mut(&mut self, key: &FontCacheKey) -> Option<&mut Type3FontCache> {
        self.fonts.peek_mut(key)
    }
}

/// One in-flight procedural glyph render.
#[derive(Debug)]
pub struct GlyphRenderFrame {
    pub key: FontCacheKey,
    pub code: u32,
    pub glyph: GlyphBox,
    /// Glyph origin pixel on the parent
    pub origin: (i32, i32),
    /// Glyph origin in device space, unrounded
    pub xt: f64,
    pub yt: f64,
    /// Context the glyph will be painted into
    pub parent: RenderContext,
    /// `d0` or `d1` has been seen
    pub have_dx: bool,
    /// `d1` was seen: the glyph is a coverage mask painted with the fill
    pub uncolored: bool,
    /// Storing the result is still allowed
    pub cacheable: bool,
    /// The font cache validated the declared box
    pub valid_bbox: bool,
}

impl GlyphRenderFrame {
    /// Page pixel of the glyph bitmap's top-left corner.
    pub fn bitmap_origin(&self) -> (i32, i32) {
        (self.origin.0 + self.glyph.x, self.origin.1 + self.glyph.y)
    }
}
