//! Affine transforms and rectangles in user and device space.
//!
//! Matrices use the PDF row layout `[a b c d e f]`:
//! ```text
//! | a c e |
//! | b d f |
//! | 0 0 1 |
//! ```
//! so a point maps to `(a*x + c*y + e, b*x + d*y + f)`.

use tiny_skia::Transform;

/// A 2D affine transform in PDF layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f64; 6]);

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[f64; 6]> for Matrix {
    fn from(m: [f64; 6]) -> Self {
        Matrix(m)
    }
}

impl Matrix {
    pub const fn identity() -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    }

    pub const fn translate(tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Matrix([sx, 0.0, 0.0, sy, 0.0, 0.0])
    }

    /// Concatenate `inner` so that it is applied before `self`
    /// (the PDF `cm` operator).
    pub fn concat(&mut self, inner: &Matrix) {
        *self = inner.then(self);
    }

    /// The transform that applies `self` first and `outer` second.
    pub fn then(&self, outer: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = outer.0;
        Matrix([
            oa * a + oc * b,
            ob * a + od * b,
            oa * c + oc * d,
            ob * c + od * d,
            oa * e + oc * f + oe,
            ob * e + od * f + of,
        ])
    }

    pub fn determinant(&self) -> f64 {
        self.0[0] * self.0[3] - self.0[1] * self.0[2]
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let [a, b, c, d, e, f] = self.0;
        let inv = 1.0 / det;
        Some(Matrix([
            d * inv,
            -b * inv,
            -c * inv,
            a * inv,
            (c * f - d * e) * inv,
            (b * e - a * f) * inv,
        ]))
    }

    #[inline]
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    /// Transform a vector, ignoring translation.
    #[inline]
    pub fn transform_delta(&self, dx: f64, dy: f64) -> (f64, f64) {
        let [a, b, c, d, _, _] = self.0;
        (a * dx + c * dy, b * dx + d * dy)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Translate the output of this transform by `(tx, ty)`.
    pub fn post_translate(&self, tx: f64, ty: f64) -> Matrix {
        let mut m = *self;
        m.0[4] += tx;
        m.0[5] += ty;
        m
    }

    /// Average expansion factor, used to derive device line widths.
    pub fn expansion(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    pub fn to_skia(&self) -> Transform {
        let [a, b, c, d, e, f] = self.0;
        Transform::from_row(a as f32, b as f32, c as f32, d as f32, e as f32, f as f32)
    }

    /// Device-space bounding box of a user-space rectangle.
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.transform_point(rect.x_min, rect.y_min),
            self.transform_point(rect.x_min, rect.y_max),
            self.transform_point(rect.x_max, rect.y_min),
            self.transform_point(rect.x_max, rect.y_max),
        ];
        let mut out = Rect::new(corners[0].0, corners[0].1, corners[0].0, corners[0].1);
        for (x, y) in &corners[1..] {
            out.x_min = out.x_min.min(*x);
            out.y_min = out.y_min.min(*y);
            out.x_max = out.x_max.max(*x);
            out.y_max = out.y_max.max(*y);
        }
        out
    }
}

/// An axis-aligned rectangle with floating-point bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Rect {
            x_min: x0.min(x1),
            y_min: y0.min(y1),
            x_max: x0.max(x1),
            y_max: y0.max(y1),
        }
    }

    /// Build from a PDF `[x0 y0 x1 y1]` array, normalizing the corners.
    pub fn from_array(bbox: &[f64; 4]) -> Self {
        Rect::new(bbox[0], bbox[1], bbox[2], bbox[3])
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// True when every coordinate is zero, i.e. no box was declared.
    pub fn is_zero(&self) -> bool {
        self.x_min == 0.0 && self.y_min == 0.0 && self.x_max == 0.0 && self.y_max == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x_min.is_finite() && self.y_min.is_finite() && self.x_max.is_finite() && self.y_max.is_finite()
    }

    /// Smallest pixel rectangle covering this one.
    pub fn round_out(&self) -> PixelRect {
        PixelRect {
            x0: self.x_min.floor() as i32,
            y0: self.y_min.floor() as i32,
            x1: self.x_max.ceil() as i32,
            y1: self.y_max.ceil() as i32,
        }
    }
}

/// Half-open integer pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl PixelRect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        PixelRect { x0, y0, x1, y1 }
    }

    pub fn from_size(width: usize, height: usize) -> Self {
        PixelRect::new(0, 0, width as i32, height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    pub fn width(&self) -> usize {
        (self.x1 - self.x0).max(0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y1 - self.y0).max(0) as usize
    }

    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        PixelRect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x0 as f64, self.y0 as f64, self.x1 as f64, self.y1 as f64)
    }
}

/// `a * b` for allocation sizes, `None` on overflow or above `ceiling`.
pub fn checked_area(a: usize, b: usize, ceiling: usize) -> Option<usize> {
    a.checked_mul(b).filter(|&n| n <= ceiling)
}
