//! User-space paths handed over by the interpreter, and their conversion to
//! scan-converter paths.

use crate::core::geometry::{Matrix, Rect};

/// A path element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathElement {
    /// Start a new subpath
    MoveTo(f64, f64),
    LineTo(f64, f64),
    /// Cubic Bézier (cp1x, cp1y, cp2x, cp2y, x, y)
    CurveTo(f64, f64, f64, f64, f64, f64),
    ClosePath,
}

/// A path in user space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    elements: Vec<PathElement>,
    current_point: Option<(f64, f64)>,
    subpath_start: Option<(f64, f64)>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.elements.push(PathElement::MoveTo(x, y));
        self.current_point = Some((x, y));
        self.subpath_start = Some((x, y));
    }

    /// Without a current point this starts a subpath instead.
    pub fn line_to(&mut self, x: f64, y: f64) {
        if self.current_point.is_none() {
            self.move_to(x, y);
            return;
        }
        self.elements.push(PathElement::LineTo(x, y));
        self.current_point = Some((x, y));
    }

    pub fn curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        if self.current_point.is_none() {
            self.move_to(cp1x, cp1y);
        }
        self.elements.push(PathElement::CurveTo(cp1x, cp1y, cp2x, cp2y, x, y));
        self.current_point = Some((x, y));
    }

    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.move_to(x, y);
        self.line_to(x + width, y);
        self.line_to(x + width, y + height);
        self.line_to(x, y + height);
        self.close_path();
    }

    pub fn close_path(&mut self) {
        if self.current_point.is_some() {
            self.elements.push(PathElement::ClosePath);
            self.current_point = self.subpath_start;
        }
    }

    /// Closed rectangle path for a box.
    pub fn from_rect(r: &Rect) -> Path {
        let mut p = Path::new();
        p.rect(r.x_min, r.y_min, r.width(), r.height());
        p
    }

    pub fn current_point(&self) -> Option<(f64, f64)> {
        self.current_point
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Append every element of `other`.
    pub fn append(&mut self, other: &Path) {
        self.elements.extend_from_slice(&other.elements);
        self.current_point = other.current_point.or(self.current_point);
        self.subpath_start = other.subpath_start.or(self.subpath_start);
    }

    /// The same path mapped through `m`.
    pub fn transformed(&self, m: &Matrix) -> Path {
        let tp = |x: f64, y: f64| m.transform_point(x, y);
        let elements = self
            .elements
            .iter()
            .map(|el| match *el {
                PathElement::MoveTo(x, y) => {
                    let (x, y) = tp(x, y);
                    PathElement::MoveTo(x, y)
                }
                PathElement::LineTo(x, y) => {
                    let (x, y) = tp(x, y);
                    PathElement::LineTo(x, y)
                }
                PathElement::CurveTo(a, b, c, d, e, f) => {
                    let (a, b) = tp(a, b);
                    let (c, d) = tp(c, d);
                    let (e, f) = tp(e, f);
                    PathElement::CurveTo(a, b, c, d, e, f)
                }
                PathElement::ClosePath => PathElement::ClosePath,
            })
            .collect();
        Path {
            elements,
            current_point: self.current_point.map(|(x, y)| tp(x, y)),
            subpath_start: self.subpath_start.map(|(x, y)| tp(x, y)),
        }
    }

    /// Control-point bounding box.
    pub fn bounding_box(&self) -> Option<Rect> {
        let mut r: Option<Rect> = None;
        let mut add = |x: f64, y: f64| {
            let b = r.get_or_insert(Rect::new(x, y, x, y));
            b.x_min = b.x_min.min(x);
            b.y_min = b.y_min.min(y);
            b.x_max = b.x_max.max(x);
            b.y_max = b.y_max.max(y);
        };
        for el in &self.elements {
            match *el {
                PathElement::MoveTo(x, y) | PathElement::LineTo(x, y) => add(x, y),
                PathElement::CurveTo(a, b, c, d, e, f) => {
                    add(a, b);
                    add(c, d);
                    add(e, f);
                }
                PathElement::ClosePath => {}
            }
        }
        r
    }

    /// Build a scan-converter path. Fills pass `drop_empty_subpaths` so a
    /// lone `MoveTo` does not mark anything.
    pub fn to_skia(&self, drop_empty_subpaths: bool) -> Option<tiny_skia::Path> {
        let mut pb = tiny_skia::PathBuilder::new();
        let mut pending_move: Option<(f32, f32)> = None;
        for el in &self.elements {
            match *el {
                PathElement::MoveTo(x, y) => {
                    if drop_empty_subpaths {
                        pending_move = Some((x as f32, y as f32));
                    } else {
                        pb.move_to(x as f32, y as f32);
                    }
                }
                PathElement::LineTo(x, y) => {
                    if let Some((mx, my)) = pending_move.take() {
                        pb.move_to(mx, my);
                    }
                    pb.line_to(x as f32, y as f32);
                }
                PathElement::CurveTo(a, b, c, d, e, f) => {
                    if let Some((mx, my)) = pending_move.take() {
                        pb.move_to(mx, my);
                    }
                    pb.cubic_to(a as f32, b as f32, c as f32, d as f32, e as f32, f as f32);
                }
                PathElement::ClosePath => {
                    if pending_move.is_none() {
                        pb.close();
                    }
                }
            }
        }
        pb.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect() {
        let mut path = Path::new();
        path.rect(10.0, 20.0, 100.0, 50.0);
        assert_eq!(path.len(), 5);
        assert_eq!(path.bounding_box(), Some(Rect::new(10.0, 20.0, 110.0, 70.0)));
        assert_eq!(path.current_point(), Some((10.0, 20.0)));
    }

    #[test]
    fn test_implicit_move_to() {
        let mut path = Path::new();
        path.line_to(30.0, 40.0);
        assert_eq!(path.elements(), &[PathElement::MoveTo(30.0, 40.0)]);
    }

    #[test]
    fn test_transformed() {
        let mut path = Path::new();
        path.move_to(1.0, 1.0);
        path.line_to(2.0, 1.0);
        let t = path.transformed(&Matrix([2.0, 0.0, 0.0, 2.0, 5.0, 0.0]));
        assert_eq!(t.elements(), &[PathElement::MoveTo(7.0, 2.0), PathElement::LineTo(9.0, 2.0)]);
        assert_eq!(t.current_point(), Some((9.0, 2.0)));
    }

    #[test]
    fn test_lone_move_dropped_for_fill() {
        let mut path = Path::new();
        path.move_to(1.0, 1.0);
        assert!(path.to_skia(true).is_none());
        path.move_to(0.0, 0.0);
        path.line_to(4.0, 0.0);
        path.line_to(4.0, 4.0);
        path.close_path();
        let sk = path.to_skia(true).unwrap();
        assert_eq!(sk.bounds().width(), 4.0);
    }
}
