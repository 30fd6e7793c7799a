//! Shading dictionaries, already resolved by the interpreter.

use super::color::{ColorSpace, GfxColor};
use super::function::FunctionRef;
use crate::core::geometry::{Matrix, Rect};

/// Evaluate shading functions at `input`: either one function with an
/// output per color component, or one single-output function per
/// component.
pub fn eval_shading_functions(funcs: &[FunctionRef], input: &[f64], n_comps: usize) -> GfxColor {
    let mut out: GfxColor = smallvec::smallvec![0.0; n_comps];
    match funcs {
        [] => {}
        [single] => {
            if single.output_size() >= n_comps {
                single.transform(input, &mut out);
            } else {
                let mut tmp: GfxColor = smallvec::smallvec![0.0; single.output_size().max(1)];
                single.transform(input, &mut tmp);
                for (o, v) in out.iter_mut().zip(tmp.iter()) {
                    *o = *v;
                }
            }
        }
        many => {
            let mut tmp = [0.0f64; 1];
            for (o, f) in out.iter_mut().zip(many.iter()) {
                f.transform(input, &mut tmp);
                *o = tmp[0];
            }
        }
    }
    out
}

/// Numeric shading type as written in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingKind {
    Function = 1,
    Axial = 2,
    Radial = 3,
    FreeFormGouraud = 4,
    LatticeGouraud = 5,
    Coons = 6,
    TensorPatch = 7,
}

/// Type 1: color as a function of `(x, y)` over a rectangular domain.
#[derive(Debug, Clone)]
pub struct FunctionShading {
    pub color_space: ColorSpace,
    /// `[x0, x1, y0, y1]`
    pub domain: [f64; 4],
    /// Domain space to shading (pattern) space
    pub matrix: Matrix,
    pub functions: Vec<FunctionRef>,
    pub bbox: Option<Rect>,
}

/// Type 2: color varies along the axis from `(x0, y0)` to `(x1, y1)`.
#[derive(Debug, Clone)]
pub struct AxialShading {
    pub color_space: ColorSpace,
    /// `[x0, y0, x1, y1]`
    pub coords: [f64; 4],
    pub domain: [f64; 2],
    pub extend: [bool; 2],
    pub functions: Vec<FunctionRef>,
    pub bbox: Option<Rect>,
}

/// Type 3: color varies across circles swept from `(x0, y0, r0)` to
/// `(x1, y1, r1)`.
#[derive(Debug, Clone)]
pub struct RadialShading {
    pub color_space: ColorSpace,
    /// `[x0, y0, r0, x1, y1, r1]`
    pub coords: [f64; 6],
    pub domain: [f64; 2],
    pub extend: [bool; 2],
    pub functions: Vec<FunctionRef>,
    pub bbox: Option<Rect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GouraudVertex {
    pub x: f64,
    pub y: f64,
    /// Color components, or a single parameter when the shading has
    /// functions
    pub color: GfxColor,
}

/// Types 4 and 5, flattened to triangles.
#[derive(Debug, Clone)]
pub struct GouraudShading {
    pub color_space: ColorSpace,
    pub triangles: Vec<[GouraudVertex; 3]>,
    /// Empty unless vertices carry a parameter
    pub functions: Vec<FunctionRef>,
    pub bbox: Option<Rect>,
}

impl GouraudShading {
    pub fn is_parameterized(&self) -> bool {
        !self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::function::ExponentialFunction;
    use std::rc::Rc;

    #[test]
    fn test_single_function_many_outputs() {
        let f: FunctionRef = Rc::new(ExponentialFunction::new(vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0], 1.0));
        let c = eval_shading_functions(&[f], &[0.25], 3);
        assert_eq!(c.as_slice(), &[0.25, 0.0, 0.75]);
    }

    #[test]
    fn test_function_per_component() {
        let up: FunctionRef = Rc::new(ExponentialFunction::identity());
        let down: FunctionRef = Rc::new(ExponentialFunction::new(vec![1.0], vec![0.0], 1.0));
        let c = eval_shading_functions(&[up, down], &[0.25], 2);
        assert_eq!(c.as_slice(), &[0.25, 0.75]);
    }
}
