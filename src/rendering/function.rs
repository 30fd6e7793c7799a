//! PDF function objects as evaluated by shadings, tint transforms and
//! transfer functions.
//!
//! The interpreter builds these from the document; this layer only calls
//! them.

use std::fmt;
use std::rc::Rc;

/// A PDF function mapping `m` inputs to `n` outputs.
pub trait PdfFunction: fmt::Debug {
    /// Number of inputs the function expects.
    fn input_size(&self) -> usize;

    /// Number of outputs the function writes.
    fn output_size(&self) -> usize;

    /// Evaluate, writing `output_size()` values into `output`.
    fn transform(&self, input: &[f64], output: &mut [f64]);
}

/// Shared handle to a function, as stored in shadings and color spaces.
pub type FunctionRef = Rc<dyn PdfFunction>;

/// Type 2: `C0 + x^N * (C1 - C0)` on a single input.
#[derive(Debug, Clone)]
pub struct ExponentialFunction {
    pub domain: [f64; 2],
    pub c0: Vec<f64>,
    pub c1: Vec<f64>,
    pub exponent: f64,
}

impl ExponentialFunction {
    pub fn new(c0: Vec<f64>, c1: Vec<f64>, exponent: f64) -> Self {
        ExponentialFunction {
            domain: [0.0, 1.0],
            c0,
            c1,
            exponent,
        }
    }

    /// `f(x) = x`, one in, one out.
    pub fn identity() -> Self {
        ExponentialFunction::new(vec![0.0], vec![1.0], 1.0)
    }
}

impl PdfFunction for ExponentialFunction {
    fn input_size(&self) -> usize {
        1
    }

    fn output_size(&self) -> usize {
        self.c0.len()
    }

    fn transform(&self, input: &[f64], output: &mut [f64]) {
        let x = input.first().copied().unwrap_or(0.0).clamp(self.domain[0], self.domain[1]);
        let t = if self.exponent == 1.0 { x } else { x.powf(self.exponent) };
        for (i, out) in output.iter_mut().enumerate().take(self.c0.len()) {
            let c1 = self.c1.get(i).copied().unwrap_or(1.0);
            *out = self.c0[i] + t * (c1 - self.c0[i]);
        }
    }
}

/// Type 3: piecewise combination of one-input functions.
#[derive(Debug, Clone)]
pub struct StitchingFunction {
    pub domain: [f64; 2],
    pub functions: Vec<FunctionRef>,
    /// `functions.len() - 1` interior boundaries
    pub bounds: Vec<f64>,
    /// Two values per function
    pub encode: Vec<f64>,
}

impl PdfFunction for StitchingFunction {
    fn input_size(&self) -> usize {
        1
    }

    fn output_size(&self) -> usize {
        self.functions.first().map(|f| f.output_size()).unwrap_or(0)
    }

    fn transform(&self, input: &[f64], output: &mut [f64]) {
        if self.functions.is_empty() {
            return;
        }
        let x = input.first().copied().unwrap_or(0.0).clamp(self.domain[0], self.domain[1]);
        let k = self.bounds.iter().take_while(|&&b| x >= b).count().min(self.functions.len() - 1);
        let lo = if k == 0 { self.domain[0] } else { self.bounds[k - 1] };
        let hi = self.bounds.get(k).copied().unwrap_or(self.domain[1]);
        let e0 = self.encode.get(2 * k).copied().unwrap_or(0.0);
        let e1 = self.encode.get(2 * k + 1).copied().unwrap_or(1.0);
        let t = if hi > lo { e0 + (x - lo) * (e1 - e0) / (hi - lo) } else { e0 };
        self.functions[k].transform(&[t], output);
    }
}

/// Type 0 restricted to one input: linear interpolation across samples
/// already scaled to the output range.
#[derive(Debug, Clone)]
pub struct SampledFunction {
    pub domain: [f64; 2],
    /// Row of `outputs` values per sample
    pub samples: Vec<f64>,
    pub outputs: usize,
}

impl PdfFunction for SampledFunction {
    fn input_size(&self) -> usize {
        1
    }

    fn output_size(&self) -> usize {
        self.outputs
    }

    fn transform(&self, input: &[f64], output: &mut [f64]) {
        let count = self.samples.len().checked_div(self.outputs).unwrap_or(0);
        if count == 0 {
            return;
        }
        let x = input.first().copied().unwrap_or(0.0).clamp(self.domain[0], self.domain[1]);
        let span = self.domain[1] - self.domain[0];
        let pos = if span > 0.0 { (x - self.domain[0]) / span * (count - 1) as f64 } else { 0.0 };
        let i0 = (pos.floor() as usize).min(count - 1);
        let i1 = (i0 + 1).min(count - 1);
        let frac = pos - i0 as f64;
        for (j, out) in output.iter_mut().enumerate().take(self.outputs) {
            let a = self.samples[i0 * self.outputs + j];
            let b = self.samples[i1 * self.outputs + j];
            *out = a + (b - a) * frac;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential() {
        let f = ExponentialFunction::new(vec![0.0, 1.0], vec![1.0, 0.0], 2.0);
        let mut out = [0.0; 2];
        f.transform(&[0.5], &mut out);
        assert_eq!(out, [0.25, 0.75]);
    }

    #[test]
    fn test_stitching_picks_segment() {
        let f = StitchingFunction {
            domain: [0.0, 1.0],
            functions: vec![
                Rc::new(ExponentialFunction::new(vec![0.0], vec![1.0], 1.0)),
                Rc::new(ExponentialFunction::new(vec![1.0], vec![0.0], 1.0)),
            ],
            bounds: vec![0.5],
            encode: vec![0.0, 1.0, 0.0, 1.0],
        };
        let mut out = [0.0];
        f.transform(&[0.25], &mut out);
        assert_eq!(out[0], 0.5);
        f.transform(&[0.75], &mut out);
        assert_eq!(out[0], 0.5);
        f.transform(&[1.0], &mut out);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_sampled_interpolates() {
        let f = SampledFunction {
            domain: [0.0, 1.0],
            samples: vec![0.0, 1.0, 0.0],
            outputs: 1,
        };
        let mut out = [0.0];
        f.transform(&[0.25], &mut out);
        assert_eq!(out[0], 0.5);
        f.transform(&[1.0], &mut out);
        assert_eq!(out[0], 0.0);
    }
}
