//! Utility functions and traits.

use crate::consts;

use std::{
    fmt,
    ops::{Add, AddAssign, Mul, MulAssign},
};

/// Element precision of a benchmark run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    /// Size in bytes of one element.
    pub const fn elem_size(self) -> usize {
        match self {
            Self::Single => std::mem::size_of::<f32>(),
            Self::Double => std::mem::size_of::<f64>(),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "float"),
            Self::Double => write!(f, "double"),
        }
    }
}

/// Extra bound required by the OpenCL backend on element types.
#[cfg(feature = "opencl")]
pub trait ClPrm: ocl::OclPrm {}
#[cfg(feature = "opencl")]
impl<T: ocl::OclPrm> ClPrm for T {}

#[cfg(not(feature = "opencl"))]
pub trait ClPrm {}
#[cfg(not(feature = "opencl"))]
impl<T> ClPrm for T {}

/// Extra bound required by the CUDA backend on element types.
#[cfg(feature = "cuda")]
pub trait CudaPrm: cust::memory::DeviceCopy {}
#[cfg(feature = "cuda")]
impl<T: cust::memory::DeviceCopy> CudaPrm for T {}

#[cfg(not(feature = "cuda"))]
pub trait CudaPrm {}
#[cfg(not(feature = "cuda"))]
impl<T> CudaPrm for T {}

/// Utility trait that generalizes floating-point types in the benchmark and implements common
/// functionnalities needed by the backends, the validator and the reporter.
///
/// The precision is exposed as associated constants so that callers never have to inspect the
/// type at runtime.
pub trait StreamFloat:
    num::Float
    + Default
    + Add
    + AddAssign
    + Mul
    + MulAssign
    + Send
    + Sync
    + fmt::Debug
    + fmt::Display
    + ClPrm
    + CudaPrm
    + 'static
{
    /// Precision tag of the type.
    const PRECISION: Precision;
    /// Name of the type in OpenCL C.
    const CL_TYPE: &'static str;
    /// Name of the type in PTX.
    const PTX_TYPE: &'static str;
    /// Maximum relative error tolerated on the dot product.
    const DOT_TOLERANCE: f64;

    /// Lossy conversion from a double-precision configuration value.
    fn from_f64_lossy(x: f64) -> Self;

    /// Exact conversion to double precision.
    fn widen(self) -> f64;

    /// Per-element validation tolerance, relative to `max(1, |expected|)`.
    fn tolerance() -> Self {
        Self::epsilon() * Self::from_f64_lossy(consts::EPSILON_FACTOR)
    }
}

impl StreamFloat for f32 {
    const PRECISION: Precision = Precision::Single;
    const CL_TYPE: &'static str = "float";
    const PTX_TYPE: &'static str = "f32";
    const DOT_TOLERANCE: f64 = consts::DOT_TOLERANCE_F32;

    fn from_f64_lossy(x: f64) -> Self {
        x as f32
    }

    fn widen(self) -> f64 {
        self as f64
    }
}

impl StreamFloat for f64 {
    const PRECISION: Precision = Precision::Double;
    const CL_TYPE: &'static str = "double";
    const PTX_TYPE: &'static str = "f64";
    const DOT_TOLERANCE: f64 = consts::DOT_TOLERANCE_F64;

    fn from_f64_lossy(x: f64) -> Self {
        x
    }

    fn widen(self) -> f64 {
        self
    }
}

/// Initial array values and scalar of a run.
///
/// Kept as plain `f64` configuration and converted to the element type by whoever consumes it, so
/// that the backend and the validator start from the exact same values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StartValues {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub scalar: f64,
}

impl Default for StartValues {
    fn default() -> Self {
        Self {
            a: consts::START_A,
            b: consts::START_B,
            c: consts::START_C,
            scalar: consts::START_SCALAR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_precision_is_looser() {
        assert!(f32::tolerance() as f64 > f64::tolerance());
        assert!(f32::DOT_TOLERANCE > f64::DOT_TOLERANCE);
    }

    #[test]
    fn precision_tags() {
        assert_eq!(<f32 as StreamFloat>::PRECISION, Precision::Single);
        assert_eq!(<f64 as StreamFloat>::PRECISION, Precision::Double);
        assert_eq!(Precision::Double.to_string(), "double");
    }

    #[test]
    fn default_start_values() {
        let v = StartValues::default();
        assert_eq!((v.a, v.b, v.c, v.scalar), (0.1, 0.2, 0.0, 0.4));
    }
}
