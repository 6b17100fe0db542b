//! Crate-level constants.

/// Default number of elements in each of the A, B and C arrays (2^25).
pub const ARRAY_SIZE: usize = 33_554_432;

/// Default number of timed iterations.
pub const NUM_TIMES: u32 = 100;

/// Default initial value of every element of A.
pub const START_A: f64 = 0.1;

/// Default initial value of every element of B.
pub const START_B: f64 = 0.2;

/// Default initial value of every element of C.
pub const START_C: f64 = 0.0;

/// Default scalar used by the `mul` and `triad` kernels.
pub const START_SCALAR: f64 = 0.4;

/// Work-group / thread-block size used by the device backends for element-wise kernels.
pub const BLOCK_SIZE_1D: usize = 1024;

/// Work-group / thread-block size used by the device `dot` reduction.
pub const DOT_BLOCK_SIZE: usize = 256;

/// Number of work-groups / thread-blocks launched by the device `dot` reduction.
// NOTE: each group writes one partial sum, which is then reduced on the host.
pub const DOT_NUM_BLOCKS: usize = 256;

/// Multiple of the element type's machine epsilon tolerated per array element during validation.
pub const EPSILON_FACTOR: f64 = 100.0;

/// Maximum relative error of the dot product in double precision.
pub const DOT_TOLERANCE_F64: f64 = 1.0e-8;

/// Maximum relative error of the dot product in single precision.
pub const DOT_TOLERANCE_F32: f64 = 1.0e-3;
