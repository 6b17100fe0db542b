//! Backend kernel providers.
//!
//! A backend owns the three arrays A, B and C for the whole lifetime of a run and implements the
//! five benchmarked kernels over them through the [`Stream`] trait. The harness only ever talks to
//! a `Box<dyn Stream<T>>` built by [`create`] from a [`BackendKind`], so adding a technology means
//! adding a variant and an implementation, never touching the drivers.
//!
//! # Contract
//! - Every call is synchronous: any asynchronous work launched by a kernel is fenced before the
//!   call returns.
//! - Each kernel writes exactly the array it names and never resizes anything.
//! - `read_arrays` copies the arrays to the host in index order and does not mutate them.
//!
//! # Available backends
//! - [`host`]: sequential loops, sequential iterators or `rayon` parallel iterators;
//! - `opencl` (feature `opencl`): OpenCL C kernels through the [`ocl`][1] crate;
//! - `cuda` (feature `cuda`): PTX kernels through the [`cust`][2] crate.
//!
//! [1]: https://crates.io/crates/ocl
//! [2]: https://crates.io/crates/cust

pub mod host;

#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::{
    errors::{BackendError, BackendResult},
    perf_report::KernelKind,
    utils::StreamFloat,
};

use clap::ValueEnum;

use std::fmt;

/// Placeholder returned by backends that cannot name their device.
pub const UNKNOWN_DEVICE_NAME: &str = "Device name unavailable";

/// Placeholder returned by backends that cannot name their driver.
pub const UNKNOWN_DEVICE_DRIVER: &str = "Device driver unavailable";

/// Kernel provider interface every backend implements.
pub trait Stream<T: StreamFloat> {
    /// Sets every element of A, B and C to `init_a`, `init_b` and `init_c` respectively.
    fn init_arrays(&mut self, init_a: T, init_b: T, init_c: T) -> BackendResult<()>;

    /// Copies the current contents of A, B and C to the host.
    fn read_arrays(&self) -> BackendResult<(Vec<T>, Vec<T>, Vec<T>)>;

    /// `C[i] = A[i]`
    fn copy(&mut self) -> BackendResult<()>;

    /// `B[i] = scalar * C[i]`
    fn mul(&mut self) -> BackendResult<()>;

    /// `C[i] = A[i] + B[i]`
    fn add(&mut self) -> BackendResult<()>;

    /// `A[i] = B[i] + scalar * C[i]`
    fn triad(&mut self) -> BackendResult<()>;

    /// `sum(A[i] * B[i])`, the reduction order being left to the backend.
    fn dot(&mut self) -> BackendResult<T>;

    /// Number of elements of each array.
    fn array_size(&self) -> usize;

    /// Human-readable description of the backend and its device.
    fn description(&self) -> String;

    /// Runs `kernel`, returning the sum if it is [`KernelKind::Dot`].
    fn run_kernel(&mut self, kernel: KernelKind) -> BackendResult<Option<T>> {
        match kernel {
            KernelKind::Copy => self.copy().map(|_| None),
            KernelKind::Mul => self.mul().map(|_| None),
            KernelKind::Add => self.add().map(|_| None),
            KernelKind::Triad => self.triad().map(|_| None),
            KernelKind::Dot => self.dot().map(Some),
        }
    }
}

/// Parameters a backend is constructed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackendConfig {
    /// Number of elements of each array.
    pub array_size: usize,
    /// Index of the device to run on.
    pub device: usize,
    /// Worker threads of the `rayon` backend, `0` meaning the runtime default.
    pub threads: usize,
    /// Scalar used by `mul` and `triad`.
    pub scalar: f64,
}

/// Execution technologies a run can be performed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Sequential indexed loops on the host.
    Seq,
    /// Sequential iterator chains on the host.
    Iter,
    /// `rayon` parallel iterators on a dedicated host thread pool.
    Rayon,
    /// OpenCL kernels (requires the `opencl` feature).
    Opencl,
    /// NVIDIA CUDA kernels (requires the `cuda` feature).
    Cuda,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seq => write!(f, "seq"),
            Self::Iter => write!(f, "iter"),
            Self::Rayon => write!(f, "rayon"),
            Self::Opencl => write!(f, "opencl"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

#[cfg(not(all(feature = "opencl", feature = "cuda")))]
fn not_compiled(feature: &str) -> BackendError {
    BackendError::Unavailable(format!("built without the `{feature}` feature"))
}

impl BackendKind {
    /// Lists the devices this backend can run on, one line per device.
    pub fn list_devices(self) -> BackendResult<Vec<String>> {
        match self {
            Self::Seq | Self::Iter | Self::Rayon => Ok(host::list_devices()),
            #[cfg(feature = "opencl")]
            Self::Opencl => opencl::list_devices(),
            #[cfg(not(feature = "opencl"))]
            Self::Opencl => Err(not_compiled("opencl")),
            #[cfg(feature = "cuda")]
            Self::Cuda => cuda::list_devices(),
            #[cfg(not(feature = "cuda"))]
            Self::Cuda => Err(not_compiled("cuda")),
        }
    }

    /// Name of the device at `index`, or a placeholder if it cannot be queried.
    pub fn device_name(self, index: usize) -> String {
        match self {
            #[cfg(feature = "opencl")]
            Self::Opencl => opencl::device_name(index),
            #[cfg(feature = "cuda")]
            Self::Cuda => cuda::device_name(index),
            _ => host::device_name(index),
        }
    }

    /// Driver of the device at `index`, or a placeholder if it cannot be queried.
    pub fn device_driver(self, index: usize) -> String {
        match self {
            #[cfg(feature = "opencl")]
            Self::Opencl => opencl::device_driver(index),
            #[cfg(feature = "cuda")]
            Self::Cuda => cuda::device_driver(index),
            _ => host::device_driver(index),
        }
    }
}

/// Builds the backend selected by `kind` and allocates its arrays.
pub fn create<T: StreamFloat>(
    kind: BackendKind,
    config: &BackendConfig,
) -> BackendResult<Box<dyn Stream<T>>> {
    let scalar = T::from_f64_lossy(config.scalar);
    match kind {
        BackendKind::Seq => Ok(Box::new(host::HostStream::new(
            config.array_size,
            config.device,
            scalar,
            host::HostKernelVariant::SeqNaive,
            config.threads,
        )?)),
        BackendKind::Iter => Ok(Box::new(host::HostStream::new(
            config.array_size,
            config.device,
            scalar,
            host::HostKernelVariant::SeqIter,
            config.threads,
        )?)),
        BackendKind::Rayon => Ok(Box::new(host::HostStream::new(
            config.array_size,
            config.device,
            scalar,
            host::HostKernelVariant::ParIter,
            config.threads,
        )?)),
        #[cfg(feature = "opencl")]
        BackendKind::Opencl => Ok(Box::new(opencl::OclStream::new(
            config.array_size,
            config.device,
            scalar,
        )?)),
        #[cfg(not(feature = "opencl"))]
        BackendKind::Opencl => Err(not_compiled("opencl")),
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => Ok(Box::new(cuda::CudaStream::new(
            config.array_size,
            config.device,
            scalar,
        )?)),
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => Err(not_compiled("cuda")),
    }
}

/// Rejects array sizes no backend can allocate.
pub(crate) fn check_array_size(array_size: usize) -> BackendResult<()> {
    if array_size == 0 {
        return Err(BackendError::Allocation(
            "array size must be at least 1 element".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(array_size: usize) -> BackendConfig {
        BackendConfig {
            array_size,
            device: 0,
            threads: 2,
            scalar: 0.4,
        }
    }

    #[test]
    fn empty_arrays_fail_allocation() {
        for kind in [BackendKind::Seq, BackendKind::Iter, BackendKind::Rayon] {
            let res = create::<f64>(kind, &config(0));
            assert!(matches!(res, Err(BackendError::Allocation(_))), "{kind}");
        }
    }

    #[test]
    fn factory_builds_every_host_backend() {
        for kind in [BackendKind::Seq, BackendKind::Iter, BackendKind::Rayon] {
            let stream = create::<f32>(kind, &config(3)).unwrap();
            assert_eq!(stream.array_size(), 3);
        }
    }

    #[test]
    fn run_kernel_dispatches() {
        let mut stream = create::<f64>(BackendKind::Seq, &config(4)).unwrap();
        stream.init_arrays(1.0, 2.0, 0.0).unwrap();
        assert_eq!(stream.run_kernel(KernelKind::Dot).unwrap(), Some(8.0));
        assert_eq!(stream.run_kernel(KernelKind::Copy).unwrap(), None);
        let (_, _, c) = stream.read_arrays().unwrap();
        assert_eq!(c, vec![1.0; 4]);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn missing_technology_is_unavailable() {
        let res = create::<f64>(BackendKind::Cuda, &config(16));
        assert!(matches!(res, Err(BackendError::Unavailable(_))));
        assert!(BackendKind::Cuda.list_devices().is_err());
    }

    #[test]
    fn host_device_queries_use_placeholders() {
        assert_eq!(BackendKind::Rayon.device_name(0), UNKNOWN_DEVICE_NAME);
        assert_eq!(BackendKind::Seq.device_driver(0), UNKNOWN_DEVICE_DRIVER);
        assert_eq!(BackendKind::Iter.list_devices().unwrap().len(), 1);
    }
}
