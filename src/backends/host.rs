//! Host backends.
//!
//! This module implements the kernel provider running on the host (CPU). The same provider covers
//! the three host kernel variants of [`crate::kernels::host`]; the parallel variant owns its own
//! `rayon` thread pool, created with the provider and torn down when it is dropped, so that
//! successive runs in one process never share runtime state.

use super::{check_array_size, Stream, UNKNOWN_DEVICE_DRIVER, UNKNOWN_DEVICE_NAME};
use crate::{
    errors::{BackendError, BackendResult},
    kernels::host,
    utils::StreamFloat,
};

use rayon::{ThreadPool, ThreadPoolBuilder};

use std::fmt;

/// Host-specific possible kernel implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKernelVariant {
    SeqNaive,
    SeqIter,
    ParIter,
}

impl fmt::Display for HostKernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeqNaive => write!(f, "Sequential naive"),
            Self::SeqIter => write!(f, "Sequential w/ iterators"),
            Self::ParIter => write!(f, "Parallel w/ iterators"),
        }
    }
}

enum Executor {
    SeqNaive,
    SeqIter,
    ParIter(ThreadPool),
}

/// Host kernel provider.
pub struct HostStream<T> {
    a: Vec<T>,
    b: Vec<T>,
    c: Vec<T>,
    scalar: T,
    executor: Executor,
}

fn alloc<T: StreamFloat>(array_size: usize) -> BackendResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(array_size)
        .map_err(BackendError::allocation)?;
    v.resize(array_size, T::zero());
    Ok(v)
}

impl<T: StreamFloat> HostStream<T> {
    /// Allocates the arrays and, for [`HostKernelVariant::ParIter`], builds a thread pool of
    /// `threads` workers (`0` lets `rayon` decide).
    pub fn new(
        array_size: usize,
        device: usize,
        scalar: T,
        variant: HostKernelVariant,
        threads: usize,
    ) -> BackendResult<Self> {
        check_array_size(array_size)?;
        if device != 0 {
            return Err(BackendError::Unavailable(format!(
                "the host exposes a single device, got index {device}"
            )));
        }

        let executor = match variant {
            HostKernelVariant::SeqNaive => Executor::SeqNaive,
            HostKernelVariant::SeqIter => Executor::SeqIter,
            HostKernelVariant::ParIter => Executor::ParIter(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("rstream-worker-{i}"))
                    .build()
                    .map_err(BackendError::unavailable)?,
            ),
        };

        Ok(Self {
            a: alloc(array_size)?,
            b: alloc(array_size)?,
            c: alloc(array_size)?,
            scalar,
            executor,
        })
    }

    pub fn variant(&self) -> HostKernelVariant {
        match self.executor {
            Executor::SeqNaive => HostKernelVariant::SeqNaive,
            Executor::SeqIter => HostKernelVariant::SeqIter,
            Executor::ParIter(_) => HostKernelVariant::ParIter,
        }
    }
}

impl<T: StreamFloat> Stream<T> for HostStream<T> {
    fn init_arrays(&mut self, init_a: T, init_b: T, init_c: T) -> BackendResult<()> {
        match &self.executor {
            Executor::SeqNaive => {
                host::fill(init_a, &mut self.a);
                host::fill(init_b, &mut self.b);
                host::fill(init_c, &mut self.c);
            }
            Executor::SeqIter => {
                host::iter_fill(init_a, &mut self.a);
                host::iter_fill(init_b, &mut self.b);
                host::iter_fill(init_c, &mut self.c);
            }
            Executor::ParIter(pool) => pool.install(|| {
                host::par_iter_fill(init_a, &mut self.a);
                host::par_iter_fill(init_b, &mut self.b);
                host::par_iter_fill(init_c, &mut self.c);
            }),
        }
        Ok(())
    }

    fn read_arrays(&self) -> BackendResult<(Vec<T>, Vec<T>, Vec<T>)> {
        Ok((self.a.clone(), self.b.clone(), self.c.clone()))
    }

    fn copy(&mut self) -> BackendResult<()> {
        match &self.executor {
            Executor::SeqNaive => host::copy(&self.a, &mut self.c),
            Executor::SeqIter => host::iter_copy(&self.a, &mut self.c),
            Executor::ParIter(pool) => pool.install(|| host::par_iter_copy(&self.a, &mut self.c)),
        }
        Ok(())
    }

    fn mul(&mut self) -> BackendResult<()> {
        let scalar = self.scalar;
        match &self.executor {
            Executor::SeqNaive => host::mul(scalar, &self.c, &mut self.b),
            Executor::SeqIter => host::iter_mul(scalar, &self.c, &mut self.b),
            Executor::ParIter(pool) => {
                pool.install(|| host::par_iter_mul(scalar, &self.c, &mut self.b))
            }
        }
        Ok(())
    }

    fn add(&mut self) -> BackendResult<()> {
        match &self.executor {
            Executor::SeqNaive => host::add(&self.a, &self.b, &mut self.c),
            Executor::SeqIter => host::iter_add(&self.a, &self.b, &mut self.c),
            Executor::ParIter(pool) => {
                pool.install(|| host::par_iter_add(&self.a, &self.b, &mut self.c))
            }
        }
        Ok(())
    }

    fn triad(&mut self) -> BackendResult<()> {
        let scalar = self.scalar;
        match &self.executor {
            Executor::SeqNaive => host::triad(scalar, &self.b, &self.c, &mut self.a),
            Executor::SeqIter => host::iter_triad(scalar, &self.b, &self.c, &mut self.a),
            Executor::ParIter(pool) => {
                pool.install(|| host::par_iter_triad(scalar, &self.b, &self.c, &mut self.a))
            }
        }
        Ok(())
    }

    fn dot(&mut self) -> BackendResult<T> {
        let sum = match &self.executor {
            Executor::SeqNaive => host::dot(&self.a, &self.b),
            Executor::SeqIter => host::iter_dot(&self.a, &self.b),
            Executor::ParIter(pool) => pool.install(|| host::par_iter_dot(&self.a, &self.b)),
        };
        Ok(T::from_f64_lossy(sum))
    }

    fn array_size(&self) -> usize {
        self.a.len()
    }

    fn description(&self) -> String {
        match &self.executor {
            Executor::ParIter(pool) => format!(
                "host ({}, {} threads)",
                self.variant(),
                pool.current_num_threads()
            ),
            _ => format!("host ({})", self.variant()),
        }
    }
}

pub fn list_devices() -> Vec<String> {
    vec!["0: host (device listing is not supported by the host backends)".to_string()]
}

pub fn device_name(_index: usize) -> String {
    UNKNOWN_DEVICE_NAME.to_string()
}

pub fn device_driver(_index: usize) -> String {
    UNKNOWN_DEVICE_DRIVER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARIANTS: [HostKernelVariant; 3] = [
        HostKernelVariant::SeqNaive,
        HostKernelVariant::SeqIter,
        HostKernelVariant::ParIter,
    ];

    #[test]
    fn kernels_write_only_their_target() {
        for variant in VARIANTS {
            let mut s = HostStream::new(5, 0, 3.0_f64, variant, 2).unwrap();
            s.init_arrays(1.0, 2.0, 0.0).unwrap();

            s.copy().unwrap();
            assert_eq!(s.read_arrays().unwrap(), (vec![1.0; 5], vec![2.0; 5], vec![1.0; 5]));
            s.mul().unwrap();
            assert_eq!(s.read_arrays().unwrap(), (vec![1.0; 5], vec![3.0; 5], vec![1.0; 5]));
            s.add().unwrap();
            assert_eq!(s.read_arrays().unwrap(), (vec![1.0; 5], vec![3.0; 5], vec![4.0; 5]));
            s.triad().unwrap();
            assert_eq!(s.read_arrays().unwrap(), (vec![15.0; 5], vec![3.0; 5], vec![4.0; 5]));
            assert_eq!(s.dot().unwrap(), 225.0);
            assert_eq!(s.read_arrays().unwrap().0, vec![15.0; 5]);
        }
    }

    #[test]
    fn first_iteration_on_a_million_elements() {
        let size = 1_000_000;
        for variant in VARIANTS {
            let mut s = HostStream::new(size, 0, 3.0_f64, variant, 0).unwrap();
            s.init_arrays(1.0, 2.0, 0.0).unwrap();
            assert_eq!(s.dot().unwrap(), 2_000_000.0, "{variant}");

            s.copy().unwrap();
            s.mul().unwrap();
            s.add().unwrap();
            s.triad().unwrap();
            let (a, b, c) = s.read_arrays().unwrap();
            assert_eq!(a.len(), size);
            assert!(a.iter().all(|&x| x.to_bits() == 15.0_f64.to_bits()), "{variant}");
            assert!(b.iter().all(|&x| x.to_bits() == 3.0_f64.to_bits()), "{variant}");
            assert!(c.iter().all(|&x| x.to_bits() == 4.0_f64.to_bits()), "{variant}");
            assert_eq!(s.dot().unwrap(), 45_000_000.0, "{variant}");
        }
    }

    #[test]
    fn read_arrays_is_idempotent() {
        for variant in VARIANTS {
            let mut s = HostStream::new(64, 0, 0.4_f32, variant, 0).unwrap();
            s.init_arrays(0.1, 0.2, 0.0).unwrap();
            s.copy().unwrap();
            s.triad().unwrap();
            let first = s.read_arrays().unwrap();
            let second = s.read_arrays().unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn single_element_arrays() {
        for variant in VARIANTS {
            let mut s = HostStream::new(1, 0, 2.0_f32, variant, 1).unwrap();
            s.init_arrays(1.0, 1.0, 1.0).unwrap();
            s.copy().unwrap();
            s.mul().unwrap();
            s.add().unwrap();
            s.triad().unwrap();
            assert_eq!(s.dot().unwrap(), 16.0);
            assert_eq!(s.array_size(), 1);
        }
    }

    #[test]
    fn construction_failures() {
        assert!(matches!(
            HostStream::new(0, 0, 1.0_f64, HostKernelVariant::SeqIter, 0),
            Err(BackendError::Allocation(_))
        ));
        assert!(matches!(
            HostStream::new(usize::MAX / 2, 0, 1.0_f64, HostKernelVariant::SeqIter, 0),
            Err(BackendError::Allocation(_))
        ));
        assert!(matches!(
            HostStream::new(8, 1, 1.0_f64, HostKernelVariant::SeqIter, 0),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn thread_pool_is_sized_from_config() {
        let s = HostStream::new(8, 0, 1.0_f64, HostKernelVariant::ParIter, 3).unwrap();
        assert_eq!(s.variant(), HostKernelVariant::ParIter);
        assert_eq!(s.description(), "host (Parallel w/ iterators, 3 threads)");
    }
}
