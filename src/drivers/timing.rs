//! Timed iteration loop.
//!
//! The loop issues kernel calls one at a time and blocks on each of them, so every sample measures
//! a single kernel with nothing else in flight. Kernels within an iteration run in the order they
//! are given, each one consuming what the previous ones wrote.

use crate::{
    backends::Stream, errors::StreamError, perf_report::KernelKind, utils::StreamFloat,
};

use log::{error, trace};

use std::time::Instant;

/// Elapsed time of every kernel call of a run, in seconds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IterationTiming {
    kernels: Vec<KernelKind>,
    /// One row per completed iteration, one column per kernel.
    samples: Vec<Vec<f64>>,
    warmup: bool,
}

impl IterationTiming {
    pub fn new(kernels: &[KernelKind], warmup: bool) -> Self {
        Self {
            kernels: kernels.to_vec(),
            samples: Vec::new(),
            warmup,
        }
    }

    fn push_iteration(&mut self, samples: Vec<f64>) {
        debug_assert_eq!(samples.len(), self.kernels.len());
        self.samples.push(samples);
    }

    pub fn kernels(&self) -> &[KernelKind] {
        &self.kernels
    }

    /// Number of fully completed iterations.
    pub fn nb_iterations(&self) -> usize {
        self.samples.len()
    }

    /// Timings of `kernel` for every completed iteration, warm-up included.
    pub fn raw(&self, kernel: KernelKind) -> Vec<f64> {
        match self.kernels.iter().position(|&k| k == kernel) {
            Some(col) => self.samples.iter().map(|row| row[col]).collect(),
            None => Vec::new(),
        }
    }

    /// Timings of `kernel` the statistics are computed from.
    pub fn retained(&self, kernel: KernelKind) -> Vec<f64> {
        let skip = usize::from(self.warmup);
        self.raw(kernel).into_iter().skip(skip).collect()
    }
}

/// Result of the timing loop.
pub struct TimedRun<T> {
    pub timing: IterationTiming,
    /// Result of the last completed `dot` call.
    pub last_sum: Option<T>,
    /// Error that stopped the loop early, if any.
    pub failure: Option<StreamError>,
}

/// Runs `iterations` iterations of `kernels` on `stream`, timing every call.
///
/// A failing kernel stops the loop: the samples of the interrupted iteration are dropped and the
/// error is returned alongside the timings of the iterations that completed.
pub fn run<T: StreamFloat>(
    stream: &mut dyn Stream<T>,
    kernels: &[KernelKind],
    iterations: usize,
    warmup: bool,
) -> TimedRun<T> {
    let mut timing = IterationTiming::new(kernels, warmup);
    let mut last_sum = None;

    for iteration in 0..iterations {
        let mut samples = Vec::with_capacity(kernels.len());
        for &kernel in kernels {
            let dur = Instant::now();
            let res = stream.run_kernel(kernel);
            let elapsed = dur.elapsed().as_secs_f64();

            match res {
                Ok(sum) => {
                    if sum.is_some() {
                        last_sum = sum;
                    }
                    samples.push(elapsed);
                }
                Err(e) => {
                    let e = StreamError::from_kernel(kernel, iteration, e);
                    error!("{e}");
                    return TimedRun {
                        timing,
                        last_sum,
                        failure: Some(e),
                    };
                }
            }
        }
        timing.push_iteration(samples);
        trace!("iteration {iteration} done");
    }

    TimedRun {
        timing,
        last_sum,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        backends::{create, BackendConfig, BackendKind},
        errors::{BackendError, BackendResult},
    };

    /// Backend that records the order of the calls and fails on a given call.
    struct Scripted {
        calls: Vec<KernelKind>,
        fail_at: Option<usize>,
    }

    impl Scripted {
        fn call(&mut self, kernel: KernelKind) -> BackendResult<()> {
            self.calls.push(kernel);
            match self.fail_at {
                Some(n) if n + 1 == self.calls.len() => Err(BackendError::execution("device lost")),
                _ => Ok(()),
            }
        }
    }

    impl Stream<f64> for Scripted {
        fn init_arrays(&mut self, _: f64, _: f64, _: f64) -> BackendResult<()> {
            Ok(())
        }
        fn read_arrays(&self) -> BackendResult<(Vec<f64>, Vec<f64>, Vec<f64>)> {
            Ok((vec![], vec![], vec![]))
        }
        fn copy(&mut self) -> BackendResult<()> {
            self.call(KernelKind::Copy)
        }
        fn mul(&mut self) -> BackendResult<()> {
            self.call(KernelKind::Mul)
        }
        fn add(&mut self) -> BackendResult<()> {
            self.call(KernelKind::Add)
        }
        fn triad(&mut self) -> BackendResult<()> {
            self.call(KernelKind::Triad)
        }
        fn dot(&mut self) -> BackendResult<f64> {
            self.call(KernelKind::Dot).map(|_| self.calls.len() as f64)
        }
        fn array_size(&self) -> usize {
            0
        }
        fn description(&self) -> String {
            "scripted".to_string()
        }
    }

    #[test]
    fn kernels_run_in_order_every_iteration() {
        let mut s = Scripted {
            calls: Vec::new(),
            fail_at: None,
        };
        let run = run(&mut s, &KernelKind::ALL, 3, false);
        assert!(run.failure.is_none());
        assert_eq!(run.timing.nb_iterations(), 3);
        assert_eq!(s.calls.len(), 15);
        assert!(s.calls.chunks(5).all(|c| c == KernelKind::ALL));
        assert_eq!(run.last_sum, Some(15.0));
        for kernel in KernelKind::ALL {
            assert_eq!(run.timing.raw(kernel).len(), 3);
            assert!(run.timing.raw(kernel).iter().all(|&t| t >= 0.0));
        }
    }

    #[test]
    fn failure_keeps_completed_iterations() {
        // Fails on the triad of the third iteration
        let mut s = Scripted {
            calls: Vec::new(),
            fail_at: Some(2 * 5 + 3),
        };
        let run = run(&mut s, &KernelKind::ALL, 10, false);
        match run.failure {
            Some(StreamError::KernelExecution {
                kernel, iteration, ..
            }) => {
                assert_eq!(kernel, KernelKind::Triad);
                assert_eq!(iteration, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(run.timing.nb_iterations(), 2);
        assert_eq!(run.timing.raw(KernelKind::Copy).len(), 2);
        assert_eq!(run.last_sum, Some(10.0));
    }

    #[test]
    fn warmup_is_retained_but_not_aggregated() {
        let mut s = create::<f32>(
            BackendKind::Iter,
            &BackendConfig {
                array_size: 128,
                device: 0,
                threads: 0,
                scalar: 0.4,
            },
        )
        .unwrap();
        s.init_arrays(0.1, 0.2, 0.0).unwrap();
        let run = run(s.as_mut(), &[KernelKind::Copy, KernelKind::Triad], 4, true);
        assert_eq!(run.timing.raw(KernelKind::Triad).len(), 4);
        assert_eq!(run.timing.retained(KernelKind::Triad).len(), 3);
        assert_eq!(
            run.timing.retained(KernelKind::Copy),
            run.timing.raw(KernelKind::Copy)[1..].to_vec()
        );
        assert!(run.timing.raw(KernelKind::Dot).is_empty());
        assert_eq!(run.last_sum, None);
    }
}
