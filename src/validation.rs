//! Validation of the benchmarked kernels.
//!
//! Every element of A, B and C holds the same value at any point of a run, so the expected final
//! contents can be predicted by replaying the kernels on three scalars, in the precision of the
//! run. The arrays read back from the backend are then compared against those scalars.

use crate::{
    backends::Stream,
    errors::StreamError,
    perf_report::KernelKind,
    utils::{StartValues, StreamFloat},
};

use std::fmt;

/// One of the three benchmark arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayName {
    A,
    B,
    C,
}

impl fmt::Display for ArrayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}

/// Out-of-tolerance elements of one array.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayDeviation {
    pub array: ArrayName,
    pub expected: f64,
    /// Largest absolute deviation over the whole array.
    pub max_deviation: f64,
    /// First and last failing index.
    pub first: usize,
    pub last: usize,
    pub nb_failed: usize,
    /// Number of elements read back, which differs from `array_size` for a truncated or
    /// oversized read-back. Indices past the end of either count as failing.
    pub read_back: usize,
    pub array_size: usize,
}

/// Out-of-tolerance dot product.
#[derive(Clone, Debug, PartialEq)]
pub struct DotDeviation {
    pub expected: f64,
    pub actual: f64,
    pub relative_error: f64,
}

/// Maximum deviations observed during a successful validation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationResult {
    /// Largest absolute deviation of A, B and C respectively.
    pub max_deviation: [f64; 3],
    /// Relative error of the last dot product, if `dot` was run.
    pub dot_relative_error: Option<f64>,
}

/// Final array contents deviate beyond tolerance.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub arrays: Vec<ArrayDeviation>,
    pub dot: Option<DotDeviation>,
    /// Deviations of every array, failing or not.
    pub observed: ValidationResult,
}

impl ValidationError {
    /// Names of the failing buffers, `"dot"` standing for the dot product.
    pub fn failing_buffers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.arrays.iter().map(|d| d.array.to_string()).collect();
        if self.dot.is_some() {
            names.push("dot".to_string());
        }
        names
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for d in &self.arrays {
            write!(
                f,
                "; array {} differs from {} at {} indices in [{}, {}], max deviation {:e}",
                d.array, d.expected, d.nb_failed, d.first, d.last, d.max_deviation
            )?;
            if d.read_back != d.array_size {
                write!(
                    f,
                    " (read back {} of {} elements)",
                    d.read_back, d.array_size
                )?;
            }
        }
        if let Some(d) = &self.dot {
            write!(
                f,
                "; dot product {} differs from {} (relative error {:e})",
                d.actual, d.expected, d.relative_error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Expected final values of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Validator<T> {
    gold_a: T,
    gold_b: T,
    gold_c: T,
    gold_sum: Option<f64>,
    array_size: usize,
}

impl<T: StreamFloat> Validator<T> {
    /// Replays `iterations` applications of `kernels` (in order) from `start`.
    pub fn replay(
        start: &StartValues,
        kernels: &[KernelKind],
        iterations: usize,
        array_size: usize,
    ) -> Self {
        let scalar = T::from_f64_lossy(start.scalar);
        let mut a = T::from_f64_lossy(start.a);
        let mut b = T::from_f64_lossy(start.b);
        let mut c = T::from_f64_lossy(start.c);

        for _ in 0..iterations {
            for kernel in kernels {
                match kernel {
                    KernelKind::Copy => c = a,
                    KernelKind::Mul => b = scalar * c,
                    KernelKind::Add => c = a + b,
                    KernelKind::Triad => a = b + scalar * c,
                    KernelKind::Dot => {}
                }
            }
        }

        // `dot` always runs last in an iteration, so it sees the final A and B
        let gold_sum = (iterations > 0 && kernels.contains(&KernelKind::Dot))
            .then(|| a.widen() * b.widen() * array_size as f64);

        Self {
            gold_a: a,
            gold_b: b,
            gold_c: c,
            gold_sum,
            array_size,
        }
    }

    /// Expected values of A, B and C.
    pub fn expected(&self) -> (T, T, T) {
        (self.gold_a, self.gold_b, self.gold_c)
    }

    /// Expected value of the last dot product, if any.
    pub fn expected_sum(&self) -> Option<f64> {
        self.gold_sum
    }

    /// Compares read-back arrays and the last dot product against the expected values.
    pub fn check(
        &self,
        a: &[T],
        b: &[T],
        c: &[T],
        sum: Option<T>,
    ) -> Result<ValidationResult, ValidationError> {
        let checks = [
            check_array(ArrayName::A, a, self.gold_a, self.array_size),
            check_array(ArrayName::B, b, self.gold_b, self.array_size),
            check_array(ArrayName::C, c, self.gold_c, self.array_size),
        ];

        let observed_dot = match (self.gold_sum, sum) {
            (Some(expected), Some(actual)) => {
                let actual = actual.widen();
                let relative_error = match expected {
                    e if e == 0.0 => actual.abs(),
                    e => ((actual - e) / e).abs(),
                };
                Some((expected, actual, relative_error))
            }
            _ => None,
        };

        let observed = ValidationResult {
            max_deviation: [checks[0].0, checks[1].0, checks[2].0],
            dot_relative_error: observed_dot.map(|(_, _, err)| err),
        };
        let arrays: Vec<ArrayDeviation> = checks.into_iter().filter_map(|(_, d)| d).collect();
        let dot = observed_dot
            .filter(|(_, _, err)| !(*err <= T::DOT_TOLERANCE))
            .map(|(expected, actual, relative_error)| DotDeviation {
                expected,
                actual,
                relative_error,
            });

        if arrays.is_empty() && dot.is_none() {
            Ok(observed)
        } else {
            Err(ValidationError {
                arrays,
                dot,
                observed,
            })
        }
    }

    /// Reads the arrays back from `stream` and checks them. Never mutates the arrays.
    pub fn validate(
        &self,
        stream: &dyn Stream<T>,
        sum: Option<T>,
    ) -> Result<ValidationResult, StreamError> {
        let (a, b, c) = stream.read_arrays().map_err(|e| StreamError::Readback {
            reason: e.to_string(),
        })?;
        Ok(self.check(&a, &b, &c, sum)?)
    }
}

/// Returns the largest deviation of `values` from `expected`, and the failure summary if any
/// element is out of tolerance.
///
/// `values` must hold exactly `array_size` elements: missing and extra indices fail with an
/// infinite deviation.
fn check_array<T: StreamFloat>(
    array: ArrayName,
    values: &[T],
    expected: T,
    array_size: usize,
) -> (f64, Option<ArrayDeviation>) {
    let expected = expected.widen();
    let tolerance = T::tolerance().widen() * expected.abs().max(1.0);

    let mut max_deviation = 0.0_f64;
    let mut failed: Option<(usize, usize, usize)> = None;
    for i in 0..values.len().max(array_size) {
        let deviation = match values.get(i) {
            Some(x) if i < array_size => (x.widen() - expected).abs(),
            _ => f64::INFINITY,
        };
        // NaN deviations must fail too
        if !(deviation <= tolerance) {
            failed = Some(match failed {
                None => (i, i, 1),
                Some((first, _, n)) => (first, i, n + 1),
            });
        }
        if deviation > max_deviation || deviation.is_nan() {
            max_deviation = deviation;
        }
    }

    let deviation = failed.map(|(first, last, nb_failed)| ArrayDeviation {
        array,
        expected,
        max_deviation,
        first,
        last,
        nb_failed,
        read_back: values.len(),
        array_size,
    });
    (max_deviation, deviation)
}
