//! Performance report related structures and functions.
//!
//! This module defines all the necessary data structures and functions needed to generate
//! performance reports out of the recorded execution times of the benchmarked kernels. It is pure
//! computation: nothing here touches the backends.

use crate::utils::Precision;

use clap::ValueEnum;
use statistical::{mean, median, standard_deviation};

use std::{fmt, io::Write};

/// List of implemented kernels, in the order in which they are run within one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum KernelKind {
    Copy,
    Mul,
    Add,
    Triad,
    Dot,
}

impl KernelKind {
    /// Every kernel, in execution order.
    pub const ALL: [KernelKind; 5] = [Self::Copy, Self::Mul, Self::Add, Self::Triad, Self::Dot];

    /// Number of array elements read or written per index by one kernel call.
    pub const fn touches_per_elem(self) -> usize {
        match self {
            Self::Copy | Self::Mul | Self::Dot => 2,
            Self::Add | Self::Triad => 3,
        }
    }

    /// Number of floating-point operations per index performed by one kernel call.
    pub const fn flops_per_elem(self) -> usize {
        match self {
            Self::Copy => 0,
            Self::Mul | Self::Add => 1,
            Self::Triad | Self::Dot => 2,
        }
    }

    /// Bytes moved by one kernel call over arrays of `array_size` elements of `elem_size` bytes.
    pub const fn bytes_moved(self, array_size: usize, elem_size: usize) -> usize {
        self.touches_per_elem() * array_size * elem_size
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Mul => write!(f, "mul"),
            Self::Add => write!(f, "add"),
            Self::Triad => write!(f, "triad"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

/// Unit prefix used when reporting bandwidths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Units {
    /// Powers of 1000 (GB/s).
    #[default]
    Decimal,
    /// Powers of 1024 (GiB/s).
    Binary,
}

impl Units {
    fn giga(self) -> f64 {
        match self {
            Self::Decimal => 1e9,
            Self::Binary => 1024_f64.powi(3),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Decimal => "GB/s",
            Self::Binary => "GiB/s",
        }
    }

    /// Converts a number of bytes to megabytes (or mebibytes), with the matching label.
    pub fn megabytes(self, nb_bytes: usize) -> (f64, &'static str) {
        match self {
            Self::Decimal => (nb_bytes as f64 * 1e-6, "MB"),
            Self::Binary => (nb_bytes as f64 / 1024_f64.powi(2), "MiB"),
        }
    }
}

/// Performance information and statistics of one kernel over all retained iterations.
#[derive(Clone, Debug)]
pub struct PerfReport {
    /// Backend the kernel ran on.
    backend: String,
    /// Benchmarked kernel.
    kernel: KernelKind,
    /// Element precision.
    precision: Precision,
    /// Number of elements per array.
    array_size: usize,
    /// Bytes moved per kernel call.
    nb_bytes: usize,
    /// Floating-point operations per kernel call.
    nb_flops: usize,
    /// Number of timings the statistics are computed from.
    nb_samples: usize,
    /// Minimum recorded runtime in milliseconds.
    min_time: f64,
    /// Median recorded runtime in milliseconds.
    median_time: f64,
    /// Maximum recorded runtime in milliseconds.
    max_time: f64,
    /// Average runtime in milliseconds.
    avg_time: f64,
    /// Runtime standard deviation in milliseconds.
    stddev_time: f64,
    /// Lowest per-iteration bandwidth, in `units`.
    min_bandwidth: f64,
    /// Highest per-iteration bandwidth, in `units`.
    max_bandwidth: f64,
    /// Mean of the per-iteration bandwidths, in `units`.
    avg_bandwidth: f64,
    /// Computational performance in GFLOP/s, at the average runtime.
    computational_performance: f64,
    units: Units,
}

impl PerfReport {
    pub fn write_csv_header(output: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            output,
            "backend,kernel,precision,array_size,Bytes,FLOPs,samples,min_runtime,median_runtime,max_runtime,avg_runtime,stddev,min_bandwidth,max_bandwidth,avg_bandwidth,bandwidth_unit,GFLOP/s"
        )
    }

    pub fn write_table_header(output: &mut dyn Write, units: Units) -> std::io::Result<()> {
        let bw = units.label();
        writeln!(
            output,
            "{:<10}{:>14}{:>14}{:>14}{:>14}{:>14}{:>14}",
            "Function",
            format!("Max {bw}"),
            format!("Min {bw}"),
            format!("Avg {bw}"),
            "Min (ms)",
            "Max (ms)",
            "GFLOP/s"
        )
    }

    /// Creates a new `PerfReport` from the retained execution times (in seconds) of `kernel`.
    ///
    /// Returns `None` when there are no timings to aggregate, e.g. a kernel that never completed
    /// before an aborted run.
    pub fn new(
        backend: &str,
        kernel: KernelKind,
        precision: Precision,
        array_size: usize,
        elem_size: usize,
        durations: &[f64],
        units: Units,
    ) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }

        let mut durations = durations.to_vec();
        // Sort durations to avoid having to do two passes to get both min and max elements
        durations.sort_by(|a, b| a.total_cmp(b));

        let nb_bytes = kernel.bytes_moved(array_size, elem_size);
        let nb_flops = kernel.flops_per_elem() * array_size;
        let giga = units.giga();

        let min_time = durations[0];
        let max_time = durations[durations.len() - 1];
        let median_time = median(&durations);
        let avg_time = mean(&durations);
        let stddev_time = match durations.len() {
            1 => 0.0,
            _ => standard_deviation(&durations, Some(avg_time)),
        };

        let bandwidths: Vec<f64> = durations
            .iter()
            .map(|t| nb_bytes as f64 / giga / t)
            .collect();

        Some(Self {
            backend: backend.to_string(),
            kernel,
            precision,
            array_size,
            nb_bytes,
            nb_flops,
            nb_samples: durations.len(),
            min_time: min_time * 1e3,
            median_time: median_time * 1e3,
            max_time: max_time * 1e3,
            avg_time: avg_time * 1e3,
            stddev_time: stddev_time * 1e3,
            min_bandwidth: nb_bytes as f64 / giga / max_time,
            max_bandwidth: nb_bytes as f64 / giga / min_time,
            avg_bandwidth: mean(&bandwidths),
            computational_performance: nb_flops as f64 / 1e9 / avg_time,
            units,
        })
    }

    pub fn kernel(&self) -> KernelKind {
        self.kernel
    }

    pub fn nb_bytes(&self) -> usize {
        self.nb_bytes
    }

    pub fn nb_samples(&self) -> usize {
        self.nb_samples
    }

    pub fn min_bandwidth(&self) -> f64 {
        self.min_bandwidth
    }

    pub fn max_bandwidth(&self) -> f64 {
        self.max_bandwidth
    }

    pub fn avg_bandwidth(&self) -> f64 {
        self.avg_bandwidth
    }

    pub fn gflops(&self) -> f64 {
        self.computational_performance
    }

    /// Writes the report as one row of the human-readable table.
    pub fn write_table_row(&self, output: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            output,
            "{:<10}{:>14.3}{:>14.3}{:>14.3}{:>14.5}{:>14.5}{:>14.3}",
            self.kernel.to_string(),
            self.max_bandwidth,
            self.min_bandwidth,
            self.avg_bandwidth,
            self.min_time,
            self.max_time,
            self.computational_performance,
        )
    }
}

/// CSV row.
impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{:18.15},{:18.15},{:18.15},{:18.15},{},{},{},{},{},{}",
            self.backend,
            self.kernel,
            self.precision,
            self.array_size,
            self.nb_bytes,
            self.nb_flops,
            self.nb_samples,
            self.min_time,
            self.median_time,
            self.max_time,
            self.avg_time,
            self.stddev_time,
            self.min_bandwidth,
            self.max_bandwidth,
            self.avg_bandwidth,
            self.units.label(),
            self.computational_performance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::mem::size_of;

    fn report(kernel: KernelKind, durations: &[f64]) -> PerfReport {
        PerfReport::new(
            "test",
            kernel,
            Precision::Double,
            1_000_000,
            size_of::<f64>(),
            durations,
            Units::Decimal,
        )
        .unwrap()
    }

    #[test]
    fn copy_moves_two_arrays() {
        for size in [1, 7, 1_000_000] {
            assert_eq!(
                KernelKind::Copy.bytes_moved(size, size_of::<f32>()),
                2 * size * size_of::<f32>()
            );
            assert_eq!(
                KernelKind::Copy.bytes_moved(size, size_of::<f64>()),
                2 * size * size_of::<f64>()
            );
        }
        assert_eq!(report(KernelKind::Copy, &[1.0]).nb_bytes(), 16_000_000);
    }

    #[test]
    fn bytes_per_kernel() {
        assert_eq!(KernelKind::Mul.bytes_moved(10, 8), 160);
        assert_eq!(KernelKind::Add.bytes_moved(10, 8), 240);
        assert_eq!(KernelKind::Triad.bytes_moved(10, 8), 240);
        assert_eq!(KernelKind::Dot.bytes_moved(10, 8), 160);
    }

    #[test]
    fn bandwidth_statistics() {
        // 24 MB moved by triad at 1, 2 and 4 milliseconds.
        let r = report(KernelKind::Triad, &[0.002, 0.001, 0.004]);
        assert_eq!(r.nb_samples(), 3);
        assert!((r.max_bandwidth() - 24.0).abs() < 1e-9);
        assert!((r.min_bandwidth() - 6.0).abs() < 1e-9);
        assert!((r.avg_bandwidth() - 14.0).abs() < 1e-9);
        assert!(r.min_bandwidth() <= r.avg_bandwidth() && r.avg_bandwidth() <= r.max_bandwidth());
    }

    #[test]
    fn dot_throughput_counts_two_flops_per_element() {
        let r = report(KernelKind::Dot, &[0.001]);
        assert!((r.gflops() - 2.0).abs() < 1e-9);
        assert_eq!(report(KernelKind::Copy, &[0.001]).gflops(), 0.0);
    }

    #[test]
    fn binary_units() {
        let r = PerfReport::new(
            "test",
            KernelKind::Copy,
            Precision::Single,
            1 << 28,
            size_of::<f32>(),
            &[1.0],
            Units::Binary,
        )
        .unwrap();
        assert!((r.max_bandwidth() - 2.0).abs() < 1e-12);
        assert!(r.to_string().contains("GiB/s"));
    }

    #[test]
    fn no_samples_no_report() {
        assert!(PerfReport::new(
            "test",
            KernelKind::Add,
            Precision::Double,
            10,
            8,
            &[],
            Units::Decimal
        )
        .is_none());
    }

    #[test]
    fn csv_row_matches_header() {
        let mut header = Vec::new();
        PerfReport::write_csv_header(&mut header).unwrap();
        let header = String::from_utf8(header).unwrap();
        let row = report(KernelKind::Mul, &[0.5, 0.25]).to_string();
        assert_eq!(
            header.trim_end().split(',').count(),
            row.split(',').count()
        );
        assert!(row.starts_with("test,mul,double,1000000,16000000,1000000,2,"));
    }
}
