//! Command-Line Interface related code.
//!
//! This module handles the parsing of CLI arguments using the [`clap`][1] crate and turns them
//! into the [`RunConfig`] the drivers work from.
//!
//! [1]: https://crates.io/crates/clap

use crate::{
    backends::{BackendConfig, BackendKind},
    consts,
    errors::StreamError,
    perf_report::{KernelKind, Units},
    utils::{Precision, StartValues},
};

use clap::Parser;

use std::path::PathBuf;

/// Memory bandwidth benchmark.
///
/// Measures the sustainable memory bandwidth of a host or device with five simple vector kernels
/// (copy, mul, add, triad and dot) and validates the results they produce.
#[derive(Clone, Debug, Parser)]
#[command(version)]
pub struct CliArgs {
    /// Number of elements in each array.
    #[arg(short = 's', long, value_name = "SIZE", default_value_t = consts::ARRAY_SIZE)]
    pub array_size: usize,

    /// Number of timed iterations.
    #[arg(
        short = 'n',
        long,
        value_name = "NUM",
        default_value_t = consts::NUM_TIMES,
        value_parser = clap::value_parser!(u32).range(1..),
    )]
    pub num_times: u32,

    /// Use single precision instead of double precision.
    #[arg(long)]
    pub float: bool,

    /// Execution technology to benchmark.
    #[arg(short, long, value_enum, default_value_t = BackendKind::Rayon)]
    pub backend: BackendKind,

    /// Index of the device to run on (see `--list`).
    #[arg(short, long, value_name = "INDEX", default_value_t = 0)]
    pub device: usize,

    /// Worker threads of the `rayon` backend, 0 for the runtime default.
    #[arg(short, long, value_name = "THREADS", default_value_t = 0)]
    pub threads: usize,

    /// Comma-separated subset of kernels to run, defaults to all of them.
    #[arg(
        short,
        long,
        value_enum,
        value_delimiter = ',',
        num_args = 1..,
        conflicts_with = "triad_only",
    )]
    pub kernels: Option<Vec<KernelKind>>,

    /// Only run the triad kernel.
    #[arg(long)]
    pub triad_only: bool,

    /// Exclude the first iteration from the statistics.
    #[arg(short, long)]
    pub warmup: bool,

    /// Run a single untimed iteration and only validate the results.
    #[arg(long, conflicts_with = "warmup")]
    pub validate_only: bool,

    /// List the devices of the selected backend and exit.
    #[arg(long)]
    pub list: bool,

    /// Output the report as CSV.
    #[arg(long)]
    pub csv: bool,

    /// Report bandwidths in GiB/s instead of GB/s.
    #[arg(long)]
    pub mibibytes: bool,

    /// Output file, defaults to `stdout` if unspecified.
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,
}

/// Validated parameters of a benchmark run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub backend: BackendKind,
    pub precision: Precision,
    pub array_size: usize,
    pub iterations: usize,
    pub device: usize,
    pub threads: usize,
    /// Kernels run in each iteration, in execution order.
    pub kernels: Vec<KernelKind>,
    pub start: StartValues,
    pub warmup: bool,
    pub validate_only: bool,
    pub csv: bool,
    pub units: Units,
    pub output_file: Option<PathBuf>,
}

impl From<&CliArgs> for RunConfig {
    fn from(args: &CliArgs) -> Self {
        let kernels = match (&args.kernels, args.triad_only) {
            (_, true) => vec![KernelKind::Triad],
            (Some(kernels), false) => kernels.clone(),
            (None, false) => KernelKind::ALL.to_vec(),
        };

        Self {
            backend: args.backend,
            precision: match args.float {
                true => Precision::Single,
                false => Precision::Double,
            },
            array_size: args.array_size,
            iterations: args.num_times as usize,
            device: args.device,
            threads: args.threads,
            kernels,
            start: StartValues::default(),
            warmup: args.warmup,
            validate_only: args.validate_only,
            csv: args.csv,
            units: match args.mibibytes {
                true => Units::Binary,
                false => Units::Decimal,
            },
            output_file: args.output_file.clone(),
        }
    }
}

impl RunConfig {
    /// Checks the parameters and normalizes the kernel selection to execution order.
    ///
    /// The array size is left to the backend, which reports empty arrays as an allocation error.
    pub fn validate(mut self) -> Result<Self, StreamError> {
        if self.iterations == 0 {
            return Err(StreamError::Config(
                "at least one iteration is required".to_string(),
            ));
        }
        if self.warmup && self.iterations < 2 {
            return Err(StreamError::Config(format!(
                "warm-up needs at least 2 iterations, got {}",
                self.iterations
            )));
        }

        // Kernels always run in the canonical order, whatever order they were given in
        self.kernels = KernelKind::ALL
            .into_iter()
            .filter(|k| self.kernels.contains(k))
            .collect();
        if self.kernels.is_empty() {
            return Err(StreamError::Config("no kernel selected".to_string()));
        }

        if self.validate_only {
            self.iterations = 1;
        }

        Ok(self)
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            array_size: self.array_size,
            device: self.device,
            threads: self.threads,
            scalar: self.start.scalar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunConfig {
        let args = CliArgs::try_parse_from(std::iter::once("rstream").chain(args.iter().copied()))
            .unwrap();
        RunConfig::from(&args)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).validate().unwrap();
        assert_eq!(config.backend, BackendKind::Rayon);
        assert_eq!(config.precision, Precision::Double);
        assert_eq!(config.array_size, consts::ARRAY_SIZE);
        assert_eq!(config.iterations, consts::NUM_TIMES as usize);
        assert_eq!(config.kernels, KernelKind::ALL.to_vec());
        assert_eq!(config.units, Units::Decimal);
        assert!(!config.warmup && !config.csv && config.output_file.is_none());
    }

    #[test]
    fn kernel_subset_is_reordered_and_deduplicated() {
        let config = parse(&["-k", "triad,copy,triad", "--float", "-b", "seq"])
            .validate()
            .unwrap();
        assert_eq!(config.kernels, vec![KernelKind::Copy, KernelKind::Triad]);
        assert_eq!(config.precision, Precision::Single);
        assert_eq!(config.backend, BackendKind::Seq);
    }

    #[test]
    fn triad_only() {
        let config = parse(&["--triad-only"]).validate().unwrap();
        assert_eq!(config.kernels, vec![KernelKind::Triad]);
        assert!(CliArgs::try_parse_from(["rstream", "--triad-only", "-k", "copy"]).is_err());
    }

    #[test]
    fn invalid_configurations() {
        assert_eq!(parse(&["-s", "0"]).validate().unwrap().array_size, 0);
        assert!(matches!(
            parse(&["-n", "1", "--warmup"]).validate(),
            Err(StreamError::Config(_))
        ));
        assert!(parse(&["-n", "2", "--warmup"]).validate().is_ok());
        assert!(CliArgs::try_parse_from(["rstream", "-n", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["rstream", "-k", "scan"]).is_err());
    }

    #[test]
    fn validate_only_runs_one_iteration() {
        let config = parse(&["--validate-only", "-n", "50"]).validate().unwrap();
        assert_eq!(config.iterations, 1);
    }

    #[test]
    fn binary_units() {
        assert_eq!(parse(&["--mibibytes"]).units, Units::Binary);
    }
}
