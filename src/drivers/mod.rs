//! Benchmark drivers.
//!
//! This module provides the API for appropriately initializing and profiling the kernels, as well
//! as post-processing the results. It only talks to the backends through the
//! [`Stream`](crate::backends::Stream) trait, so it is the same for every execution technology.
//!
//! # High-level approach for kernel profiling
//! ## 1. Data initialization
//! The backend is built from the run configuration and allocates the three arrays, which are then
//! filled with the start values. Any failure at this point is fatal and nothing is reported.
//!
//! ## 2. Performance evaluation
//! Every selected kernel is timed once per iteration, in execution order (see [`timing`]). When
//! warm-up is requested, the first iteration is run and timed but left out of the statistics.
//!
//! ## 3. Validation
//! The arrays are read back and compared against the values obtained by replaying the same kernel
//! sequence on scalars (see [`crate::validation`]).
//!
//! ## 4. Post-processing
//! The recorded execution times are turned into bandwidth and throughput metrics (see
//! [`crate::perf_report`]), which are written to `stdout`, or a file if specified, followed by the
//! validation verdict. A run stopped by a failing kernel still reports the iterations it completed.

mod timing;

pub use timing::IterationTiming;

use crate::{
    backends::{self, BackendKind, Stream},
    cli::RunConfig,
    errors::StreamError,
    perf_report::PerfReport,
    utils::StreamFloat,
    validation::{ValidationResult, Validator},
};

use log::{debug, error, info};

use std::{
    fmt,
    fs::OpenOptions,
    io::{stdout, Write},
    mem::size_of,
};

/// Phases a run goes through, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Timing,
    Validating,
    Reporting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Timing => write!(f, "timing"),
            Self::Validating => write!(f, "validating"),
            Self::Reporting => write!(f, "reporting"),
            Self::Done => write!(f, "done"),
        }
    }
}

fn enter(phase: Phase) {
    debug!("entering {phase} phase");
}

/// Everything a report is built from.
#[derive(Debug)]
pub struct RunOutcome {
    /// Human-readable description of the backend.
    pub description: String,
    pub timing: IterationTiming,
    /// One report per kernel with at least one retained sample.
    pub reports: Vec<PerfReport>,
    /// Set when validation ran and passed.
    pub validation: Option<ValidationResult>,
    /// Error that made the run fail: a kernel error, a read-back error or a failed validation.
    pub failure: Option<StreamError>,
}

/// Builds the configured backend, initializes its arrays and benchmarks it.
///
/// Only construction errors are returned as `Err`, since nothing can be reported about a backend
/// that never ran. Errors happening later are part of the returned outcome.
pub fn benchmark<T: StreamFloat>(config: &RunConfig) -> Result<RunOutcome, StreamError> {
    enter(Phase::Idle);
    let mut stream = backends::create::<T>(config.backend, &config.backend_config())
        .map_err(|e| StreamError::from_construction(config.backend, config.array_size, e))?;
    info!("Using {}", stream.description());

    initialize(stream.as_mut(), config)?;
    Ok(measure(stream.as_mut(), config))
}

/// Fills the arrays of `stream` with the configured start values.
fn initialize<T: StreamFloat>(
    stream: &mut dyn Stream<T>,
    config: &RunConfig,
) -> Result<(), StreamError> {
    let start = &config.start;
    stream
        .init_arrays(
            T::from_f64_lossy(start.a),
            T::from_f64_lossy(start.b),
            T::from_f64_lossy(start.c),
        )
        .map_err(|e| StreamError::from_init(config.backend, config.array_size, e))
}

/// Times, validates and post-processes a run on an initialized backend.
pub fn measure<T: StreamFloat>(stream: &mut dyn Stream<T>, config: &RunConfig) -> RunOutcome {
    enter(Phase::Timing);
    let run = timing::run(stream, &config.kernels, config.iterations, config.warmup);
    let mut failure = run.failure;
    let mut validation = None;

    // Arrays of an interrupted run are in an intermediate state, there is nothing to validate
    if failure.is_none() {
        enter(Phase::Validating);
        let validator = Validator::<T>::replay(
            &config.start,
            &config.kernels,
            run.timing.nb_iterations(),
            config.array_size,
        );
        match validator.validate(&*stream, run.last_sum) {
            Ok(res) => validation = Some(res),
            Err(e) => failure = Some(e),
        }
    }

    enter(Phase::Reporting);
    let reports: Vec<PerfReport> = match config.validate_only {
        true => Vec::new(),
        false => run
            .timing
            .kernels()
            .iter()
            .filter_map(|&kernel| {
                PerfReport::new(
                    &config.backend.to_string(),
                    kernel,
                    T::PRECISION,
                    config.array_size,
                    size_of::<T>(),
                    &run.timing.retained(kernel),
                    config.units,
                )
            })
            .collect(),
    };
    for report in &reports {
        debug!(
            "{}: {} retained samples, {:.3} {} on average",
            report.kernel(),
            report.nb_samples(),
            report.avg_bandwidth(),
            config.units.label()
        );
    }

    RunOutcome {
        description: stream.description(),
        timing: run.timing,
        reports,
        validation,
        failure,
    }
}

/// Writes the report of `outcome` to `output`.
pub fn write_report(
    config: &RunConfig,
    outcome: &RunOutcome,
    output: &mut dyn Write,
) -> std::io::Result<()> {
    if config.csv {
        PerfReport::write_csv_header(output)?;
        for report in &outcome.reports {
            writeln!(output, "{report}")?;
        }
        return Ok(());
    }

    let (array_mb, label) = config
        .units
        .megabytes(config.array_size * config.precision.elem_size());
    writeln!(output, "Backend: {}", outcome.description)?;
    writeln!(output, "Precision: {}", config.precision)?;
    writeln!(
        output,
        "Array size: {} elements ({array_mb:.1} {label} per array, {:.1} {label} total)",
        config.array_size,
        3.0 * array_mb
    )?;
    match (config.validate_only, config.warmup) {
        (true, _) => writeln!(output, "Running kernels once, untimed")?,
        (false, true) => writeln!(
            output,
            "Running kernels {} times, first one excluded from statistics",
            config.iterations
        )?,
        (false, false) => writeln!(output, "Running kernels {} times", config.iterations)?,
    }

    if !outcome.reports.is_empty() {
        writeln!(output)?;
        PerfReport::write_table_header(output, config.units)?;
        for report in &outcome.reports {
            report.write_table_row(output)?;
        }
    }

    writeln!(output)?;
    writeln!(output, "Validation: {}", verdict(outcome))
}

fn verdict(outcome: &RunOutcome) -> String {
    match (&outcome.validation, &outcome.failure) {
        (Some(res), _) => format!(
            "PASSED (max deviation A={:e} B={:e} C={:e})",
            res.max_deviation[0], res.max_deviation[1], res.max_deviation[2]
        ),
        (None, Some(StreamError::Validation(e))) => {
            format!("FAILED ({})", e.failing_buffers().join(", "))
        }
        (None, Some(e)) => format!("NOT RUN ({e})"),
        (None, None) => "NOT RUN".to_string(),
    }
}

fn open_output(config: &RunConfig) -> Result<Box<dyn Write>, StreamError> {
    Ok(match config.output_file {
        Some(ref name) => Box::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(name)?,
        ),
        None => Box::new(stdout()),
    })
}

/// Runs the whole benchmark described by `config` and writes its report.
///
/// The report is written even when the run fails after construction; the failure is returned
/// afterwards.
pub fn run<T: StreamFloat>(config: &RunConfig) -> Result<(), StreamError> {
    let outcome = benchmark::<T>(config)?;

    let mut output = open_output(config)?;
    write_report(config, &outcome, output.as_mut())?;
    output.flush()?;
    if config.csv {
        info!("Validation: {}", verdict(&outcome));
    }
    enter(Phase::Done);

    match outcome.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Prints the devices `backend` can run on.
pub fn list_devices(backend: BackendKind) -> Result<(), StreamError> {
    let devices = backend
        .list_devices()
        .map_err(|e| StreamError::from_construction(backend, 0, e))?;
    if devices.is_empty() {
        error!("No device found for backend `{backend}`");
    }
    let mut output = stdout();
    for device in devices {
        writeln!(output, "{device}")?;
    }
    Ok(())
}
