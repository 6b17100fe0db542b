//! rstream - Memory bandwidth benchmark
//!
//! # About
//! rstream measures the sustainable memory bandwidth of a host or device with five simple vector
//! kernels operating on three large arrays `a`, `b` and `c`:
//! - copy: `c = a`
//! - mul: `b = scalar * c`
//! - add: `c = a + b`
//! - triad: `a = b + scalar * c`
//! - dot: `sum(a * b)`
//!
//! Every kernel is timed over many iterations, the results are checked against the values expected
//! after the same sequence of operations, and the bandwidth achieved by each kernel is reported.
//! Runs can be done on both single-precision and double-precision floating-point formats (see
//! [IEEE 754][1]).
//!
//! The kernels can be run on the host (sequentially or in parallel with `rayon`), or on a GPU
//! through [OpenCL][2] or the [NVIDIA CUDA Toolkit][3] when the matching cargo features are
//! enabled.
//!
//! # Quickstart
//! ## Build
//! As any Rust-based project, rstream is built and run with `cargo`:
//! ```sh
//! cargo build --release
//! # with the device backends
//! cargo build --release --features opencl,cuda
//! ```
//!
//! ## Help
//! To see the help usage:
//! ```sh
//! cargo run -- --help
//! ```
//!
//! ## Example run
//! To run the triad kernel alone, in single precision, on 8 host threads:
//! ```sh
//! cargo run --release -- --backend rayon --threads 8 --float --triad-only
//! ```
//!
//! Logging is controlled through the `RUST_LOG` environment variable and defaults to `info`.
//!
//! ## Documentation
//! The crate's documentation is available using `cargo`:
//! ```sh
//! cargo doc --open
//! ```
//!
//! [1]: https://en.wikipedia.org/wiki/IEEE_754
//! [2]: https://www.khronos.org/opencl/
//! [3]: https://developer.nvidia.com/cuda-downloads

pub mod backends;
pub mod cli;
pub mod consts;
pub mod drivers;
pub mod errors;
pub mod kernels;
pub mod perf_report;
pub mod utils;
pub mod validation;

use crate::{
    cli::{CliArgs, RunConfig},
    errors::StreamError,
    utils::Precision,
};

use clap::Parser;
use log::error;

fn try_main(args: CliArgs) -> Result<(), StreamError> {
    if args.list {
        return drivers::list_devices(args.backend);
    }

    let config = RunConfig::from(&args).validate()?;
    match config.precision {
        Precision::Single => drivers::run::<f32>(&config),
        Precision::Double => drivers::run::<f64>(&config),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    if let Err(e) = try_main(args) {
        error!("{e}");
        std::process::exit(1);
    }
}
