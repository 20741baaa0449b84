//! # stockham-cl - OpenCL radix-2 Stockham FFT benchmark
//!
//! Runs a single work-group radix-2 Stockham FFT on a compute device over a
//! sweep of power-of-two input sizes, times every launch with device-side
//! profiling and checks the output against a host reference FFT.
//!
//! ## Pipeline
//!
//! For each size `N = 8, 16, 32, ...` below the configured bound:
//!
//! 1. **Probe** ([`probe`]): instantiate the kernel template with
//!    compile-time constants, build it and grow the per-thread butterfly
//!    count until one work-group covers all `N/2` butterflies.
//! 2. **Upload** ([`io`]): copy the real samples into a 1-D RGBA/FLOAT image.
//! 3. **Benchmark** ([`bench`]): warm up, then launch and time 3000 times.
//! 4. **Download + verify** ([`verify`]): read the complex spectrum back and
//!    compare it against [`reference`] within an absolute tolerance.
//!
//! The sweep stops cleanly once the device's local memory can no longer hold
//! the two ping-pong buffers.
//!
//! ## Cargo Features
//!
//! - `opencl`: Enable the OpenCL backend ([`opencl::ClDevice`]). Without it
//!   only the in-process [`HostDevice`] is available.
//!
//! ## Examples
//!
//! ```
//! use stockham_cl::{HostDevice, KernelTemplate, Sweep, SweepConfig};
//!
//! let device = HostDevice::new();
//! let template = KernelTemplate::builtin();
//! let config = SweepConfig {
//!     max_size: 64,
//!     iterations: 10,
//!     ..SweepConfig::default()
//! };
//! let report = Sweep::new(&device, &template, &config).run().unwrap();
//! assert_eq!(report.completed.len(), 3);
//! assert!(report.first_mismatch().is_none());
//! ```
//!
//! Against a real device:
//! ```bash
//! cargo run --release --features opencl --bin stockham-sweep -- --device opencl
//! ```

/// Launch timing
pub mod bench;
/// Sweep configuration and environment overrides
pub mod config;
/// Compute device abstraction
pub mod device;
pub mod error;
pub mod host;
/// Host/device image transfers
pub mod io;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod probe;
/// Host reference FFTs
pub mod reference;
pub mod sweep;
/// Kernel template instantiation
pub mod template;
pub mod verify;

pub use rustfft::num_complex::Complex32;

pub use bench::{Benchmark, BenchmarkSummary, TimingAccumulator};
pub use config::SweepConfig;
pub use device::{ComputeDevice, Dispatch, EventTimes, ImageAccess};
pub use error::{Error, Result};
pub use host::{HostDevice, ResourceSnapshot};
pub use io::DeviceImages;
pub use probe::{ProbeOptions, ScopedKernel};
pub use sweep::{SizeReport, StopReason, Sweep, SweepReport};
pub use template::{KernelParams, KernelTemplate, ProblemSize};
pub use verify::{Check, Mismatch, VerificationReport, Verifier};
