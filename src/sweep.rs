//! End-to-end sweep over growing problem sizes.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bench::BenchmarkSummary;
use crate::config::SweepConfig;
use crate::device::ComputeDevice;
use crate::error::{Error, Result};
use crate::io::DeviceImages;
use crate::probe::ScopedKernel;
use crate::template::{KernelTemplate, ProblemSize};
use crate::verify::{Mismatch, VerificationReport};

/// Uniform samples in `[0, 1)`.
pub fn random_input<R: Rng>(rng: &mut R, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(0.0f32..1.0)).collect()
}

/// Results of one completed problem size.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeReport {
    pub size: usize,
    pub per_thread: usize,
    pub max_work_group_size: usize,
    pub probe_attempts: usize,
    pub global_work_size: usize,
    pub timing: BenchmarkSummary,
    /// `None` when verification is disabled.
    pub verification: Option<VerificationReport>,
}

/// Why a sweep ended before reaching its upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    InsufficientLocalMemory {
        size: usize,
        required: u64,
        available: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SweepReport {
    pub completed: Vec<SizeReport>,
    pub stopped: Option<StopReason>,
}

impl SweepReport {
    /// First verification failure across all completed sizes.
    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.completed
            .iter()
            .filter_map(|r| r.verification.as_ref())
            .find_map(VerificationReport::first_mismatch)
    }
}

/// Drives every stage for each problem size against one shared device.
pub struct Sweep<'a, D: ComputeDevice> {
    device: &'a D,
    template: &'a KernelTemplate,
    config: &'a SweepConfig,
}

impl<'a, D: ComputeDevice> Sweep<'a, D> {
    pub fn new(device: &'a D, template: &'a KernelTemplate, config: &'a SweepConfig) -> Self {
        Self {
            device,
            template,
            config,
        }
    }

    /// Run the whole sweep with inputs drawn from a generator seeded with
    /// `config.seed`.
    pub fn run(&self) -> Result<SweepReport> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.run_with_rng(&mut rng)
    }

    /// Run the whole sweep, drawing every input from `rng`.
    ///
    /// Sizes that outgrow the device's local memory end the sweep cleanly;
    /// any other error is returned as is.
    pub fn run_with_rng<R: Rng>(&self, rng: &mut R) -> Result<SweepReport> {
        self.config.validate()?;
        info!("sweeping on {}", self.device.name());
        let mut report = SweepReport::default();
        for n in self.config.sizes() {
            info!("* input size: {n}");
            let input = random_input(rng, n);
            match self.run_size(&input) {
                Ok(size_report) => report.completed.push(size_report),
                Err(Error::InsufficientLocalMemory {
                    required,
                    available,
                }) => {
                    warn!(
                        "not enough local memory on the device for {n} samples \
                         ({required} > {available} bytes), stopping"
                    );
                    report.stopped = Some(StopReason::InsufficientLocalMemory {
                        size: n,
                        required,
                        available,
                    });
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        self.device.finish()?;
        Ok(report)
    }

    /// One sweep iteration: probe, upload, benchmark, download, verify.
    ///
    /// The length of `input` is validated before any device resource is
    /// acquired. The kernel and images are released on every return path.
    pub fn run_size(&self, input: &[f32]) -> Result<SizeReport> {
        let size = ProblemSize::new(input.len())?;
        let kernel = ScopedKernel::probe(
            self.device,
            self.template,
            size,
            &self.config.probe_options(),
        )?;
        info!(
            "n = {}: {} butterfly per thread, workgroup max size {} after {} build(s)",
            size.len(),
            kernel.per_thread(),
            kernel.max_work_group_size(),
            kernel.attempts()
        );

        let mut images = DeviceImages::upload(self.device, input)?;
        let benchmark = self.config.benchmark();
        let timing = benchmark.run(self.device, &kernel, &mut images)?;
        let output = images.download(self.device)?;

        let verification = self
            .config
            .verify
            .then(|| self.config.verifier().verify(input, &output));

        Ok(SizeReport {
            size: size.len(),
            per_thread: kernel.per_thread(),
            max_work_group_size: kernel.max_work_group_size(),
            probe_attempts: kernel.attempts(),
            global_work_size: kernel.dispatch().global_work_size,
            timing,
            verification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_input_is_reproducible_and_in_range() {
        let a = random_input(&mut StdRng::seed_from_u64(0), 64);
        let b = random_input(&mut StdRng::seed_from_u64(0), 64);
        assert_eq!(a, b);
        assert!(a.iter().all(|x| (0.0..1.0).contains(x)));
    }
}
