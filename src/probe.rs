//! Work-distribution probing.
//!
//! How many butterflies each work item must process is only known after
//! compiling: the largest work-group a kernel can run with depends on the
//! registers and resources the compiler allocated for that very source. The
//! prober therefore instantiates, builds and queries candidates until
//! `N/2 <= per_thread * max_work_group_size` holds, and hands the accepted
//! build to the caller as a [`ScopedKernel`].

use log::{debug, trace};

use crate::device::{ComputeDevice, Dispatch};
use crate::error::{Error, Result};
use crate::template::{KernelParams, KernelTemplate, ProblemSize};

/// Entry point of the shipped kernel template.
pub const DEFAULT_ENTRY_POINT: &str = "kernel_func";

/// Build flags used by default. Relaxed math makes twiddle evaluation a bit
/// faster at a small accuracy cost the verification tolerance absorbs.
pub const DEFAULT_BUILD_OPTIONS: &str =
    "-cl-denorms-are-zero -cl-strict-aliasing -cl-fast-relaxed-math";

pub const DEFAULT_MAX_PROBE_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub entry_point: String,
    pub build_options: String,
    /// Upper bound on compiles for one problem size.
    pub max_attempts: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
            max_attempts: DEFAULT_MAX_PROBE_ATTEMPTS,
        }
    }
}

/// Outcome of one capacity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The candidate covers every butterfly.
    Accept,
    /// Release the candidate and try again with this per-thread count.
    Retry(usize),
    /// No further candidate is worth compiling.
    Exhausted,
}

/// State of the probing loop for one problem size.
pub enum ProbeState<K> {
    Probing(usize),
    Accepted(K),
    Failed(Error),
}

/// Decide what follows a compile that reported `max_work_group_size` for a
/// kernel built with `per_thread` butterflies per work item.
///
/// The next estimate assumes the work-group limit will not grow when each
/// work item does more work. It is rounded up to a power of two so it always
/// divides the (power of two) butterfly count, and it strictly increases.
pub fn transition(
    butterflies: usize,
    per_thread: usize,
    max_work_group_size: usize,
    attempt: usize,
    max_attempts: usize,
) -> Step {
    if max_work_group_size > 0 && butterflies <= per_thread.saturating_mul(max_work_group_size) {
        return Step::Accept;
    }
    if max_work_group_size == 0 || attempt >= max_attempts {
        return Step::Exhausted;
    }
    let estimate = butterflies.div_ceil(max_work_group_size);
    Step::Retry(estimate.max(per_thread + 1).next_power_of_two())
}

/// A compiled kernel whose launch geometry is known to fit the device.
///
/// Dropping it releases the kernel and its program.
pub struct ScopedKernel<D: ComputeDevice> {
    kernel: D::Kernel,
    params: KernelParams,
    max_work_group_size: usize,
    attempts: usize,
}

impl<D: ComputeDevice> ScopedKernel<D> {
    /// Search the smallest feasible per-thread butterfly count for `size`,
    /// starting at one.
    pub fn probe(
        device: &D,
        template: &KernelTemplate,
        size: ProblemSize,
        options: &ProbeOptions,
    ) -> Result<Self> {
        let butterflies = size.butterflies();
        let mut attempts = 0;
        let mut state = ProbeState::Probing(1);
        loop {
            state = match state {
                ProbeState::Probing(per_thread) => {
                    attempts += 1;
                    let params = KernelParams::new(size, per_thread);
                    let source = template.instantiate(&params)?;
                    let kernel = device.build_kernel(
                        &source,
                        &options.entry_point,
                        &options.build_options,
                    )?;
                    let max_wg = device.kernel_work_group_size(&kernel)?;
                    debug!(
                        "workgroup max size: {max_wg} for {per_thread} butterfly per thread \
                         (n = {})",
                        size.len()
                    );
                    match transition(
                        butterflies,
                        per_thread,
                        max_wg,
                        attempts,
                        options.max_attempts,
                    ) {
                        Step::Accept => ProbeState::Accepted(Self {
                            kernel,
                            params,
                            max_work_group_size: max_wg,
                            attempts,
                        }),
                        Step::Retry(next) => {
                            drop(kernel);
                            ProbeState::Probing(next)
                        }
                        Step::Exhausted => {
                            drop(kernel);
                            ProbeState::Failed(Error::CapacityNotReached {
                                butterflies,
                                attempts,
                            })
                        }
                    }
                }
                ProbeState::Accepted(scoped) => return Ok(scoped),
                ProbeState::Failed(err) => return Err(err),
            };
        }
    }

    pub fn kernel(&self) -> &D::Kernel {
        &self.kernel
    }

    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    pub fn per_thread(&self) -> usize {
        self.params.per_thread
    }

    pub fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    /// Number of compiles the search needed.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// One work item per `per_thread` butterflies, all in one work-group.
    pub fn dispatch(&self) -> Dispatch {
        let work_items = self.params.total_butterflies / self.params.per_thread;
        let samples = 2 * self.params.total_butterflies;
        Dispatch {
            global_work_size: work_items,
            local_work_size: work_items,
            // Two ping-pong buffers of `samples` float2 values.
            local_mem_bytes: 2 * samples * 2 * core::mem::size_of::<f32>(),
        }
    }
}

impl<D: ComputeDevice> Drop for ScopedKernel<D> {
    fn drop(&mut self) {
        trace!(
            "releasing kernel for {} butterflies ({} per thread)",
            self.params.total_butterflies,
            self.params.per_thread
        );
    }
}
