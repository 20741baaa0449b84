//! Repeated kernel execution with device-side timing.

use log::{debug, info};

use crate::device::ComputeDevice;
use crate::error::Result;
use crate::io::DeviceImages;
use crate::probe::ScopedKernel;

pub const DEFAULT_ITERATIONS: usize = 3000;
pub const DEFAULT_WARMUP: usize = 5;

/// Sum of measured launch durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingAccumulator {
    total_ns: u128,
    count: usize,
    min_ns: Option<u64>,
    max_ns: u64,
}

impl TimingAccumulator {
    pub fn record(&mut self, duration_ns: u64) {
        self.total_ns += duration_ns as u128;
        self.count += 1;
        self.min_ns = Some(self.min_ns.map_or(duration_ns, |m| m.min(duration_ns)));
        self.max_ns = self.max_ns.max(duration_ns);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean duration in whole microseconds; the sub-microsecond remainder is
    /// dropped.
    pub fn average_us(&self) -> u64 {
        if self.count == 0 {
            return 0;
        }
        (self.total_ns / self.count as u128 / 1_000) as u64
    }

    fn finish(self, launches: usize) -> BenchmarkSummary {
        BenchmarkSummary {
            launches,
            measured: self.count,
            total_ns: self.total_ns,
            min_ns: self.min_ns.unwrap_or(0),
            max_ns: self.max_ns,
            average_us: self.average_us(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkSummary {
    /// Launches submitted, warm-up included.
    pub launches: usize,
    /// Launches that contributed to the timing.
    pub measured: usize,
    pub total_ns: u128,
    pub min_ns: u64,
    pub max_ns: u64,
    pub average_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Benchmark {
    pub iterations: usize,
    pub warmup: usize,
}

impl Default for Benchmark {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            warmup: DEFAULT_WARMUP,
        }
    }
}

impl Benchmark {
    pub fn new(iterations: usize, warmup: usize) -> Self {
        Self { iterations, warmup }
    }

    /// Launch `kernel` `warmup + iterations` times, waiting on each launch,
    /// and average the durations of the non-warm-up launches.
    pub fn run<D: ComputeDevice>(
        &self,
        device: &D,
        kernel: &ScopedKernel<D>,
        images: &mut DeviceImages<D>,
    ) -> Result<BenchmarkSummary> {
        let dispatch = kernel.dispatch();
        debug!(
            "run kernels using global size : {}",
            dispatch.global_work_size
        );
        let mut acc = TimingAccumulator::default();
        let launches = self.warmup + self.iterations;
        for i in 0..launches {
            let (input, output) = images.split_mut();
            let times = device.launch(kernel.kernel(), input, output, &dispatch)?;
            if i >= self.warmup {
                acc.record(times.duration_ns());
            }
        }
        let summary = acc.finish(launches);
        info!("avg kernel duration (us) : {}", summary.average_us);
        Ok(summary)
    }
}
