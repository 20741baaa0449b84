//! In-process stand-in for a GPU.
//!
//! [`HostDevice`] implements [`ComputeDevice`] without any platform runtime.
//! "Building" a kernel reads the `#define` block of the instantiated
//! template, the work-group capacity of a kernel is a configurable function
//! of its per-thread butterfly count (mimicking register pressure), and a
//! launch runs the same radix-2 Stockham stages as the shipped kernel on the
//! image contents. Every kernel and image handed out is counted on
//! acquisition and on release.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::trace;
use rustfft::num_complex::Complex32;

use crate::device::{ComputeDevice, Dispatch, EventTimes, ImageAccess, PIXEL_LANES};
use crate::error::{Error, Result};
use crate::template::parse_hex_float;

pub const DEFAULT_LOCAL_MEM_SIZE: u64 = 64 * 1024;
pub const DEFAULT_MAX_WORK_GROUP_SIZE: usize = 256;

type WorkGroupLimit = Arc<dyn Fn(usize) -> usize + Send + Sync>;

/// Acquisition and release tallies shared by a device and its handles.
#[derive(Debug, Default)]
struct ResourceCounters {
    kernels_built: AtomicUsize,
    kernels_released: AtomicUsize,
    peak_kernels: AtomicUsize,
    images_created: AtomicUsize,
    images_released: AtomicUsize,
    peak_images: AtomicUsize,
    launches: AtomicUsize,
}

impl ResourceCounters {
    fn acquire(self: &Arc<Self>, kind: Resource) -> Lease {
        let (acquired, released, peak) = self.slots(kind);
        let live = acquired.fetch_add(1, Ordering::SeqCst) + 1 - released.load(Ordering::SeqCst);
        peak.fetch_max(live, Ordering::SeqCst);
        Lease {
            counters: Arc::clone(self),
            kind,
        }
    }

    fn slots(&self, kind: Resource) -> (&AtomicUsize, &AtomicUsize, &AtomicUsize) {
        match kind {
            Resource::Kernel => (
                &self.kernels_built,
                &self.kernels_released,
                &self.peak_kernels,
            ),
            Resource::Image => (
                &self.images_created,
                &self.images_released,
                &self.peak_images,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Kernel,
    Image,
}

/// Marks one live handle; releasing it is recorded on drop.
#[derive(Debug)]
struct Lease {
    counters: Arc<ResourceCounters>,
    kind: Resource,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let (_, released, _) = self.counters.slots(self.kind);
        released.fetch_add(1, Ordering::SeqCst);
        trace!("host device released {:?}", self.kind);
    }
}

/// Point-in-time copy of the resource tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub kernels_built: usize,
    pub kernels_released: usize,
    pub peak_kernels: usize,
    pub images_created: usize,
    pub images_released: usize,
    pub peak_images: usize,
    pub launches: usize,
}

impl ResourceSnapshot {
    pub fn live_kernels(&self) -> usize {
        self.kernels_built - self.kernels_released
    }

    pub fn live_images(&self) -> usize {
        self.images_created - self.images_released
    }
}

/// Values read back from the `#define` block of an instantiated template.
#[derive(Debug, Clone, Copy, PartialEq)]
struct KernelDefines {
    angle: f32,
    butterflies: usize,
    log2_butterflies: u32,
    per_thread: usize,
}

impl KernelDefines {
    fn parse(source: &str) -> Result<Self> {
        let mut angle = None;
        let mut butterflies = None;
        let mut log2_butterflies = None;
        let mut per_thread = None;
        for line in source.lines() {
            let Some(rest) = line.trim_start().strip_prefix("#define") else {
                continue;
            };
            let mut parts = rest.split_whitespace();
            let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match name {
                "MINUS_PI_OVER_N_GLOBAL_BUTTERFLIES" => {
                    angle = Some(parse_define(name, value, parse_hex_float)?)
                }
                "N_GLOBAL_BUTTERFLIES" => {
                    butterflies = Some(parse_define(name, value, |v| v.parse::<usize>().ok())?)
                }
                "LOG2_N_GLOBAL_BUTTERFLIES" => {
                    log2_butterflies = Some(parse_define(name, value, |v| v.parse::<u32>().ok())?)
                }
                "N_LOCAL_BUTTERFLIES" => {
                    per_thread = Some(parse_define(name, value, |v| v.parse::<usize>().ok())?)
                }
                _ => {}
            }
        }
        let defines = Self {
            angle: angle.ok_or_else(|| undefined("MINUS_PI_OVER_N_GLOBAL_BUTTERFLIES"))?,
            butterflies: butterflies.ok_or_else(|| undefined("N_GLOBAL_BUTTERFLIES"))?,
            log2_butterflies: log2_butterflies
                .ok_or_else(|| undefined("LOG2_N_GLOBAL_BUTTERFLIES"))?,
            per_thread: per_thread.ok_or_else(|| undefined("N_LOCAL_BUTTERFLIES"))?,
        };
        if defines.log2_butterflies >= usize::BITS
            || 1usize << defines.log2_butterflies != defines.butterflies
        {
            return Err(Error::Build {
                log: format!(
                    "LOG2_N_GLOBAL_BUTTERFLIES {} does not match N_GLOBAL_BUTTERFLIES {}",
                    defines.log2_butterflies, defines.butterflies
                ),
            });
        }
        if defines.per_thread == 0 {
            return Err(Error::Build {
                log: "N_LOCAL_BUTTERFLIES must be positive".to_string(),
            });
        }
        Ok(defines)
    }
}

fn parse_define<T>(name: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| Error::Build {
        log: format!("error: cannot parse `{value}` for {name}"),
    })
}

fn undefined(name: &str) -> Error {
    Error::Build {
        log: format!("error: use of undeclared identifier '{name}'"),
    }
}

pub struct HostKernel {
    defines: KernelDefines,
    _lease: Lease,
}

pub struct HostImage {
    access: ImageAccess,
    pixels: Vec<f32>,
    _lease: Lease,
}

impl HostImage {
    pub fn width(&self) -> usize {
        self.pixels.len() / PIXEL_LANES
    }
}

/// Simulated compute device. See the module documentation.
pub struct HostDevice {
    local_mem_size: u64,
    work_group_limit: WorkGroupLimit,
    fixed_duration_ns: Option<u64>,
    output_fault: Option<usize>,
    counters: Arc<ResourceCounters>,
    epoch: Instant,
}

impl fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDevice")
            .field("local_mem_size", &self.local_mem_size)
            .field("fixed_duration_ns", &self.fixed_duration_ns)
            .field("output_fault", &self.output_fault)
            .field("resources", &self.resources())
            .finish_non_exhaustive()
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            local_mem_size: DEFAULT_LOCAL_MEM_SIZE,
            work_group_limit: Arc::new(|_| DEFAULT_MAX_WORK_GROUP_SIZE),
            fixed_duration_ns: None,
            output_fault: None,
            counters: Arc::new(ResourceCounters::default()),
            epoch: Instant::now(),
        }
    }

    pub fn with_local_mem_size(mut self, bytes: u64) -> Self {
        self.local_mem_size = bytes;
        self
    }

    /// Same work-group limit for every kernel.
    pub fn with_max_work_group_size(self, size: usize) -> Self {
        self.with_work_group_limit(move |_| size)
    }

    /// Work-group limit as a function of the kernel's per-thread butterfly count.
    pub fn with_work_group_limit<F>(mut self, limit: F) -> Self
    where
        F: Fn(usize) -> usize + Send + Sync + 'static,
    {
        self.work_group_limit = Arc::new(limit);
        self
    }

    /// Report every launch as taking exactly `ns` nanoseconds.
    pub fn with_fixed_duration(mut self, ns: u64) -> Self {
        self.fixed_duration_ns = Some(ns);
        self
    }

    /// Corrupt the real part of output element `index` on every launch.
    pub fn with_output_fault(mut self, index: usize) -> Self {
        self.output_fault = Some(index);
        self
    }

    pub fn resources(&self) -> ResourceSnapshot {
        let c = &self.counters;
        ResourceSnapshot {
            kernels_built: c.kernels_built.load(Ordering::SeqCst),
            kernels_released: c.kernels_released.load(Ordering::SeqCst),
            peak_kernels: c.peak_kernels.load(Ordering::SeqCst),
            images_created: c.images_created.load(Ordering::SeqCst),
            images_released: c.images_released.load(Ordering::SeqCst),
            peak_images: c.peak_images.load(Ordering::SeqCst),
            launches: c.launches.load(Ordering::SeqCst),
        }
    }

    fn timestamps(&self, launch_index: usize, run: impl FnOnce()) -> EventTimes {
        match self.fixed_duration_ns {
            Some(ns) => {
                run();
                let start_ns = launch_index as u64 * ns;
                EventTimes {
                    start_ns,
                    end_ns: start_ns + ns,
                }
            }
            None => {
                let start_ns = self.epoch.elapsed().as_nanos() as u64;
                run();
                let end_ns = self.epoch.elapsed().as_nanos() as u64;
                EventTimes { start_ns, end_ns }
            }
        }
    }
}

/// Radix-2 Stockham stages in the same index form as the shipped kernel.
fn stockham(defines: &KernelDefines, samples: &[f32]) -> Vec<Complex32> {
    let b = defines.butterflies;
    let log2 = defines.log2_butterflies;
    let mut src: Vec<Complex32> = samples[..2 * b]
        .iter()
        .map(|&x| Complex32::new(x, 0.0))
        .collect();
    let mut dst = vec![Complex32::new(0.0, 0.0); 2 * b];
    for stage in 0..=log2 {
        let ns = 1usize << stage;
        for j in 0..b {
            let k = j & (ns - 1);
            let angle = defines.angle * (k << (log2 - stage)) as f32;
            let (sin, cos) = angle.sin_cos();
            let u = src[j];
            let v = src[j + b] * Complex32::new(cos, sin);
            let d = ((j - k) << 1) + k;
            dst[d] = u + v;
            dst[d + ns] = u - v;
        }
        core::mem::swap(&mut src, &mut dst);
    }
    src
}

fn invalid(op: &'static str, message: impl Into<String>) -> Error {
    Error::Device {
        op,
        message: message.into(),
    }
}

impl ComputeDevice for HostDevice {
    type Kernel = HostKernel;
    type Image = HostImage;

    fn name(&self) -> String {
        "host simulator".to_string()
    }

    fn local_mem_size(&self) -> Result<u64> {
        Ok(self.local_mem_size)
    }

    fn build_kernel(&self, source: &str, entry_point: &str, options: &str) -> Result<HostKernel> {
        trace!("host build of `{entry_point}` with options `{options}`");
        if source.contains("replace_") {
            return Err(Error::Build {
                log: "error: source still contains template placeholders".to_string(),
            });
        }
        if !source.contains(&format!("void {entry_point}(")) {
            return Err(invalid(
                "clCreateKernel",
                format!("CL_INVALID_KERNEL_NAME: no kernel named `{entry_point}`"),
            ));
        }
        let defines = KernelDefines::parse(source)?;
        Ok(HostKernel {
            defines,
            _lease: self.counters.acquire(Resource::Kernel),
        })
    }

    fn kernel_work_group_size(&self, kernel: &HostKernel) -> Result<usize> {
        Ok((self.work_group_limit)(kernel.defines.per_thread))
    }

    fn create_image(&self, access: ImageAccess, width: usize) -> Result<HostImage> {
        if width == 0 {
            return Err(invalid("clCreateImage", "CL_INVALID_IMAGE_SIZE"));
        }
        Ok(HostImage {
            access,
            pixels: vec![0.0; width * PIXEL_LANES],
            _lease: self.counters.acquire(Resource::Image),
        })
    }

    fn write_image(&self, image: &mut HostImage, pixels: &[f32]) -> Result<()> {
        if pixels.len() != image.pixels.len() {
            return Err(invalid(
                "clEnqueueWriteImage",
                format!(
                    "CL_INVALID_VALUE: region of {} lanes, image holds {}",
                    pixels.len(),
                    image.pixels.len()
                ),
            ));
        }
        image.pixels.copy_from_slice(pixels);
        Ok(())
    }

    fn read_image(&self, image: &HostImage, pixels: &mut [f32]) -> Result<()> {
        if pixels.len() != image.pixels.len() {
            return Err(invalid(
                "clEnqueueReadImage",
                format!(
                    "CL_INVALID_VALUE: region of {} lanes, image holds {}",
                    pixels.len(),
                    image.pixels.len()
                ),
            ));
        }
        pixels.copy_from_slice(&image.pixels);
        Ok(())
    }

    fn launch(
        &self,
        kernel: &HostKernel,
        input: &HostImage,
        output: &mut HostImage,
        dispatch: &Dispatch,
    ) -> Result<EventTimes> {
        const OP: &str = "clEnqueueNDRangeKernel";
        let defines = &kernel.defines;
        let max_wg = (self.work_group_limit)(defines.per_thread);
        if dispatch.local_work_size != dispatch.global_work_size {
            return Err(invalid(
                OP,
                "CL_INVALID_WORK_GROUP_SIZE: kernel needs a single work-group",
            ));
        }
        if dispatch.local_work_size == 0 || dispatch.local_work_size > max_wg {
            return Err(invalid(
                OP,
                format!(
                    "CL_INVALID_WORK_GROUP_SIZE: {} exceeds {max_wg}",
                    dispatch.local_work_size
                ),
            ));
        }
        if dispatch.global_work_size * defines.per_thread != defines.butterflies {
            return Err(invalid(OP, "CL_INVALID_GLOBAL_WORK_SIZE"));
        }
        if dispatch.local_mem_bytes as u64 > self.local_mem_size {
            return Err(invalid(OP, "CL_OUT_OF_RESOURCES: local memory"));
        }
        if input.access != ImageAccess::ReadOnly || output.access != ImageAccess::WriteOnly {
            return Err(invalid(
                OP,
                "CL_INVALID_KERNEL_ARGS: image access qualifiers",
            ));
        }
        let samples = 2 * defines.butterflies;
        if input.pixels.len() < samples || output.pixels.len() != 2 * samples {
            return Err(invalid(OP, "CL_INVALID_KERNEL_ARGS: image sizes"));
        }

        let launch_index = self.counters.launches.fetch_add(1, Ordering::SeqCst);
        let fault = self.output_fault;
        let times = self.timestamps(launch_index, || {
            let spectrum = stockham(defines, &input.pixels);
            for (lanes, c) in output.pixels.chunks_exact_mut(2).zip(&spectrum) {
                lanes[0] = c.re;
                lanes[1] = c.im;
            }
            if let Some(index) = fault {
                if let Some(lane) = output.pixels.get_mut(2 * index) {
                    *lane += 1.0;
                }
            }
        });
        Ok(times)
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::reference_forward_fft;
    use crate::template::{KernelParams, KernelTemplate, ProblemSize};

    fn source(n: usize, per_thread: usize) -> String {
        let params = KernelParams::new(ProblemSize::new(n).unwrap(), per_thread);
        KernelTemplate::builtin().instantiate(&params).unwrap()
    }

    #[test]
    fn build_reads_the_define_block() {
        let device = HostDevice::new();
        let kernel = device
            .build_kernel(&source(64, 2), "kernel_func", "")
            .unwrap();
        assert_eq!(kernel.defines.butterflies, 32);
        assert_eq!(kernel.defines.log2_butterflies, 5);
        assert_eq!(kernel.defines.per_thread, 2);
        assert_eq!(kernel.defines.angle, ProblemSize::new(64).unwrap().angle());
    }

    #[test]
    fn build_rejects_raw_template_and_wrong_entry_point() {
        let device = HostDevice::new();
        let raw = KernelTemplate::builtin();
        assert!(matches!(
            device.build_kernel(raw.source(), "kernel_func", ""),
            Err(Error::Build { .. })
        ));
        assert!(matches!(
            device.build_kernel(&source(8, 1), "other_kernel", ""),
            Err(Error::Device { .. })
        ));
        assert_eq!(device.resources().kernels_built, 0);
    }

    #[test]
    fn leases_are_counted_and_released() {
        let device = HostDevice::new();
        {
            let src = source(8, 1);
            let _k = device.build_kernel(&src, "kernel_func", "").unwrap();
            let _a = device.create_image(ImageAccess::ReadOnly, 2).unwrap();
            let _b = device.create_image(ImageAccess::WriteOnly, 4).unwrap();
            let live = device.resources();
            assert_eq!(live.live_kernels(), 1);
            assert_eq!(live.live_images(), 2);
        }
        let after = device.resources();
        assert_eq!(after.live_kernels(), 0);
        assert_eq!(after.live_images(), 0);
        assert_eq!(after.peak_images, 2);
    }

    #[test]
    fn stockham_matches_reference() {
        for n in [2usize, 4, 8, 64, 512] {
            let size = ProblemSize::new(n).unwrap();
            let defines = KernelDefines {
                angle: size.angle(),
                butterflies: size.butterflies(),
                log2_butterflies: size.log2_butterflies(),
                per_thread: 1,
            };
            let input: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 11) as f32 / 11.0).collect();
            let expected = reference_forward_fft(&input);
            for (i, (a, b)) in stockham(&defines, &input).iter().zip(&expected).enumerate() {
                assert!((a.re - b.re).abs() < 1e-3, "n={n} bin {i}: {a} vs {b}");
                assert!((a.im - b.im).abs() < 1e-3, "n={n} bin {i}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn launch_enforces_work_group_capacity() {
        let device = HostDevice::new().with_max_work_group_size(2);
        let src = source(16, 1);
        let kernel = device.build_kernel(&src, "kernel_func", "").unwrap();
        let input = device.create_image(ImageAccess::ReadOnly, 4).unwrap();
        let mut output = device.create_image(ImageAccess::WriteOnly, 8).unwrap();
        let dispatch = Dispatch {
            global_work_size: 8,
            local_work_size: 8,
            local_mem_bytes: 16 * 16,
        };
        let err = device
            .launch(&kernel, &input, &mut output, &dispatch)
            .unwrap_err();
        assert!(err.to_string().contains("CL_INVALID_WORK_GROUP_SIZE"));
        assert_eq!(device.resources().launches, 0);
    }

    #[test]
    fn fixed_duration_yields_synthetic_clock() {
        let device = HostDevice::new().with_fixed_duration(2_500);
        let a = device.timestamps(0, || {});
        let b = device.timestamps(1, || {});
        assert_eq!(a.duration_ns(), 2_500);
        assert_eq!(b.start_ns, 2_500);
    }
}
