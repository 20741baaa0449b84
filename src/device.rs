//! The slice of a compute platform the sweep needs.
//!
//! A [`ComputeDevice`] owns the context and command queue. Kernels and
//! images are returned as owning handles whose `Drop` releases the platform
//! object, so scope exit is the only cleanup mechanism the callers rely on.

use crate::error::Result;

/// Scalar lanes in one image pixel (`CL_RGBA`).
pub const PIXEL_LANES: usize = 4;

/// Bytes in one pixel lane (`CL_FLOAT`).
pub const LANE_BYTES: usize = 4;

/// Kernel-side access qualifier of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAccess {
    ReadOnly,
    WriteOnly,
}

/// One-dimensional launch geometry plus the size of the local scratch
/// argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub global_work_size: usize,
    pub local_work_size: usize,
    pub local_mem_bytes: usize,
}

/// Profiling timestamps of a completed launch, in device nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTimes {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl EventTimes {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

pub trait ComputeDevice {
    /// A built program together with its entry point.
    type Kernel;
    /// A 1-D `RGBA`/`FLOAT` image.
    type Image;

    fn name(&self) -> String;

    /// Bytes of work-group local memory.
    fn local_mem_size(&self) -> Result<u64>;

    /// Compile `source` and create the kernel `entry_point`.
    fn build_kernel(&self, source: &str, entry_point: &str, options: &str)
        -> Result<Self::Kernel>;

    /// Largest work-group this particular kernel can be launched with.
    fn kernel_work_group_size(&self, kernel: &Self::Kernel) -> Result<usize>;

    /// Allocate an image `width` pixels wide.
    fn create_image(&self, access: ImageAccess, width: usize) -> Result<Self::Image>;

    /// Blocking write of the whole image; `pixels` holds `width * 4` lanes.
    fn write_image(&self, image: &mut Self::Image, pixels: &[f32]) -> Result<()>;

    /// Blocking read of the whole image; `pixels` holds `width * 4` lanes.
    fn read_image(&self, image: &Self::Image, pixels: &mut [f32]) -> Result<()>;

    /// Launch `kernel(input, output, local scratch)`, wait for completion and
    /// return the event's profiling timestamps.
    fn launch(
        &self,
        kernel: &Self::Kernel,
        input: &Self::Image,
        output: &mut Self::Image,
        dispatch: &Dispatch,
    ) -> Result<EventTimes>;

    /// Drain the queue before the device is torn down.
    fn finish(&self) -> Result<()>;
}
