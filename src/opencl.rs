//! OpenCL backend.
//!
//! Only compiled with the `opencl` feature:
//! ```bash
//! cargo run --release --features opencl --bin stockham-sweep -- --device opencl
//! ```
//!
//! The context and the profiling-enabled command queue are created once and
//! shared by every sweep iteration. Programs, kernels and images are
//! `opencl3` handles that release themselves on drop.

use std::ptr;

use log::{debug, warn};
use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_DEFAULT};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{
    Image, CL_FLOAT, CL_MEM_OBJECT_IMAGE1D, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY, CL_RGBA,
};
use opencl3::program::Program;
use opencl3::types::{cl_image_desc, cl_image_format, CL_BLOCKING};

use crate::device::{ComputeDevice, Dispatch, EventTimes, ImageAccess, PIXEL_LANES};
use crate::error::{Error, Result};

/// A built program and the kernel created from it.
///
/// Field order matters: the kernel is released before its program.
pub struct ClKernel {
    kernel: Kernel,
    _program: Program,
}

pub struct ClImage {
    image: Image,
    width: usize,
}

/// The default OpenCL device with its context and command queue.
pub struct ClDevice {
    device: Device,
    context: Context,
    queue: CommandQueue,
}

impl ClDevice {
    /// Open the first device of type `CL_DEVICE_TYPE_DEFAULT`.
    pub fn new_default() -> Result<Self> {
        let ids = get_all_devices(CL_DEVICE_TYPE_DEFAULT)
            .map_err(|e| Error::device("clGetDeviceIDs", e))?;
        let id = *ids.first().ok_or_else(|| Error::Device {
            op: "clGetDeviceIDs",
            message: "no OpenCL device available".to_string(),
        })?;
        let device = Device::new(id);
        let context = Context::from_device(&device)
            .map_err(|e| Error::device("clCreateContext", e))?;
        // OpenCL 1.2 entry point: macOS has nothing newer.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, CL_QUEUE_PROFILING_ENABLE)
            .map_err(|e| Error::device("clCreateCommandQueue", e))?;
        debug!(
            "opened OpenCL device {}",
            device.name().unwrap_or_default().trim()
        );
        Ok(Self {
            device,
            context,
            queue,
        })
    }

    fn region(width: usize) -> ([usize; 3], [usize; 3]) {
        ([0, 0, 0], [width, 1, 1])
    }
}

impl ComputeDevice for ClDevice {
    type Kernel = ClKernel;
    type Image = ClImage;

    fn name(&self) -> String {
        self.device.name().unwrap_or_default().trim().to_string()
    }

    fn local_mem_size(&self) -> Result<u64> {
        self.device
            .local_mem_size()
            .map_err(|e| Error::device("clGetDeviceInfo(CL_DEVICE_LOCAL_MEM_SIZE)", e))
    }

    fn build_kernel(&self, source: &str, entry_point: &str, options: &str) -> Result<ClKernel> {
        let program = Program::create_and_build_from_source(&self.context, source, options)
            .map_err(|log| Error::Build { log })?;
        let kernel = Kernel::create(&program, entry_point)
            .map_err(|e| Error::device("clCreateKernel", e))?;
        Ok(ClKernel {
            kernel,
            _program: program,
        })
    }

    fn kernel_work_group_size(&self, kernel: &ClKernel) -> Result<usize> {
        kernel
            .kernel
            .get_work_group_size(self.device.id())
            .map_err(|e| Error::device("clGetKernelWorkGroupInfo(CL_KERNEL_WORK_GROUP_SIZE)", e))
    }

    fn create_image(&self, access: ImageAccess, width: usize) -> Result<ClImage> {
        let format = cl_image_format {
            image_channel_order: CL_RGBA,
            image_channel_data_type: CL_FLOAT,
        };
        let desc = cl_image_desc {
            image_type: CL_MEM_OBJECT_IMAGE1D,
            image_width: width,
            image_height: 1,
            image_depth: 1,
            image_array_size: 1,
            image_row_pitch: 0,
            image_slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: ptr::null_mut(),
        };
        let flags = match access {
            ImageAccess::ReadOnly => CL_MEM_READ_ONLY,
            ImageAccess::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        let host_ptr = ptr::null_mut();
        // SAFETY: no host pointer is supplied, the image owns its storage.
        let image = unsafe { Image::create(&self.context, flags, &format, &desc, host_ptr) }
            .map_err(|e| Error::device("clCreateImage", e))?;
        Ok(ClImage { image, width })
    }

    fn write_image(&self, image: &mut ClImage, pixels: &[f32]) -> Result<()> {
        if pixels.len() != image.width * PIXEL_LANES {
            return Err(Error::device(
                "clEnqueueWriteImage",
                "CL_INVALID_VALUE: region size",
            ));
        }
        let (origin, region) = Self::region(image.width);
        // SAFETY: `pixels` covers the whole region and the write is blocking,
        // so the host memory outlives the transfer.
        let event = unsafe {
            self.queue.enqueue_write_image(
                &mut image.image,
                CL_BLOCKING,
                origin.as_ptr(),
                region.as_ptr(),
                0,
                0,
                pixels.as_ptr() as *mut _,
                &[],
            )
        }
        .map_err(|e| Error::device("clEnqueueWriteImage", e))?;
        event.wait().map_err(|e| Error::device("clWaitForEvents", e))
    }

    fn read_image(&self, image: &ClImage, pixels: &mut [f32]) -> Result<()> {
        if pixels.len() != image.width * PIXEL_LANES {
            return Err(Error::device(
                "clEnqueueReadImage",
                "CL_INVALID_VALUE: region size",
            ));
        }
        let (origin, region) = Self::region(image.width);
        // SAFETY: `pixels` covers the whole region and the read is blocking.
        let event = unsafe {
            self.queue.enqueue_read_image(
                &image.image,
                CL_BLOCKING,
                origin.as_ptr(),
                region.as_ptr(),
                0,
                0,
                pixels.as_mut_ptr() as *mut _,
                &[],
            )
        }
        .map_err(|e| Error::device("clEnqueueReadImage", e))?;
        event.wait().map_err(|e| Error::device("clWaitForEvents", e))
    }

    fn launch(
        &self,
        kernel: &ClKernel,
        input: &ClImage,
        output: &mut ClImage,
        dispatch: &Dispatch,
    ) -> Result<EventTimes> {
        // SAFETY: argument order and types match `kernel_func(read_only
        // image1d_t, write_only image1d_t, __local float2*)`.
        let event = unsafe {
            ExecuteKernel::new(&kernel.kernel)
                .set_arg(&input.image)
                .set_arg(&output.image)
                .set_arg_local_buffer(dispatch.local_mem_bytes)
                .set_global_work_size(dispatch.global_work_size)
                .set_local_work_size(dispatch.local_work_size)
                .enqueue_nd_range(&self.queue)
        }
        .map_err(|e| Error::device("clEnqueueNDRangeKernel", e))?;
        event
            .wait()
            .map_err(|e| Error::device("clWaitForEvents", e))?;
        let start_ns = event
            .profiling_command_start()
            .map_err(|e| Error::device("clGetEventProfilingInfo(CL_PROFILING_COMMAND_START)", e))?;
        let end_ns = event
            .profiling_command_end()
            .map_err(|e| Error::device("clGetEventProfilingInfo(CL_PROFILING_COMMAND_END)", e))?;
        Ok(EventTimes { start_ns, end_ns })
    }

    fn finish(&self) -> Result<()> {
        self.queue.flush().map_err(|e| Error::device("clFlush", e))?;
        self.queue.finish().map_err(|e| Error::device("clFinish", e))
    }
}

impl Drop for ClDevice {
    fn drop(&mut self) {
        if let Err(e) = self.queue.finish() {
            warn!("clFinish failed during teardown: {e}");
        }
    }
}
