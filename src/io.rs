//! Moving transform data in and out of device images.
//!
//! Both images use the `RGBA`/`FLOAT` format, so one pixel packs four `f32`
//! lanes. The real input of length `N` occupies `N / 4` pixels; the complex
//! output occupies `2 * N / 4` pixels since each element is a pair of lanes.

use core::mem::size_of;

use log::debug;
use rustfft::num_complex::Complex32;

use crate::device::{ComputeDevice, ImageAccess, LANE_BYTES, PIXEL_LANES};
use crate::error::{Error, Result};
use crate::template::ProblemSize;

/// Check that a host element of type `T` spans `lanes` device lanes exactly.
pub fn check_element_size<T>(lanes: usize) -> Result<()> {
    let host = size_of::<T>();
    let device = lanes * LANE_BYTES;
    if host != device {
        return Err(Error::ElementSizeMismatch { host, device });
    }
    Ok(())
}

/// Pixels of the read-only input image for `len` real samples.
///
/// Two-point transforms still get one (partially used) pixel.
pub fn input_width(len: usize) -> usize {
    len.div_ceil(PIXEL_LANES).max(1)
}

/// Pixels of the write-only output image for `len` complex results.
pub fn output_width(len: usize) -> usize {
    (2 * len).div_ceil(PIXEL_LANES)
}

/// Local memory the kernel needs: two ping-pong copies of the complex output.
pub fn required_local_mem(len: usize) -> u64 {
    (2 * len * size_of::<Complex32>()) as u64
}

/// The input/output image pair of one sweep iteration.
pub struct DeviceImages<D: ComputeDevice> {
    input: D::Image,
    output: D::Image,
    len: usize,
}

impl<D: ComputeDevice> DeviceImages<D> {
    /// Validate `input`, check the device can hold the working set, allocate
    /// both images and write the input.
    ///
    /// Fails with [`Error::InsufficientLocalMemory`] before allocating
    /// anything when the device is too small for this size.
    pub fn upload(device: &D, input: &[f32]) -> Result<Self> {
        let size = ProblemSize::new(input.len())?;
        check_element_size::<f32>(1)?;
        check_element_size::<Complex32>(2)?;

        let required = required_local_mem(size.len());
        let available = device.local_mem_size()?;
        if available < required {
            return Err(Error::InsufficientLocalMemory {
                required,
                available,
            });
        }

        let in_width = input_width(size.len());
        let mut input_image = device.create_image(ImageAccess::ReadOnly, in_width)?;
        let output_image = device.create_image(ImageAccess::WriteOnly, output_width(size.len()))?;

        let mut pixels = vec![0.0f32; in_width * PIXEL_LANES];
        pixels[..input.len()].copy_from_slice(input);
        device.write_image(&mut input_image, &pixels)?;
        debug!("uploaded {} samples into {in_width} pixels", size.len());

        Ok(Self {
            input: input_image,
            output: output_image,
            len: size.len(),
        })
    }

    /// Input image for reading together with output image for writing.
    pub fn split_mut(&mut self) -> (&D::Image, &mut D::Image) {
        (&self.input, &mut self.output)
    }

    /// Blocking read of the transform result. Both images are released when
    /// this returns, whatever the caller does with the data afterwards.
    pub fn download(self, device: &D) -> Result<Vec<Complex32>> {
        let mut lanes = vec![0.0f32; output_width(self.len) * PIXEL_LANES];
        device.read_image(&self.output, &mut lanes)?;
        Ok(lanes
            .chunks_exact(2)
            .take(self.len)
            .map(|pair| Complex32::new(pair[0], pair[1]))
            .collect())
    }
}
