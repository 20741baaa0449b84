//! Host-side reference transforms.
//!
//! Two independent routes to the forward FFT of a real signal:
//!
//! - [`reference_forward_fft`] delegates to `rustfft`, evaluated in double
//!   precision and narrowed to `f32` at the end. This is the trusted baseline.
//! - [`iterative_fft`] is a non-recursive radix-2 Cooley–Tukey transform that
//!   expects its input already in bit-reversed order (see
//!   [`bit_reverse_permutation`]).
//!
//! The two must agree on the same logical input before either is used to
//! judge a device result.

use rustfft::num_complex::{Complex, Complex32};
use rustfft::FftPlanner;

/// Forward FFT of a real signal, computed in `f64` by `rustfft`.
pub fn reference_forward_fft(input: &[f32]) -> Vec<Complex32> {
    if input.is_empty() {
        return Vec::new();
    }
    let mut buf: Vec<Complex<f64>> = input
        .iter()
        .map(|&x| Complex::new(x as f64, 0.0))
        .collect();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(buf.len()).process(&mut buf);
    buf.into_iter()
        .map(|c| Complex32::new(c.re as f32, c.im as f32))
        .collect()
}

/// Copy of `input` with element `i` moved to the bit-reversed index of `i`.
///
/// The length must be a power of two.
pub fn bit_reverse_permutation<T: Copy>(input: &[T]) -> Vec<T> {
    let n = input.len();
    debug_assert!(n == 0 || n.is_power_of_two());
    let mut out = input.to_vec();
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            out.swap(i, j);
        }
    }
    out
}

/// Non-recursive radix-2 FFT over a real signal that is already in
/// bit-reversed order.
///
/// Butterflies run in `f32`; twiddles are evaluated directly per index in
/// `f64` rather than by recurrence, so their error does not grow with the
/// stage length.
pub fn iterative_fft(bit_reversed: &[f32]) -> Vec<Complex32> {
    let n = bit_reversed.len();
    debug_assert!(n == 0 || n.is_power_of_two());
    let mut buf: Vec<Complex32> = bit_reversed
        .iter()
        .map(|&x| Complex32::new(x, 0.0))
        .collect();
    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = -2.0 * core::f64::consts::PI / len as f64;
        let twiddles: Vec<Complex32> = (0..half)
            .map(|j| {
                let (sin, cos) = (step * j as f64).sin_cos();
                Complex32::new(cos as f32, sin as f32)
            })
            .collect();
        for chunk in buf.chunks_exact_mut(len) {
            let (lo, hi) = chunk.split_at_mut(half);
            for ((u, v), w) in lo.iter_mut().zip(hi.iter_mut()).zip(&twiddles) {
                let t = *v * w;
                *v = *u - t;
                *u += t;
            }
        }
        len <<= 1;
    }
    buf
}
