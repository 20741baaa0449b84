//! Numerical checks of the host references and of the device output.
//!
//! Comparisons use a fixed absolute tolerance per complex component. A
//! tolerance scaled with `log2(N)` would assume errors compound at every
//! stage, which holds for products but not for the additions that make up
//! the butterflies.

use core::fmt;

use log::{info, warn};
use rustfft::num_complex::Complex32;

use crate::reference::{bit_reverse_permutation, iterative_fft, reference_forward_fft};

pub const DEFAULT_TOLERANCE: f32 = 0.01;

/// Which comparison a [`Mismatch`] comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Reference FFT against the iterative FFT of the bit-reversed input.
    ReferenceConsistency,
    /// Device output against the reference FFT.
    DeviceOutput,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::ReferenceConsistency => write!(f, "reference consistency"),
            Check::DeviceOutput => write!(f, "device output"),
        }
    }
}

/// First element that exceeded the tolerance, with how many did in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub check: Check,
    pub index: usize,
    pub expected: Complex32,
    pub actual: Complex32,
    /// Largest absolute component difference at `index`.
    pub delta: f32,
    pub offending: usize,
    pub tolerance: f32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: element {} expected {} got {} (delta {} > {}), {} element(s) out of tolerance",
            self.check,
            self.index,
            self.expected,
            self.actual,
            self.delta,
            self.tolerance,
            self.offending
        )
    }
}

/// Larger of two component differences; NaN wins, `f32::max` would drop it.
fn component_delta(d_re: f32, d_im: f32) -> f32 {
    if d_re.is_nan() || d_im.is_nan() {
        f32::NAN
    } else {
        d_re.max(d_im)
    }
}

/// Compare `actual` against `expected` element-wise.
pub fn compare(
    check: Check,
    expected: &[Complex32],
    actual: &[Complex32],
    tolerance: f32,
) -> Result<(), Mismatch> {
    let mut first: Option<(usize, Complex32, Complex32, f32)> = None;
    let mut offending = expected.len().abs_diff(actual.len());
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        let (d_re, d_im) = ((e.re - a.re).abs(), (e.im - a.im).abs());
        // NaN never compares within tolerance.
        if !(d_re <= tolerance && d_im <= tolerance) {
            let delta = component_delta(d_re, d_im);
            offending += 1;
            if first.is_none() {
                first = Some((i, *e, *a, delta));
            }
        }
    }
    if first.is_none() && offending > 0 {
        let i = expected.len().min(actual.len());
        let zero = Complex32::new(0.0, 0.0);
        first = Some((
            i,
            expected.get(i).copied().unwrap_or(zero),
            actual.get(i).copied().unwrap_or(zero),
            f32::INFINITY,
        ));
    }
    match first {
        None => Ok(()),
        Some((index, expected, actual, delta)) => Err(Mismatch {
            check,
            index,
            expected,
            actual,
            delta,
            offending,
            tolerance,
        }),
    }
}

/// Outcome of both checks for one problem size.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub reference_consistency: Result<(), Mismatch>,
    pub device_output: Result<(), Mismatch>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.reference_consistency.is_ok() && self.device_output.is_ok()
    }

    /// The first failing check, reference consistency first.
    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.reference_consistency
            .as_ref()
            .err()
            .or(self.device_output.as_ref().err())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verifier {
    pub tolerance: f32,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Verifier {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    /// Check that the iterative FFT of the bit-reversed input agrees with the
    /// reference FFT, returning the reference for later comparisons.
    pub fn reference_consistency(&self, input: &[f32]) -> (Vec<Complex32>, Result<(), Mismatch>) {
        let reference = reference_forward_fft(input);
        let iterative = iterative_fft(&bit_reverse_permutation(input));
        let outcome = compare(
            Check::ReferenceConsistency,
            &reference,
            &iterative,
            self.tolerance,
        );
        (reference, outcome)
    }

    /// Run both checks. The device output is compared against the reference
    /// of the original, non-permuted input: the kernel needs no bit reversal.
    pub fn verify(&self, input: &[f32], device_output: &[Complex32]) -> VerificationReport {
        let (reference, reference_consistency) = self.reference_consistency(input);
        let device_output = compare(
            Check::DeviceOutput,
            &reference,
            device_output,
            self.tolerance,
        );
        let report = VerificationReport {
            reference_consistency,
            device_output,
        };
        match report.first_mismatch() {
            None => info!("verified {} values within {}", input.len(), self.tolerance),
            Some(m) => warn!("{m}"),
        }
        report
    }
}
