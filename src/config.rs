//! Sweep configuration.
//!
//! Values start from built-in defaults and can be overridden through
//! `STOCKHAM_CL_*` environment variables; the command line applies its own
//! flags on top.

use std::env;
use std::str::FromStr;

use crate::bench::{Benchmark, DEFAULT_ITERATIONS, DEFAULT_WARMUP};
use crate::error::{Error, Result};
use crate::probe::{
    ProbeOptions, DEFAULT_BUILD_OPTIONS, DEFAULT_ENTRY_POINT, DEFAULT_MAX_PROBE_ATTEMPTS,
};
use crate::verify::{Verifier, DEFAULT_TOLERANCE};

/// First problem size of a sweep.
pub const DEFAULT_MIN_SIZE: usize = 8;
/// Sizes must stay strictly below this bound.
pub const DEFAULT_MAX_SIZE: usize = 10_000_000;

pub const ENV_MIN_SIZE: &str = "STOCKHAM_CL_MIN_SIZE";
pub const ENV_MAX_SIZE: &str = "STOCKHAM_CL_MAX_SIZE";
pub const ENV_ITERATIONS: &str = "STOCKHAM_CL_ITERATIONS";
pub const ENV_WARMUP: &str = "STOCKHAM_CL_WARMUP";
pub const ENV_TOLERANCE: &str = "STOCKHAM_CL_TOLERANCE";
pub const ENV_SEED: &str = "STOCKHAM_CL_SEED";
pub const ENV_MAX_PROBE_ATTEMPTS: &str = "STOCKHAM_CL_MAX_PROBE_ATTEMPTS";
pub const ENV_BUILD_OPTIONS: &str = "STOCKHAM_CL_BUILD_OPTIONS";

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub iterations: usize,
    pub warmup: usize,
    pub tolerance: f32,
    pub seed: u64,
    pub verify: bool,
    pub max_probe_attempts: usize,
    pub entry_point: String,
    pub build_options: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            iterations: DEFAULT_ITERATIONS,
            warmup: DEFAULT_WARMUP,
            tolerance: DEFAULT_TOLERANCE,
            seed: 0,
            verify: true,
            max_probe_attempts: DEFAULT_MAX_PROBE_ATTEMPTS,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}={raw:?} is not a valid value")))?;
    }
    Ok(())
}

impl SweepConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, which plays the role of the
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        parse_var(&lookup, ENV_MIN_SIZE, &mut cfg.min_size)?;
        parse_var(&lookup, ENV_MAX_SIZE, &mut cfg.max_size)?;
        parse_var(&lookup, ENV_ITERATIONS, &mut cfg.iterations)?;
        parse_var(&lookup, ENV_WARMUP, &mut cfg.warmup)?;
        parse_var(&lookup, ENV_TOLERANCE, &mut cfg.tolerance)?;
        parse_var(&lookup, ENV_SEED, &mut cfg.seed)?;
        parse_var(&lookup, ENV_MAX_PROBE_ATTEMPTS, &mut cfg.max_probe_attempts)?;
        if let Some(options) = lookup(ENV_BUILD_OPTIONS) {
            cfg.build_options = options;
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_size < 2 || !self.min_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "min size {} must be a power of two of at least 2",
                self.min_size
            )));
        }
        if self.max_size <= self.min_size {
            return Err(Error::Config(format!(
                "max size {} must exceed min size {}",
                self.max_size, self.min_size
            )));
        }
        if self.iterations == 0 {
            return Err(Error::Config(
                "at least one measured iteration is required".into(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(Error::Config(format!(
                "tolerance {} must be finite and positive",
                self.tolerance
            )));
        }
        if self.max_probe_attempts == 0 {
            return Err(Error::Config("max probe attempts must be positive".into()));
        }
        if self.entry_point.is_empty() {
            return Err(Error::Config("kernel entry point must not be empty".into()));
        }
        Ok(())
    }

    /// Problem sizes visited by the sweep: `min_size` doubling while below
    /// `max_size`.
    pub fn sizes(&self) -> impl Iterator<Item = usize> {
        let max = self.max_size;
        core::iter::successors(Some(self.min_size), |&n| n.checked_mul(2))
            .take_while(move |&n| n < max)
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            entry_point: self.entry_point.clone(),
            build_options: self.build_options.clone(),
            max_attempts: self.max_probe_attempts,
        }
    }

    pub fn benchmark(&self) -> Benchmark {
        Benchmark::new(self.iterations, self.warmup)
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.tolerance)
    }
}
