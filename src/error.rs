//! Error type shared by every stage of a sweep.

use core::fmt;

use crate::verify::Mismatch;

/// Errors that can occur while instantiating, probing, running or verifying
/// a Stockham image kernel.
#[derive(Debug)]
pub enum Error {
    /// The transform length is not a power of two.
    NotPowerOfTwo { len: usize },
    /// The transform length is below the two-point minimum.
    SizeTooSmall { len: usize },
    /// A host element does not have the byte size the device image format expects.
    ElementSizeMismatch { host: usize, device: usize },
    /// The kernel template lacks one of the required placeholders.
    MissingPlaceholder(&'static str),
    /// The kernel template contains a placeholder this crate does not know how to fill.
    UnknownPlaceholder(String),
    /// The device compiler rejected the instantiated source.
    Build { log: String },
    /// A compute platform call returned a failure status.
    Device { op: &'static str, message: String },
    /// Probing gave up before the work-group capacity covered every butterfly.
    CapacityNotReached { butterflies: usize, attempts: usize },
    /// The device cannot hold the double-buffered working set in local memory.
    InsufficientLocalMemory { required: u64, available: u64 },
    /// Device output or host references disagree beyond the tolerance.
    Verification(Mismatch),
    /// Invalid configuration value.
    Config(String),
    /// Reading the kernel template failed.
    Io(std::io::Error),
}

impl Error {
    /// Whether this error marks the point where problem sizes outgrew the
    /// device, which ends a sweep cleanly instead of failing it.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Error::InsufficientLocalMemory { .. })
    }

    #[cfg(any(feature = "opencl", test))]
    pub(crate) fn device(op: &'static str, err: impl fmt::Display) -> Self {
        Error::Device {
            op,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotPowerOfTwo { len } => {
                write!(f, "transform length {len} is not a power of two")
            }
            Error::SizeTooSmall { len } => {
                write!(f, "transform length {len} is below the minimum of 2")
            }
            Error::ElementSizeMismatch { host, device } => write!(
                f,
                "host element is {host} bytes but the device pixel channel is {device} bytes"
            ),
            Error::MissingPlaceholder(name) => {
                write!(f, "kernel template has no `{name}` placeholder")
            }
            Error::UnknownPlaceholder(name) => {
                write!(f, "kernel template has unknown placeholder `{name}`")
            }
            Error::Build { log } => write!(f, "kernel build failed:\n{log}"),
            Error::Device { op, message } => write!(f, "{op} failed: {message}"),
            Error::CapacityNotReached {
                butterflies,
                attempts,
            } => write!(
                f,
                "no work-group configuration covers {butterflies} butterflies \
                 after {attempts} compiles"
            ),
            Error::InsufficientLocalMemory {
                required,
                available,
            } => write!(
                f,
                "not enough local memory on the device: need {required} bytes, have {available}"
            ),
            Error::Verification(m) => write!(f, "verification failed: {m}"),
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Mismatch> for Error {
    fn from(m: Mismatch) -> Self {
        Error::Verification(m)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
