//! Dynamic code execution.
//!
//! [`ExecEngine`] takes raw AArch64 instructions, installs them with a
//! trailing `RET` in a freshly allocated vmalloc region, makes the region
//! executable and runs it synchronously on a set of CPUs, loading and
//! capturing `x0..x28` around the call.

mod engine;
mod region;
mod regs;
pub(crate) mod trampoline;

pub use engine::ExecEngine;
pub use region::{ExecRegion, Executable, Writable};
pub use regs::{Arm64Regs, NUM_REGS};

use axerrno::AxError;

/// `RET` (return to the address in `x30`).
pub const AARCH64_RET: u32 = 0xd65f_03c0;

/// Execution engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The request was rejected before anything was allocated.
    InvalidInput(&'static str),
    /// The vmalloc pool could not supply the region.
    AllocationFailed,
    /// The region could not be made executable.
    PermissionDenied,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidInput(why) => write!(f, "Invalid execution request: {}", why),
            Self::AllocationFailed => write!(f, "Failed to allocate executable region"),
            Self::PermissionDenied => write!(f, "Failed to make region executable"),
        }
    }
}

impl core::error::Error for Error {}

impl From<Error> for AxError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(_) => AxError::InvalidInput,
            Error::AllocationFailed => AxError::NoMemory,
            Error::PermissionDenied => AxError::PermissionDenied,
        }
    }
}
