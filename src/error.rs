use std::path::PathBuf;

use thiserror::Error;

use crate::gpu::common::DeviceType;

/// Errors raised while probing a single vendor toolchain.
///
/// These never escape the detector: a failing probe contributes an empty
/// device list and the remaining probes still run.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("`{0}` not found")]
    ToolNotFound(String),

    #[error("`{tool}` failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    #[error("`{tool}` did not finish within {seconds}s")]
    ToolTimedOut { tool: String, seconds: u64 },
}

/// Errors surfaced to callers of the broker. Each carries enough context
/// (constraint, path, device identity) for the caller to act on; there is
/// no retry logic anywhere in the shim.
#[derive(Error, Debug)]
pub enum ShimError {
    /// The minimum-memory string could not be parsed.
    #[error("invalid memory size `{0}`")]
    InvalidMemorySpec(String),

    /// The post-filter candidate set was empty.
    #[error("no available devices matching {constraint}")]
    NoDevicesAvailable { constraint: String },

    /// The container launch spec could not be read, parsed, or rewritten.
    #[error("failed to {action} container spec at `{}`: {message}", path.display())]
    SpecReadWrite {
        action: &'static str,
        path: PathBuf,
        message: String,
    },

    /// The device reserved at create time is missing or unavailable at
    /// prestart time. The container must not start.
    #[error("reserved device {family}:{index} is gone or unavailable")]
    DeviceGone { family: DeviceType, index: u32 },
}

impl ShimError {
    pub(crate) fn spec_io(
        action: &'static str,
        path: &std::path::Path,
        err: impl std::fmt::Display,
    ) -> Self {
        ShimError::SpecReadWrite {
            action,
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}
