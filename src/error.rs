use thiserror::Error;

/// Failures at the hardware boundary.
///
/// Every variant is recoverable by the loopback orchestrator: a device error
/// fails the current attempt and never aborts the device search.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no such device: {0}")]
    NotFound(String),

    #[error("failed to open device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("failed to set {param} on {device}: {reason}")]
    Configure {
        device: String,
        param: &'static str,
        reason: String,
    },

    #[error("xrun on {0}")]
    Xrun(String),

    #[error("i/o error on {device}: {reason}")]
    Io { device: String, reason: String },

    #[error("no progress on {0} within the stall timeout")]
    Timeout(String),

    #[error("stream on {0} used before hw params were set")]
    NotConfigured(String),
}

/// Invalid user-supplied configuration. Raised before any device is opened.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(f32),
}
