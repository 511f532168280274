//! Error taxonomy for the engine and its input/output backends.
//!
//! None of these are raised out of the token or macro hot paths. They are
//! logged, or converted into a status update, at the point they occur.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A backend's underlying API is missing on this platform or failed to
    /// initialise. The backend stays absent for the rest of the process.
    #[error("{backend} not available: {reason}")]
    UnsupportedPlatform {
        backend: &'static str,
        reason: String,
    },

    /// Binding text that does not describe a usable trigger.
    #[error("malformed trigger: {0:?}")]
    MalformedTrigger(String),

    /// A controller momentarily reports no devices.
    #[error("device unavailable: {0}")]
    DeviceTransient(String),

    /// The OS refused a synthetic input call.
    #[error("output injection failed: {0}")]
    OutputInjectionFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn unsupported(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            backend,
            reason: reason.into(),
        }
    }
}
