use thiserror::Error;

/// Errors surfaced by the capture core, registry and session writer.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Missing or malformed request fields. No state was touched.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{what} not found")]
    NotFound { what: String },

    /// Duplicate patient, or a session already recording.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The writer thread is gone; nothing more can be persisted.
    #[error("session writer is not running")]
    WriterUnavailable,

    #[error("capture is shutting down")]
    ShuttingDown,
}

impl CaptureError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Short machine-readable kind for error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Io(_) | Self::Csv(_) => "io",
            Self::WriterUnavailable => "writer_unavailable",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Errors from device adapters.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed input at line {line}: {message}")]
    Malformed { line: u64, message: String },
}
