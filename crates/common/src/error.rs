//! Error types shared across PipCast crates.

/// Top-level error type for PipCast operations.
#[derive(Debug, thiserror::Error)]
pub enum PipcastError {
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Transcode error: {message}")]
    Transcode { message: String },

    #[error("Transcode engine not ready")]
    EngineNotReady,

    #[error("A transcode job is already in flight")]
    TranscoderBusy,

    #[error("Delivery error: {message}")]
    Delivery { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using PipcastError.
pub type PipcastResult<T> = Result<T, PipcastError>;

impl PipcastError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode {
            message: msg.into(),
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
