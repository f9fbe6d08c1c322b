use thiserror::Error;

/// Errors surfaced by the wire layer: framing, (de)serialization, and malformed envelopes.
///
/// Mirrors the shape of the orchestration-layer error enum one level up (`fleet::FleetError`):
/// one variant per failure mode, a constructor helper per variant, and an `is_retryable` hint
/// so callers don't need to match on variants to decide whether to back off and retry.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame exceeds maximum size ({size} > {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("envelope missing required field: {0}")]
    InvalidEnvelope(String),
}

impl WireError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    pub fn invalid_envelope(msg: impl Into<String>) -> Self {
        Self::InvalidEnvelope(msg.into())
    }

    /// Whether a caller can reasonably reconnect/resend after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }
}

pub type WireResult<T> = Result<T, WireError>;
