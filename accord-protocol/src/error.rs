use thiserror::Error;

/// Rejection of an inbound payload. The payload is not applied and this layer
/// does not retry it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Clock value must be non-zero")]
    ZeroClock,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown contact request state value {0}")]
    UnknownState(u64),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Payload targets chat {got}, expected {expected}")]
    WrongChat { expected: String, got: String },

    #[error("Not permitted: {0}")]
    NotPermitted(String),
}

/// Reject zero clocks; every accepted update carries a clock above the
/// initial zero of each track.
pub fn require_clock(clock: u64) -> Result<u64, ValidationError> {
    if clock == 0 {
        Err(ValidationError::ZeroClock)
    } else {
        Ok(clock)
    }
}
