use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(u8),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),
}
