//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or (de)serializing protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed (malformed body or unknown payload type).
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),

    /// Body exceeds [`crate::Frame::MAX_BODY_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Size that was rejected
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Input ended before the length prefix was satisfied.
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Bytes the length prefix promised
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Destination is empty, too long, or not UTF-8.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
}
