//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, framing or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize or deserialize the JSON payload.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Frame is shorter than its header.
    #[error("frame too short: {len} bytes (header needs {needed})")]
    FrameTooShort { len: usize, needed: usize },

    /// Frame header violates `index < total` or `total >= 1`.
    #[error("invalid frame header: index {index}, total {total}")]
    InvalidHeader { index: u8, total: u8 },

    /// Message needs more frames than the header can number.
    #[error("message needs {needed} frames (max: {max})")]
    TooManyFrames { needed: usize, max: usize },

    /// Transport MTU cannot hold a frame header plus payload.
    #[error("mtu too small: {mtu} bytes (min: {min})")]
    MtuTooSmall { mtu: usize, min: usize },

    /// Message `type` is not one this build understands.
    #[error("unknown message type: {0}")]
    UnknownKind(String),

    /// Two in-flight messages claimed the same identifier.
    #[error("conflicting frames for message {message_id}: expected {expected} frames, got {got}")]
    ReassemblyConflict {
        message_id: u32,
        expected: u8,
        got: u8,
    },
}

impl ProtocolError {
    /// Returns true for errors caused by malformed inbound data.
    ///
    /// Unknown message kinds are not included: they are ignored, not reported.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Serialization(_)
                | Self::FrameTooShort { .. }
                | Self::InvalidHeader { .. }
                | Self::ReassemblyConflict { .. }
        )
    }
}
