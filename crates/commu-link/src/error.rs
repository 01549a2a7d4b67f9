//! Link error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors that can occur while establishing or using a link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No open channel.
    #[error("not connected")]
    NotConnected,

    /// The remote identifier is unknown or refused the connection.
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    /// An establishment step did not finish in time.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// The requested transport is not available here.
    #[error("transport unsupported: {0}")]
    Unsupported(String),

    /// The channel went away while in use.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Frame exceeds the transport MTU.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The remote identifier is malformed.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Signaling store failure.
    #[error("signaling error: {0}")]
    Signaling(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Creates a peer unreachable error.
    pub fn unreachable(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PeerUnreachable {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Creates a signaling error.
    pub fn signaling(message: impl Into<String>) -> Self {
        Self::Signaling(message.into())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Signaling(err.to_string())
    }
}
