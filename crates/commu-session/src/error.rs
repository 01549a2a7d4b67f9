//! Session error types.

use commu_link::LinkError;
use commu_protocol::ProtocolError;
use thiserror::Error;

use crate::session::SessionState;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not open.
    #[error("not connected")]
    NotConnected,

    /// The remote peer could not be reached.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Connection establishment timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The transport is not available.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An inbound frame or message could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] ProtocolError),

    /// An outbound message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] ProtocolError),

    /// The channel closed underneath the session.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Operation not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Any other link failure.
    #[error("link error: {0}")]
    Link(#[source] LinkError),

    /// The session task is gone.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Creates an invalid state error.
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }
}

impl From<LinkError> for SessionError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NotConnected => Self::NotConnected,
            LinkError::PeerUnreachable { .. } => Self::PeerUnreachable(err.to_string()),
            LinkError::Timeout { .. } => Self::Timeout(err.to_string()),
            LinkError::Unsupported(reason) => Self::Unsupported(reason),
            LinkError::TransportClosed(reason) => Self::TransportClosed(reason),
            other => Self::Link(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn link_errors_map_to_session_errors() {
        assert!(matches!(
            SessionError::from(LinkError::NotConnected),
            SessionError::NotConnected
        ));
        let err = SessionError::from(LinkError::unreachable("quiet-otter-123", "no such peer"));
        assert_eq!(
            err.to_string(),
            "peer unreachable: peer quiet-otter-123 unreachable: no such peer"
        );
        assert!(matches!(
            SessionError::from(LinkError::timeout("dial", Duration::from_secs(15))),
            SessionError::Timeout(_)
        ));
        assert!(matches!(
            SessionError::from(LinkError::FrameTooLarge { size: 9, max: 8 }),
            SessionError::Link(_)
        ));
    }

    #[test]
    fn invalid_state_message() {
        let err = SessionError::invalid_state("create a host", SessionState::Open);
        assert_eq!(err.to_string(), "cannot create a host while open");
    }
}
