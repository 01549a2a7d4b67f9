//! CLI error types.

use std::fmt;

use commu_link::LinkError;
use commu_session::SessionError;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Configuration error.
    Config(String),
    /// Logging setup failed.
    Logging(String),
    /// Transport or signaling error.
    Link(String),
    /// Session error.
    Session(SessionError),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Logging(msg) => write!(f, "logging error: {}", msg),
            Self::Link(msg) => write!(f, "link error: {}", msg),
            Self::Session(err) => write!(f, "{}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Session(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<LinkError> for CliError {
    fn from(err: LinkError) -> Self {
        Self::Link(err.to_string())
    }
}

impl From<commu_core::TracingError> for CliError {
    fn from(err: commu_core::TracingError) -> Self {
        Self::Logging(err.to_string())
    }
}
