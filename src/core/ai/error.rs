//! Error types for the speech-AI session.

use thiserror::Error;

use super::messages::ErrorSeverity;
use super::state::ProtocolSequenceError;

/// Errors raised by the AI session and its transport.
#[derive(Debug, Error)]
pub enum AiError {
    /// A control call arrived out of order. Programmer/integration error;
    /// never retried.
    #[error(transparent)]
    Sequence(#[from] ProtocolSequenceError),

    /// The event stream could not be established.
    #[error("AI connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport died mid-session.
    #[error("AI transport error: {0}")]
    Transport(String),

    /// The service reported an error event.
    #[error("AI service error ({severity:?}): {message}")]
    Service {
        /// Human-readable description from the service
        message: String,
        /// Whether the session survives this
        severity: ErrorSeverity,
    },
}

impl AiError {
    /// Whether this error leaves the session unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            AiError::Sequence(_) => true,
            AiError::ConnectionFailed(_) => true,
            AiError::Transport(_) => true,
            AiError::Service { severity, .. } => *severity == ErrorSeverity::Fatal,
        }
    }
}
