//! Errors surfaced by the relay core.

use crate::id::SessionId;
use thiserror::Error;

/// Per-request relay errors.
///
/// None of these are fatal; they are reported to the caller, which decides
/// whether to retry or re-register.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The session is unknown: never registered, disconnected, or expired.
    /// The client must register again.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The message was rejected before reaching the store.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    /// The session already receives by push and cannot also poll or subscribe again.
    #[error("Session {0} is already bound to a push channel")]
    DeliveryModeConflict(SessionId),
}

impl RelayError {
    /// Short, stable name for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::SessionNotFound(_) => "session_not_found",
            RelayError::InvalidMessage(_) => "invalid_message",
            RelayError::DeliveryModeConflict(_) => "delivery_mode_conflict",
        }
    }
}
