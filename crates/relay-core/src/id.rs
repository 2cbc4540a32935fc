//! Session and message identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identifier of a registered session.
///
/// Session ids double as bearer credentials for the lifetime of the session,
/// so production ids must be unguessable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the ID, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Source of fresh identifiers.
pub trait IdGenerator: Send + Sync {
    /// Generate a new session ID.
    fn session_id(&self) -> SessionId;

    /// Generate a new message ID.
    fn message_id(&self) -> MessageId;
}

/// Random v4 UUID identifiers (122 bits of entropy).
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn session_id(&self) -> SessionId {
        SessionId(format!("client_{}", Uuid::new_v4().simple()))
    }

    fn message_id(&self) -> MessageId {
        MessageId(format!("msg_{}", Uuid::new_v4().simple()))
    }
}

/// Deterministic identifiers: `client_1`, `client_2`, ... and `msg_1`, `msg_2`, ...
///
/// Only suitable for tests; the ids are trivially guessable.
#[derive(Debug, Default)]
pub struct SequentialIds {
    sessions: AtomicU64,
    messages: AtomicU64,
}

impl SequentialIds {
    /// Create a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn session_id(&self) -> SessionId {
        let n = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        SessionId(format!("client_{n}"))
    }

    fn message_id(&self) -> MessageId {
        let n = self.messages.fetch_add(1, Ordering::Relaxed) + 1;
        MessageId(format!("msg_{n}"))
    }
}
