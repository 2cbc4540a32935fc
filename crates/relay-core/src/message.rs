//! Relayed message types.

use crate::clock::Timestamp;
use crate::error::RelayError;
use crate::id::{MessageId, SessionId};
use serde::Serialize;

/// A message in the relay log.
///
/// Immutable once appended; shared as `Arc<Message>` between the store and
/// any push channels it was fanned out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Position in the log. Strictly increasing, never reused.
    pub index: u64,
    /// Sending session.
    pub from: SessionId,
    /// Recipient, or `None` for a broadcast.
    pub to: Option<SessionId>,
    /// Text content.
    pub content: String,
    /// When the message was appended.
    pub created_at: Timestamp,
}

impl Message {
    /// Whether this message is addressed to everyone.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Whether a pull client should see this message.
    ///
    /// Senders never see their own messages.
    #[must_use]
    pub fn is_visible_to(&self, session: &SessionId) -> bool {
        if &self.from == session {
            return false;
        }
        match &self.to {
            None => true,
            Some(to) => to == session,
        }
    }

    /// Metrics label for the message kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_broadcast() {
            "broadcast"
        } else {
            "direct"
        }
    }
}

/// A message submitted for relaying, before it is assigned an index.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Sending session.
    pub from: SessionId,
    /// Recipient, or `None` for a broadcast.
    pub to: Option<SessionId>,
    /// Text content.
    pub content: String,
}

impl OutboundMessage {
    /// Create an outbound message.
    #[must_use]
    pub fn new(from: SessionId, to: Option<SessionId>, content: impl Into<String>) -> Self {
        Self {
            from,
            to,
            content: content.into(),
        }
    }

    /// Reject messages that must never reach the store.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidMessage`] for a missing sender, missing
    /// content, an empty recipient, or content over `max_content_len` bytes.
    pub fn validate(&self, max_content_len: usize) -> Result<(), RelayError> {
        if self.from.as_str().is_empty() {
            return Err(RelayError::InvalidMessage("missing sender"));
        }
        if self.content.trim().is_empty() {
            return Err(RelayError::InvalidMessage("missing content"));
        }
        if self.content.len() > max_content_len {
            return Err(RelayError::InvalidMessage("content too long"));
        }
        if matches!(&self.to, Some(to) if to.as_str().is_empty()) {
            return Err(RelayError::InvalidMessage("empty recipient"));
        }
        Ok(())
    }
}
