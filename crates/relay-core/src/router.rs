//! Recipient resolution.
//!
//! The router decides who should receive a message. It consults the registry
//! for membership only and never mutates anything.

use crate::id::SessionId;
use crate::message::Message;
use crate::registry::ClientRegistry;
use std::sync::Arc;
use tracing::trace;

/// Resolves the target sessions of a message.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<ClientRegistry>,
}

impl Router {
    /// Create a router over a registry.
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Recipients of `message`.
    ///
    /// - Broadcast: every registered session except the sender.
    /// - Direct: the recipient if it is registered, otherwise nobody. Messages
    ///   to unknown or expired sessions are dropped, not queued.
    ///
    /// The sender is never a recipient, even of a message addressed to itself.
    #[must_use]
    pub fn route(&self, message: &Message) -> Vec<SessionId> {
        let targets = match &message.to {
            None => self
                .registry
                .ids()
                .into_iter()
                .filter(|id| id != &message.from)
                .collect(),
            Some(to) if to != &message.from && self.registry.contains(to) => vec![to.clone()],
            Some(_) => Vec::new(),
        };

        trace!(
            index = message.index,
            kind = message.kind(),
            recipients = targets.len(),
            "Routed message"
        );
        targets
    }
}
