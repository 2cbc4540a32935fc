//! Bounded, append-only message log.
//!
//! The log is an arena indexed by a global, monotonically increasing position.
//! Sessions hold plain integer cursors into it, so eviction never invalidates a
//! live reference; it only leaves a cursor pointing before the retained window.

use crate::clock::{millis, Timestamp};
use crate::id::MessageId;
use crate::message::{Message, OutboundMessage};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Log {
    /// Retained entries; indices are contiguous, oldest at the front.
    entries: VecDeque<Arc<Message>>,
    /// Index the next appended message receives.
    next_index: u64,
}

impl Log {
    fn from_index(&self, index: u64) -> Vec<Arc<Message>> {
        let Some(front) = self.entries.front() else {
            return Vec::new();
        };
        let skip = index.saturating_sub(front.index);
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

/// The relay's message log.
#[derive(Debug)]
pub struct MessageStore {
    log: RwLock<Log>,
    max_messages: usize,
}

impl MessageStore {
    /// Create a store retaining at most `max_messages` entries.
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            log: RwLock::new(Log::default()),
            max_messages: max_messages.max(1),
        }
    }

    /// Append a message, assigning it the next index.
    ///
    /// Index assignment, insertion and capacity eviction happen under a single
    /// write lock, so concurrent appends always get strictly increasing indices.
    pub fn append(&self, id: MessageId, outbound: OutboundMessage, now: Timestamp) -> Arc<Message> {
        let mut log = self.log.write();

        let message = Arc::new(Message {
            id,
            index: log.next_index,
            from: outbound.from,
            to: outbound.to,
            content: outbound.content,
            created_at: now,
        });
        log.next_index += 1;
        log.entries.push_back(Arc::clone(&message));

        let mut evicted = 0usize;
        while log.entries.len() > self.max_messages {
            log.entries.pop_front();
            evicted += 1;
        }

        trace!(index = message.index, evicted, "Appended message");
        message
    }

    /// All retained messages with index `>= index`, in log order.
    ///
    /// If `index` predates the oldest retained entry, the evicted range is
    /// skipped silently.
    #[must_use]
    pub fn slice_from(&self, index: u64) -> Vec<Arc<Message>> {
        self.log.read().from_index(index)
    }

    /// Like [`slice_from`](Self::slice_from), also returning the log length
    /// observed under the same lock.
    #[must_use]
    pub fn snapshot_from(&self, index: u64) -> (Vec<Arc<Message>>, u64) {
        let log = self.log.read();
        (log.from_index(index), log.next_index)
    }

    /// Remove messages created before `now - retention`, oldest first.
    ///
    /// Returns the number of messages removed. Remaining indices are unchanged.
    pub fn sweep_expired(&self, now: Timestamp, retention: Duration) -> usize {
        let cutoff = now.saturating_sub(millis(retention));
        let mut log = self.log.write();

        let mut removed = 0usize;
        while log
            .entries
            .front()
            .is_some_and(|front| front.created_at < cutoff)
        {
            log.entries.pop_front();
            removed += 1;
        }

        if removed > 0 {
            debug!(removed, retained = log.entries.len(), "Swept expired messages");
        }
        removed
    }

    /// Log length: the index the next message will receive.
    ///
    /// This counts every message ever appended, evicted or not, and is what
    /// new cursors start from.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.log.read().next_index
    }

    /// Number of messages currently retained.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.log.read().entries.len()
    }
}
