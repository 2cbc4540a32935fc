//! Client session registry.
//!
//! Tracks which sessions are alive, when each was last active and, for pull
//! clients, how far into the message log each has already read.

use crate::clock::{millis, Timestamp};
use crate::error::RelayError;
use crate::id::{IdGenerator, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// State of a single registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// When the session was registered.
    pub created_at: Timestamp,
    /// Last successful request from this client.
    pub last_seen_at: Timestamp,
    /// Log index up to which messages have been delivered by poll.
    pub cursor: u64,
}

impl Session {
    fn new(id: SessionId, cursor: u64, now: Timestamp) -> Self {
        Self {
            id,
            created_at: now,
            last_seen_at: now,
            cursor,
        }
    }

    /// Whether the session has been inactive for longer than `max_idle`.
    #[must_use]
    pub fn is_idle(&self, now: Timestamp, max_idle: Duration) -> bool {
        now.saturating_sub(self.last_seen_at) > millis(max_idle)
    }

    /// Move the cursor forward. Never moves it backwards.
    ///
    /// Returns `true` if the cursor changed.
    pub fn advance_to(&mut self, cursor: u64) -> bool {
        if cursor > self.cursor {
            self.cursor = cursor;
            true
        } else {
            false
        }
    }
}

/// Registry of active sessions.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session starting at log position `cursor`.
    ///
    /// Ids are drawn from `ids` until one is free, so the returned id is unique
    /// among active sessions.
    pub fn register(&self, ids: &dyn IdGenerator, cursor: u64, now: Timestamp) -> SessionId {
        loop {
            let id = ids.session_id();
            match self.sessions.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let id = slot.key().clone();
                    slot.insert(Session::new(id.clone(), cursor, now));
                    debug!(session = %id, cursor, "Session registered");
                    return id;
                }
            }
        }
    }

    /// Record activity for a session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionNotFound`] if the session is absent.
    pub fn touch(&self, id: &SessionId, now: Timestamp) -> Result<(), RelayError> {
        self.touch_with(id, now, |_| ())
    }

    /// Record activity and run `f` on the session while holding its entry.
    ///
    /// Anything `f` reads and writes is atomic with respect to other
    /// operations on the same session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionNotFound`] if the session is absent.
    pub fn touch_with<R>(
        &self,
        id: &SessionId,
        now: Timestamp,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, RelayError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;
        session.last_seen_at = session.last_seen_at.max(now);
        Ok(f(&mut session))
    }

    /// Move a session's cursor forward, never past `log_length`.
    ///
    /// Returns `Ok(false)` without changing anything if the clamped cursor is
    /// not ahead of the current one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionNotFound`] if the session is absent.
    pub fn advance_cursor(
        &self,
        id: &SessionId,
        cursor: u64,
        log_length: u64,
    ) -> Result<bool, RelayError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;
        Ok(session.advance_to(cursor.min(log_length)))
    }

    /// Remove a session. Removing an absent session is not an error.
    ///
    /// Returns `true` if a session was removed.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Remove every session idle for longer than `max_idle`.
    ///
    /// Returns the removed session ids.
    pub fn sweep_idle(&self, now: Timestamp, max_idle: Duration) -> Vec<SessionId> {
        let mut removed = Vec::new();
        self.sessions.retain(|id, session| {
            if session.is_idle(now, max_idle) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &removed {
            debug!(session = %id, "Session expired");
        }
        removed
    }

    /// Check if a session is registered.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// All registered session ids.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
