//! Shared fixtures for Relay benchmarks.

use relay_core::{DeliveryEngine, RelayConfig, SessionId};
use std::sync::Arc;

/// Message content of `len` bytes.
#[must_use]
pub fn payload(len: usize) -> String {
    "x".repeat(len)
}

/// An engine with `sessions` registered sessions and room for `max_messages`.
#[must_use]
pub fn engine_with_sessions(
    sessions: usize,
    max_messages: usize,
) -> (Arc<DeliveryEngine>, Vec<SessionId>) {
    let config = RelayConfig {
        max_messages,
        ..RelayConfig::default()
    };
    let relay = Arc::new(DeliveryEngine::new(config));
    let ids = (0..sessions).map(|_| relay.register()).collect();
    (relay, ids)
}
