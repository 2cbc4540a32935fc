//! Periodic expiry of old messages and idle sessions.

use crate::delivery::{DeliveryEngine, SweepReport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Runs [`DeliveryEngine::sweep`] on a fixed interval.
///
/// At most one sweep runs at a time; a sweep requested while another is in
/// progress is skipped.
pub struct ExpirySweeper {
    relay: Arc<DeliveryEngine>,
    interval: Duration,
    running: Mutex<()>,
}

impl ExpirySweeper {
    /// Create a sweeper using the relay's configured interval.
    #[must_use]
    pub fn new(relay: Arc<DeliveryEngine>) -> Self {
        let interval = relay.config().sweep_interval;
        Self::with_interval(relay, interval)
    }

    /// Create a sweeper with an explicit interval.
    #[must_use]
    pub fn with_interval(relay: Arc<DeliveryEngine>, interval: Duration) -> Self {
        Self {
            relay,
            interval,
            running: Mutex::new(()),
        }
    }

    /// The sweep interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep once, unless a sweep is already running.
    pub fn sweep_once(&self) -> Option<SweepReport> {
        let _guard = self.running.try_lock()?;
        let report = self.relay.sweep();
        if !report.is_empty() {
            debug!(
                expired_messages = report.expired_messages,
                expired_sessions = report.expired_sessions,
                "Sweep complete"
            );
        }
        Some(report)
    }

    /// Sweep forever, passing each report to `on_sweep`.
    pub async fn run_with<F>(self, mut on_sweep: F)
    where
        F: FnMut(&SweepReport) + Send,
    {
        info!(interval = ?self.interval, "Expiry sweeper starting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Some(report) = self.sweep_once() {
                on_sweep(&report);
            }
        }
    }

    /// Spawn [`run_with`](Self::run_with) onto the current tokio runtime.
    pub fn spawn<F>(self, on_sweep: F) -> JoinHandle<()>
    where
        F: FnMut(&SweepReport) + Send + 'static,
    {
        tokio::spawn(self.run_with(on_sweep))
    }
}
