//! Reconnect backoff policies.
//!
//! Two policies are in play:
//!
//! - [`DefaultBackoffPolicy`]: fixed delay after a generic stream error.
//! - [`ConnectBackoffPolicy`]: escalating delay after failed-precondition
//!   responses and failed connects; reset on a clean stream completion.
//!
//! "Backing off" always means tearing the channel down and sleeping through
//! [`ChannelManager::shutdown_channel_and_backoff`], so stream callers are
//! held at the backoff gate for the whole delay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ---

use async_trait::async_trait;

// ---

use tracelink_domain::{Code, Status};

// ---

use super::ChannelManager;

// ---------------------------------------------------------------------------
// BackoffPolicy
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BackoffPolicy: Send + Sync {
    // ---
    /// `false` only for statuses after which the observer must never be
    /// contacted again.
    fn should_reconnect(&self, status: &Status) -> bool {
        status.code() != Code::Unimplemented
    }

    /// Delay for the next backoff. May advance internal state.
    fn duration(&self) -> Duration;

    /// Return to the initial delay.
    fn reset(&self) {}

    /// Shut the channel down and sleep for [`Self::duration`].
    async fn backoff(&self, channel_manager: &ChannelManager) {
        // ---
        let delay = self.duration();
        channel_manager.shutdown_channel_and_backoff(delay).await;
    }
}

// ---------------------------------------------------------------------------
// DefaultBackoffPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DefaultBackoffPolicy {
    delay: Duration,
}

// ---

impl DefaultBackoffPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

// ---

#[async_trait]
impl BackoffPolicy for DefaultBackoffPolicy {
    fn duration(&self) -> Duration {
        self.delay
    }
}

// ---------------------------------------------------------------------------
// ConnectBackoffPolicy
// ---------------------------------------------------------------------------

/// Walks `schedule` one step per [`BackoffPolicy::duration`] call and holds
/// at the last entry until [`BackoffPolicy::reset`].
#[derive(Debug)]
pub struct ConnectBackoffPolicy {
    // ---
    schedule: Vec<Duration>,
    cursor: AtomicUsize,
}

// ---

impl ConnectBackoffPolicy {
    // ---
    /// `schedule` must not be empty; `UplinkConfig::validate` guarantees it
    /// for configured uplinks. An empty schedule yields zero delays.
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            cursor: AtomicUsize::new(0),
        }
    }
}

// ---

#[async_trait]
impl BackoffPolicy for ConnectBackoffPolicy {
    // ---
    fn duration(&self) -> Duration {
        // ---
        let last = self.schedule.len().saturating_sub(1);
        let index = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| {
                Some((i + 1).min(last))
            })
            .unwrap_or(last);

        self.schedule
            .get(index.min(last))
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
