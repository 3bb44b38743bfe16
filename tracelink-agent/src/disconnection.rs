//! [`DisconnectionHandler`]: decides how to recover from a stream error.
//!
//! | status                 | action                                          |
//! |------------------------|-------------------------------------------------|
//! | not reconnectable      | terminate: stop forever, shut channel forever   |
//! | `FAILED_PRECONDITION`  | connect-policy backoff, then force reconnect    |
//! | anything else          | one caller wins the reconnect, default backoff  |
//!
//! The `FAILED_PRECONDITION` path skips the
//! [`ConnectionState::should_reconnect`] compare-and-set: the observer
//! reports it when it wants this client back immediately, whatever state
//! the connection is in.

use std::sync::Arc;

// ---

use tracelink_domain::{Code, MetricSinkPtr, Status, UplinkError};

// ---

use super::metrics;
use super::{
    // ---
    BackoffPolicy,
    BackoffSettings,
    ChannelManager,
    ConnectBackoffPolicy,
    ConnectionState,
    DefaultBackoffPolicy,
};

// ---------------------------------------------------------------------------
// DisconnectionHandler
// ---------------------------------------------------------------------------

pub struct DisconnectionHandler {
    // ---
    state: Arc<ConnectionState>,
    channel_manager: Arc<ChannelManager>,
    metrics: MetricSinkPtr,
    default_policy: DefaultBackoffPolicy,
    connect_policy: ConnectBackoffPolicy,
}

// ---

impl DisconnectionHandler {
    // ---
    /// Build the handler and bind it to `channel_manager` so streams opened
    /// from now on report to it.
    pub fn bind(
        state: Arc<ConnectionState>,
        channel_manager: Arc<ChannelManager>,
        metrics: MetricSinkPtr,
        settings: &BackoffSettings,
    ) -> Arc<Self> {
        // ---
        let handler = Arc::new(Self {
            state,
            channel_manager: Arc::clone(&channel_manager),
            metrics,
            default_policy: DefaultBackoffPolicy::new(settings.default_delay),
            connect_policy: ConnectBackoffPolicy::new(settings.connect_schedule.clone()),
        });
        channel_manager.bind_disconnection_handler(Arc::downgrade(&handler));
        handler
    }

    // ---

    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.channel_manager
    }

    // ---

    /// Recover from a stream terminated with `status`.
    pub async fn handle(&self, status: &Status) {
        // ---
        if !self.default_policy.should_reconnect(status) {
            tracing::error!(code = %status.code(), "{}; no longer sending spans", status.message());
            self.terminate().await;
            return;
        }

        if status.code() == Code::FailedPrecondition {
            tracing::info!("observer requested reconnect; using connect backoff");
            self.connect_policy.backoff(&self.channel_manager).await;
            self.state.reattempt_connection();
            return;
        }

        if !self.state.should_reconnect() {
            tracing::debug!(code = %status.code(), "reconnect already in progress");
            return;
        }

        self.default_policy.backoff(&self.channel_manager).await;
        self.state.reattempt_connection();
    }

    // ---

    /// Opening the channel or stream failed. Back off on the connect
    /// schedule and let the next caller try again.
    pub async fn connect_failed(&self, err: &UplinkError) {
        // ---
        self.metrics.increment_counter(metrics::CONNECT_ERROR);
        tracing::warn!("unable to connect to trace observer: {err}");

        self.connect_policy.backoff(&self.channel_manager).await;
        self.state.reattempt_connection();
    }

    // ---

    /// Stop forever. Irreversible.
    pub async fn terminate(&self) {
        // ---
        self.state.shut_down_forever();
        self.channel_manager.shutdown_channel_forever().await;
    }

    // ---

    pub fn reset_connect_backoff_policy(&self) {
        self.connect_policy.reset();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
