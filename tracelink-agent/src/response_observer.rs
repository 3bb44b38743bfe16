//! [`ResponseObserver`]: inbound half of every span stream.
//!
//! Classifies stream terminations before handing them to the
//! [`DisconnectionHandler`]:
//!
//! 1. our own cancellation (cause is [`ChannelClosing`]): ignored
//! 2. TLS capability failure: terminal
//! 3. idle timeout: logged quietly, then treated like any other error
//! 4. everything else: logged as a warning

use std::sync::Arc;

// ---

use async_trait::async_trait;

// ---

use tracelink_domain::{Code, InboundObserver, MetricSinkPtr, RecordStatus, Status};

// ---

use super::metrics;
use super::{ChannelClosing, DisconnectionHandler};

/// Prefix of the error the transport reports when the observer does not
/// support the protocol the client negotiated.
pub const ALPN_ERROR_PREFIX: &str = "TLS ALPN negotiation failed";

/// Prefix of the `INTERNAL` error the observer closes idle streams with.
pub const IDLE_TIMEOUT_PREFIX: &str = "No error: A GRPC status of OK should have been sent";

// ---------------------------------------------------------------------------
// ResponseObserver
// ---------------------------------------------------------------------------

pub struct ResponseObserver {
    // ---
    handler: Arc<DisconnectionHandler>,
    metrics: MetricSinkPtr,

    /// Epoch of the stream this observer was opened with.
    epoch: u64,
}

// ---

impl ResponseObserver {
    pub fn new(handler: Arc<DisconnectionHandler>, metrics: MetricSinkPtr, epoch: u64) -> Self {
        Self {
            handler,
            metrics,
            epoch,
        }
    }
}

// ---

fn is_idle_timeout(status: &Status) -> bool {
    status.code() == Code::Internal && status.message().starts_with(IDLE_TIMEOUT_PREFIX)
}

// ---

#[async_trait]
impl InboundObserver for ResponseObserver {
    // ---
    async fn on_ack(&self, status: RecordStatus) {
        // ---
        self.metrics.increment_counter(metrics::RESPONSE);
        tracing::trace!(messages_seen = status.messages_seen, "observer ack");
    }

    // ---

    async fn on_error(&self, status: Status) {
        // ---
        if status.cause_is::<ChannelClosing>() {
            return;
        }

        if status.message().starts_with(ALPN_ERROR_PREFIX) {
            tracing::error!(
                "unable to connect to the trace observer; the platform does not support \
                 the negotiated protocol, spans will not be sent: {status}"
            );
            self.metrics.increment_counter(metrics::NO_CAPABILITY);
            self.handler.terminate().await;
            return;
        }

        if is_idle_timeout(&status) {
            tracing::debug!("stream closed by observer after idle timeout: {status}");
        } else {
            tracing::warn!("span stream error, reconnecting: {status}");
        }

        self.metrics.increment_counter(metrics::RESPONSE_ERROR);
        self.metrics
            .increment_counter(&metrics::span_status(status.code()));

        self.handler.handle(&status).await;
    }

    // ---

    async fn on_completed(&self) {
        // ---
        tracing::debug!("span stream completed by observer");
        self.metrics.increment_counter(metrics::RESPONSE_COMPLETED);
        self.handler
            .channel_manager()
            .request_stream_recreation(self.epoch)
            .await;
        self.handler.reset_connect_backoff_policy();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
