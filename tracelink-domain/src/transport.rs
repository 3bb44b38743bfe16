use std::sync::Arc;

use async_trait::async_trait;

use super::error::Result;
use super::metadata::{ChannelTarget, Headers};
use super::span::{OutboundMessage, RecordStatus};
use super::status::{Status, StatusCause};

// ---------------------------------------------------------------------------
// InboundObserver
// ---------------------------------------------------------------------------

/// Inbound half of a span stream.
///
/// Invoked by the transport on its own tasks, never on the delivery
/// loop's thread. After `on_error` or `on_completed` no further calls are
/// made for that stream.
#[async_trait]
pub trait InboundObserver: Send + Sync {
    // ---
    /// The observer acknowledged one or more spans.
    async fn on_ack(&self, status: RecordStatus);

    /// The stream terminated abnormally.
    async fn on_error(&self, status: Status);

    /// The stream terminated cleanly from the remote side.
    async fn on_completed(&self);
}

// ---------------------------------------------------------------------------
// SpanStream
// ---------------------------------------------------------------------------

/// Send side of an open bidirectional span stream.
///
/// Tied 1:1 to the [`TraceChannel`] that opened it.
#[async_trait]
pub trait SpanStream: Send + Sync {
    // ---
    /// Write one message.
    ///
    /// Transport and server failures are reported through
    /// [`InboundObserver::on_error`]. An `Err` here means the write failed
    /// outside that channel and the caller treats it as unrecoverable.
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    /// Flow-control readiness: `true` if another message can be written
    /// without unbounded buffering.
    fn is_ready(&self) -> bool;

    /// Cancel the stream. The observer receives `on_error` with a
    /// `CANCELLED` status carrying `cause`.
    fn cancel(&self, reason: &str, cause: Option<StatusCause>);
}

// ---------------------------------------------------------------------------
// TraceChannel
// ---------------------------------------------------------------------------

/// An established channel to the trace observer.
#[async_trait]
pub trait TraceChannel: Send + Sync {
    // ---
    /// Open a new span stream whose inbound events go to `observer`.
    async fn open_stream(&self, observer: InboundObserverPtr) -> Result<SpanStreamPtr>;

    /// Release the channel. Streams opened on it become unusable.
    async fn shutdown(&self);
}

// ---------------------------------------------------------------------------
// TraceTransport
// ---------------------------------------------------------------------------

/// Factory for [`TraceChannel`]s.
///
/// Implementations: `tracelink_sim::SimTransport`.
#[async_trait]
pub trait TraceTransport: Send + Sync {
    // ---
    /// Open a channel to `target`, presenting `headers` on every call made
    /// over it.
    async fn open_channel(&self, target: &ChannelTarget, headers: Headers)
        -> Result<TraceChannelPtr>;
}

// ---

pub type InboundObserverPtr = Arc<dyn InboundObserver>;
pub type SpanStreamPtr = Arc<dyn SpanStream>;
pub type TraceChannelPtr = Arc<dyn TraceChannel>;
pub type TraceTransportPtr = Arc<dyn TraceTransport>;

// ---------------------------------------------------------------------------
// MetricSink
// ---------------------------------------------------------------------------

/// Host-provided counter sink.
///
/// Must never block and never fail; it is called from producer threads and
/// transport callbacks alike.
pub trait MetricSink: Send + Sync {
    // ---
    fn increment_counter(&self, name: &str);
}

pub type MetricSinkPtr = Arc<dyn MetricSink>;
