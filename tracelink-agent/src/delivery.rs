//! Bounded span queue and the delivery loop that drains it.
//!
//! Producers call [`SpanQueue::offer`], which never blocks: a full queue
//! drops the span and bumps a counter. [`SpanDelivery::run`] owns the
//! receiving end and loops until the uplink stops forever or a write fails
//! outside the stream's error channel. It is never restarted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---

use tokio::sync::mpsc::{self, error::TrySendError};

// ---

use tracelink_domain::{
    // ---
    MetricSinkPtr,
    OutboundMessage,
    Result,
    SpanEvent,
    SpanStreamPtr,
    Status,
    UplinkError,
};

// ---

use super::metrics;
use super::{BlockResult, ConnectionState, DisconnectionHandler, UplinkConfig};

// ---------------------------------------------------------------------------
// SpanQueue
// ---------------------------------------------------------------------------

/// Producer side of the bounded span queue. Cheap to clone.
#[derive(Clone)]
pub struct SpanQueue {
    // ---
    tx: mpsc::Sender<SpanEvent>,
    metrics: MetricSinkPtr,
}

// ---

/// Build a queue holding at most `capacity` spans.
pub fn span_queue(
    capacity: usize,
    metrics: MetricSinkPtr,
) -> (SpanQueue, mpsc::Receiver<SpanEvent>) {
    // ---
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SpanQueue { tx, metrics }, rx)
}

// ---

impl SpanQueue {
    // ---
    /// Enqueue `span` without blocking. Returns `false` if it was dropped.
    pub fn offer(&self, span: SpanEvent) -> bool {
        // ---
        self.metrics.increment_counter(metrics::SPAN_SEEN);

        match self.tx.try_send(span) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.increment_counter(metrics::SPAN_DROPPED);
                false
            }
            Err(TrySendError::Closed(_)) => {
                // Delivery has stopped for good.
                self.metrics.increment_counter(metrics::SPAN_DROPPED);
                false
            }
        }
    }

    // ---

    /// Spans waiting to be sent.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// DeliverySettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    // ---
    pub use_batching: bool,
    pub max_batch_size: usize,
    pub not_ready_pause: Duration,
    pub queue_poll: Duration,
}

// ---

impl From<&UplinkConfig> for DeliverySettings {
    fn from(config: &UplinkConfig) -> Self {
        // ---
        Self {
            use_batching: config.use_batching,
            max_batch_size: config.max_batch_size.max(1),
            not_ready_pause: config.backoff.not_ready_pause,
            queue_poll: config.backoff.queue_poll,
        }
    }
}

// ---------------------------------------------------------------------------
// SpanDelivery
// ---------------------------------------------------------------------------

pub struct SpanDelivery {
    // ---
    rx: mpsc::Receiver<SpanEvent>,
    state: Arc<ConnectionState>,
    handler: Arc<DisconnectionHandler>,
    metrics: MetricSinkPtr,
    settings: DeliverySettings,

    /// Popped while its stream was ending; written before anything else.
    pending: Option<SpanEvent>,

    /// Cleared when [`Self::run`] returns.
    running: Arc<AtomicBool>,
}

// ---

impl SpanDelivery {
    // ---
    pub fn new(
        rx: mpsc::Receiver<SpanEvent>,
        state: Arc<ConnectionState>,
        handler: Arc<DisconnectionHandler>,
        metrics: MetricSinkPtr,
        settings: DeliverySettings,
        running: Arc<AtomicBool>,
    ) -> Self {
        // ---
        Self {
            rx,
            state,
            handler,
            metrics,
            settings,
            pending: None,
            running,
        }
    }

    // ---

    /// Deliver spans until stopped.
    pub async fn run(mut self) {
        // ---
        tracing::info!("span delivery started");

        loop {
            match self.poll_and_write().await {
                Ok(()) => {}
                Err(UplinkError::ShutdownForever) => {
                    tracing::info!("uplink shut down forever; span delivery stopped");
                    break;
                }
                Err(e) => {
                    tracing::error!("span delivery stopped, no more spans will be sent: {e}");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    // ---

    /// One iteration: make sure a stream exists, then write at most one
    /// message to it.
    async fn poll_and_write(&mut self) -> Result<()> {
        // ---
        let Some(stream) = self.ready_stream().await? else {
            return Ok(());
        };

        if !stream.is_ready() {
            self.pause_not_ready().await;
            return Ok(());
        }

        let first = match self.pending.take() {
            Some(span) => span,
            None => match tokio::time::timeout(self.settings.queue_poll, self.rx.recv()).await {
                Err(_elapsed) => return Ok(()),
                Ok(None) => return Err(UplinkError::QueueClosed),
                Ok(Some(span)) => span,
            },
        };

        // The stream may have ended while we waited on the queue.
        if !stream.is_ready() {
            self.pending = Some(first);
            self.pause_not_ready().await;
            return Ok(());
        }

        let msg = if self.settings.use_batching {
            let mut batch = vec![first.into_wire()];
            while batch.len() < self.settings.max_batch_size {
                match self.rx.try_recv() {
                    Ok(span) => batch.push(span.into_wire()),
                    Err(_) => break,
                }
            }
            OutboundMessage::Batch(batch)
        } else {
            OutboundMessage::Span(first.into_wire())
        };

        let count = msg.span_count();
        stream.send(msg).await?;

        for _ in 0..count {
            self.metrics.increment_counter(metrics::SPAN_SENT);
        }
        Ok(())
    }

    // ---

    async fn pause_not_ready(&self) {
        self.metrics.increment_counter(metrics::NOT_READY);
        tokio::time::sleep(self.settings.not_ready_pause).await;
    }

    // ---

    /// Stream to write to, or `None` if the connection is not usable yet
    /// and the caller should loop.
    async fn ready_stream(&self) -> Result<Option<SpanStreamPtr>> {
        // ---
        let channel_manager = self.handler.channel_manager();

        match self.state.block_on_connection().await {
            BlockResult::GoAwayForever => Err(UplinkError::ShutdownForever),

            BlockResult::MustAttemptConnection => match channel_manager.get_stream_handle().await {
                Ok(stream) => {
                    self.state.did_connect();
                    tracing::info!("connected to trace observer");
                    Ok(Some(stream))
                }
                Err(UplinkError::ShutdownForever) => Err(UplinkError::ShutdownForever),
                Err(e) => {
                    self.handler.connect_failed(&e).await;
                    Ok(None)
                }
            },

            BlockResult::AlreadyConnected => match channel_manager.get_stream_handle().await {
                Ok(stream) => Ok(Some(stream)),
                Err(UplinkError::ShutdownForever) => Err(UplinkError::ShutdownForever),
                Err(e) => {
                    self.handler
                        .handle(&Status::unavailable(format!("unable to open span stream: {e}")))
                        .await;
                    Ok(None)
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
