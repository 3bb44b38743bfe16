use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;

// ---

use tracelink_domain::{
    // ---
    InboundObserverPtr,
    OutboundMessage,
    RecordStatus,
    Result,
    SpanStream,
    Status,
    StatusCause,
    UplinkError,
    WireSpan,
};

// ---

use super::transport::{lock, Flaky, SimShared};

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// Work item for the per-stream driver task.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    // ---
    /// Spans written by the client.
    Spans(Vec<WireSpan>),

    /// End the stream abnormally; the observer sees `on_error(status)`.
    Terminate(Status),

    /// End the stream cleanly; the observer sees `on_completed`.
    Complete,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Serve one stream: record spans, acknowledge them, and deliver the
/// terminal event. Runs on its own task so observer callbacks never execute
/// on the sender's thread.
pub(crate) async fn drive_stream(
    shared: Arc<SimShared>,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    observer: InboundObserverPtr,
) {
    // ---
    let mut messages_seen = 0_u64;

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Spans(spans) => {
                messages_seen += spans.len() as u64;
                lock(&shared.received).extend(spans);
                observer.on_ack(RecordStatus { messages_seen }).await;
            }
            StreamEvent::Terminate(status) => {
                observer.on_error(status).await;
                return;
            }
            StreamEvent::Complete => {
                observer.on_completed().await;
                return;
            }
        }
    }
    // All senders dropped without a terminal event: the client simply let
    // go of the stream.
}

// ---------------------------------------------------------------------------
// SimStream
// ---------------------------------------------------------------------------

/// Client end of a simulated span stream.
pub(crate) struct SimStream {
    // ---
    shared: Arc<SimShared>,
    events: mpsc::UnboundedSender<StreamEvent>,

    /// Set once a terminal event has been queued. Later sends are dropped
    /// silently, as a real stream ignores writes after cancellation.
    closed: Arc<AtomicBool>,
    flaky: Option<Flaky>,
}

// ---

impl SimStream {
    // ---
    pub(crate) fn new(
        shared: Arc<SimShared>,
        events: mpsc::UnboundedSender<StreamEvent>,
        closed: Arc<AtomicBool>,
        flaky: Option<Flaky>,
    ) -> Self {
        // ---
        Self {
            shared,
            events,
            closed,
            flaky,
        }
    }

    // ---

    /// Queue a terminal event exactly once.
    fn close_with(&self, event: StreamEvent) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stop being the observer's injection target.
        let mut active = lock(&self.shared.active);
        if active
            .as_ref()
            .is_some_and(|a| Arc::ptr_eq(&a.closed, &self.closed))
        {
            *active = None;
        }
        drop(active);

        let _ = self.events.send(event);
    }

    // ---

    fn roll_flaky(&self) -> Option<Status> {
        // ---
        let flaky = self.flaky?;
        let roll: f64 = lock(&self.shared.rng).gen_range(0.0..100.0);
        (roll < flaky.percentage).then(|| Status::new(flaky.code, "flaky observer failure"))
    }
}

// ---

#[async_trait]
impl SpanStream for SimStream {
    // ---
    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        // ---
        if self.shared.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(UplinkError::Send("injected write failure".into()));
        }

        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(status) = self.roll_flaky() {
            self.close_with(StreamEvent::Terminate(status));
            return Ok(());
        }

        let spans = match msg {
            OutboundMessage::Span(span) => vec![span],
            OutboundMessage::Batch(spans) => spans,
        };
        let _ = self.events.send(StreamEvent::Spans(spans));
        Ok(())
    }

    // ---

    fn is_ready(&self) -> bool {
        // ---
        !self.closed.load(Ordering::SeqCst) && self.shared.ready.load(Ordering::SeqCst)
    }

    // ---

    fn cancel(&self, reason: &str, cause: Option<StatusCause>) {
        // ---
        let mut status = Status::cancelled(reason);
        if let Some(cause) = cause {
            status = status.with_cause(cause);
        }
        self.close_with(StreamEvent::Terminate(status));
    }
}
