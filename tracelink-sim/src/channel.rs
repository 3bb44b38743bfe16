use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---

use async_trait::async_trait;
use tokio::sync::mpsc;

// ---

use tracelink_domain::{
    // ---
    InboundObserverPtr,
    Result,
    SpanStreamPtr,
    TraceChannel,
    UplinkError,
};

// ---

use super::stream::{drive_stream, SimStream};
use super::transport::{lock, ActiveStream, Flaky, SimShared};

// ---------------------------------------------------------------------------
// SimChannel
// ---------------------------------------------------------------------------

/// One channel to the simulated observer.
///
/// The observer serves a single stream at a time: opening a new stream
/// replaces the previous one as the target of injected failures.
pub struct SimChannel {
    // ---
    shared: Arc<SimShared>,
    flaky: Option<Flaky>,
    shut_down: AtomicBool,
}

// ---

impl SimChannel {
    // ---
    pub(crate) fn new(shared: Arc<SimShared>, flaky: Option<Flaky>) -> Self {
        // ---
        Self {
            shared,
            flaky,
            shut_down: AtomicBool::new(false),
        }
    }
}

// ---

#[async_trait]
impl TraceChannel for SimChannel {
    // ---
    async fn open_stream(&self, observer: InboundObserverPtr) -> Result<SpanStreamPtr> {
        // ---
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(UplinkError::Transport("channel is shut down".into()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        *lock(&self.shared.active) = Some(ActiveStream {
            events: events_tx.clone(),
            closed: Arc::clone(&closed),
        });
        self.shared.streams_opened.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(drive_stream(
            Arc::clone(&self.shared),
            events_rx,
            observer,
        ));

        Ok(Arc::new(SimStream::new(
            Arc::clone(&self.shared),
            events_tx,
            closed,
            self.flaky,
        )))
    }

    // ---

    async fn shutdown(&self) {
        // ---
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("sim: channel shut down");
        }
    }
}
