use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ---

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

// ---

use tracelink_domain::{
    // ---
    ChannelTarget,
    Code,
    Headers,
    Result,
    Status,
    TraceChannelPtr,
    TraceTransport,
    TraceTransportPtr,
    UplinkError,
    WireSpan,
    FLAKY_CODE_HEADER,
    FLAKY_HEADER,
};

// ---

use super::channel::SimChannel;
use super::stream::StreamEvent;
use super::SimConfig;

// ---------------------------------------------------------------------------
// Shared observer state
// ---------------------------------------------------------------------------

/// Server-side failure injection requested through the `flaky` headers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Flaky {
    // ---
    /// `0.0 ..= 100.0`
    pub(crate) percentage: f64,
    pub(crate) code: Code,
}

// ---

/// Control handle for the stream the observer is currently serving.
pub(crate) struct ActiveStream {
    // ---
    pub(crate) events: mpsc::UnboundedSender<StreamEvent>,
    pub(crate) closed: Arc<AtomicBool>,
}

// ---

/// State shared by the transport, every channel and stream it opened, and
/// the [`TraceObserverSim`] control handle.
pub(crate) struct SimShared {
    // ---
    pub(crate) channels_opened: AtomicUsize,
    pub(crate) streams_opened: AtomicUsize,
    pub(crate) ready: AtomicBool,
    pub(crate) refuse_connections: AtomicBool,
    pub(crate) fail_next_send: AtomicBool,
    pub(crate) received: Mutex<Vec<WireSpan>>,
    pub(crate) headers_seen: Mutex<Vec<Headers>>,
    pub(crate) active: Mutex<Option<ActiveStream>>,
    pub(crate) rng: Mutex<StdRng>,
}

// ---

/// Lock ignoring poison: a panicking test thread must not cascade into
/// every later assertion.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// TraceObserverSim
// ---------------------------------------------------------------------------

/// In-process stand-in for the remote trace observer.
///
/// Cheap to clone; every clone controls the same observer. Hand
/// [`TraceObserverSim::transport`] to the uplink and keep the sim itself to
/// inject failures and inspect what arrived.
#[derive(Clone)]
pub struct TraceObserverSim {
    // ---
    shared: Arc<SimShared>,
}

// ---

impl TraceObserverSim {
    // ---
    pub fn new(config: SimConfig) -> Self {
        // ---
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            shared: Arc::new(SimShared {
                channels_opened: AtomicUsize::new(0),
                streams_opened: AtomicUsize::new(0),
                ready: AtomicBool::new(config.ready),
                refuse_connections: AtomicBool::new(config.refuse_connections),
                fail_next_send: AtomicBool::new(false),
                received: Mutex::new(Vec::new()),
                headers_seen: Mutex::new(Vec::new()),
                active: Mutex::new(None),
                rng: Mutex::new(rng),
            }),
        }
    }

    // ---

    /// Transport that connects to this observer.
    pub fn transport(&self) -> TraceTransportPtr {
        // ---
        Arc::new(SimTransport {
            shared: Arc::clone(&self.shared),
        })
    }

    // --- failure injection -----------------------------------------------

    /// Terminate the active stream with `status`. Returns `false` if no
    /// stream is open.
    pub fn fail_active_stream(&self, status: Status) -> bool {
        self.terminate_active(StreamEvent::Terminate(status))
    }

    /// Complete the active stream cleanly from the server side.
    pub fn complete_active_stream(&self) -> bool {
        self.terminate_active(StreamEvent::Complete)
    }

    /// Toggle flow-control readiness for every stream.
    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Make the next `send` fail outside the observer error channel.
    pub fn fail_next_send(&self) {
        self.shared.fail_next_send.store(true, Ordering::SeqCst);
    }

    // --- inspection ------------------------------------------------------

    pub fn channels_opened(&self) -> usize {
        self.shared.channels_opened.load(Ordering::SeqCst)
    }

    pub fn streams_opened(&self) -> usize {
        self.shared.streams_opened.load(Ordering::SeqCst)
    }

    /// Every span accepted so far, in arrival order.
    pub fn received_spans(&self) -> Vec<WireSpan> {
        lock(&self.shared.received).clone()
    }

    /// Headers presented by the most recent `open_channel`.
    pub fn last_headers(&self) -> Option<Headers> {
        lock(&self.shared.headers_seen).last().cloned()
    }

    pub fn has_active_stream(&self) -> bool {
        lock(&self.shared.active).is_some()
    }

    // ---

    /// Poll until at least `count` spans have arrived or `timeout` elapses.
    pub async fn wait_for_spans(&self, count: usize, timeout: Duration) -> bool {
        // ---
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.shared.received).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until a stream is open or `timeout` elapses.
    pub async fn wait_for_stream(&self, timeout: Duration) -> bool {
        // ---
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.has_active_stream() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // ---

    fn terminate_active(&self, event: StreamEvent) -> bool {
        // ---
        let Some(active) = lock(&self.shared.active).take() else {
            return false;
        };
        active.closed.store(true, Ordering::SeqCst);
        active.events.send(event).is_ok()
    }
}

// ---------------------------------------------------------------------------
// SimTransport
// ---------------------------------------------------------------------------

/// [`TraceTransport`] backed by a [`TraceObserverSim`].
pub struct SimTransport {
    // ---
    shared: Arc<SimShared>,
}

// ---

#[async_trait]
impl TraceTransport for SimTransport {
    // ---
    async fn open_channel(
        &self,
        target: &ChannelTarget,
        headers: Headers,
    ) -> Result<TraceChannelPtr> {
        // ---
        if self.shared.refuse_connections.load(Ordering::SeqCst) {
            return Err(UplinkError::Transport(format!(
                "connection refused by {}",
                target.authority()
            )));
        }

        let flaky = parse_flaky(&headers);
        lock(&self.shared.headers_seen).push(headers);
        self.shared.channels_opened.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            authority = %target.authority(),
            plaintext = target.use_plaintext,
            compression = target.use_compression,
            flaky = ?flaky,
            "sim: channel opened",
        );

        Ok(Arc::new(SimChannel::new(Arc::clone(&self.shared), flaky)))
    }
}

// ---

fn parse_flaky(headers: &Headers) -> Option<Flaky> {
    // ---
    let percentage = headers.get(FLAKY_HEADER)?.parse::<f64>().ok()?;
    let code = headers
        .get(FLAKY_CODE_HEADER)
        .and_then(|raw| raw.parse::<i32>().ok())
        .map(Code::from_i32)
        .unwrap_or(Code::Unavailable);

    Some(Flaky {
        percentage: percentage.clamp(0.0, 100.0),
        code,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
