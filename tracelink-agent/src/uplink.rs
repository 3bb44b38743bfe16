//! [`Uplink`]: the producer-facing entry point.
//!
//! Owns every component and the dedicated delivery thread:
//!
//! ```text
//!   accept(span) ──▶ SpanQueue ──▶ [tracelink-span-delivery thread]
//!                                   SpanDelivery::run
//!                                     │  ConnectionState (single flight)
//!                                     │  ChannelManager  (channel + stream)
//!                                     ▼
//!                                   SpanStream ──▶ trace observer
//!                                     ▲
//!                  ResponseObserver ──┘ on_error ─▶ DisconnectionHandler
//! ```
//!
//! The delivery thread is a plain `std::thread` driving its loop with
//! [`tokio::runtime::Handle::block_on`], so a slow or stalled observer never
//! ties up a runtime worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

// ---

use tokio::runtime::Handle;

// ---

use tracelink_domain::{
    // ---
    ConnectionMetadata,
    MetricSinkPtr,
    Result,
    SpanEvent,
    TraceTransportPtr,
    UplinkError,
};

// ---

use super::{
    // ---
    span_queue,
    ChannelManager,
    ConnectionHeaders,
    ConnectionState,
    DeliverySettings,
    DisconnectionHandler,
    SpanDelivery,
    SpanQueue,
    State,
    UplinkConfig,
};

/// Name of the dedicated delivery thread.
pub const DELIVERY_THREAD_NAME: &str = "tracelink-span-delivery";

// ---------------------------------------------------------------------------
// Uplink
// ---------------------------------------------------------------------------

pub struct Uplink {
    // ---
    runtime: Handle,
    queue: SpanQueue,
    headers: Arc<ConnectionHeaders>,
    state: Arc<ConnectionState>,
    channel_manager: Arc<ChannelManager>,
    handler: Arc<DisconnectionHandler>,

    /// Taken by the first `start`.
    delivery: Mutex<Option<SpanDelivery>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

// ---

impl Uplink {
    // ---
    /// Build an uplink. Nothing connects until [`Uplink::start`].
    ///
    /// Must be called from within a tokio runtime; the delivery thread runs
    /// its loop on that runtime.
    pub fn new(
        config: UplinkConfig,
        transport: TraceTransportPtr,
        metrics: MetricSinkPtr,
    ) -> Result<Self> {
        // ---
        config.validate()?;

        let runtime = Handle::try_current()
            .map_err(|e| UplinkError::Config(format!("no tokio runtime: {e}")))?;

        let headers = Arc::new(ConnectionHeaders::new(
            config.license_key.clone(),
            config.fault_injection,
        ));
        let state = Arc::new(ConnectionState::new(config.backoff.connection_poll));
        let channel_manager = Arc::new(ChannelManager::new(
            transport,
            config.channel_target(),
            Arc::clone(&headers),
            Arc::clone(&metrics),
        ));
        let handler = DisconnectionHandler::bind(
            Arc::clone(&state),
            Arc::clone(&channel_manager),
            Arc::clone(&metrics),
            &config.backoff,
        );

        let (queue, rx) = span_queue(config.queue_size, Arc::clone(&metrics));

        let running = Arc::new(AtomicBool::new(false));
        let delivery = SpanDelivery::new(
            rx,
            Arc::clone(&state),
            Arc::clone(&handler),
            metrics,
            DeliverySettings::from(&config),
            Arc::clone(&running),
        );

        tracing::debug!(
            authority = %config.channel_target().authority(),
            queue_size = config.queue_size,
            batching = config.use_batching,
            "uplink configured",
        );

        Ok(Self {
            runtime,
            queue,
            headers,
            state,
            channel_manager,
            handler,
            delivery: Mutex::new(Some(delivery)),
            worker: Mutex::new(None),
            running,
        })
    }

    // ---

    /// Start the delivery thread. Later calls are no-ops, including after
    /// the worker has stopped: a stopped worker is never restarted.
    pub fn start(&self) -> Result<()> {
        // ---
        let Some(delivery) = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        self.running.store(true, Ordering::SeqCst);

        let runtime = self.runtime.clone();
        let spawned = std::thread::Builder::new()
            .name(DELIVERY_THREAD_NAME.into())
            .spawn(move || runtime.block_on(delivery.run()));

        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                tracing::info!("uplink started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(UplinkError::Io(e))
            }
        }
    }

    // ---

    /// Queue `span` for delivery. Never blocks; returns `false` if the span
    /// was dropped because the queue is full or delivery has stopped.
    pub fn accept(&self, span: SpanEvent) -> bool {
        self.queue.offer(span)
    }

    // ---

    /// Install new connection metadata and force a fresh channel so the
    /// observer sees it.
    pub async fn update_connection_metadata(
        &self,
        agent_run_token: impl Into<String>,
        request_metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        // ---
        self.headers.set(agent_run_token, request_metadata);
        tracing::info!("connection metadata updated; reconnecting");

        self.channel_manager
            .shutdown_channel_and_backoff(Duration::ZERO)
            .await;
        self.start()
    }

    // ---

    /// Stop forever and wait for the delivery thread to exit. Irreversible.
    pub async fn shutdown_forever(&self) {
        // ---
        tracing::info!("uplink shutting down forever");
        self.handler.terminate().await;

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::error!("span delivery thread panicked"),
                Err(e) => tracing::warn!("unable to join span delivery thread: {e}"),
            }
        }
    }

    // --- introspection ---------------------------------------------------

    pub fn connection_state(&self) -> State {
        self.state.current()
    }

    /// `true` while the delivery thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn connection_metadata(&self) -> Arc<ConnectionMetadata> {
        self.headers.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
