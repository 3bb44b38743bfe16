//! [`ChannelManager`]: owns the channel and the span stream.
//!
//! The channel is created lazily from the current connection headers and
//! the stream is opened on it with a fresh [`ResponseObserver`]. Teardown
//! only happens here, always cancelling the stream with a
//! [`ChannelClosing`] cause so the observer can tell our own cancellation
//! apart from a remote failure.
//!
//! # Backoff gate
//!
//! While [`ChannelManager::shutdown_channel_and_backoff`] sleeps, a gate is
//! installed. [`ChannelManager::get_stream_handle`] waits for the gate to
//! lift before touching the channel, and a second backoff requested while
//! the gate is up is a no-op.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

// ---

use thiserror::Error;
use tokio::sync::{watch, Mutex};

// ---

use tracelink_domain::{
    // ---
    ChannelTarget,
    MetricSinkPtr,
    Result,
    SpanStreamPtr,
    TraceChannelPtr,
    TraceTransportPtr,
    UplinkError,
};

// ---

use super::metrics;
use super::{ConnectionHeaders, DisconnectionHandler, ResponseObserver};

/// Reason given when the manager cancels its own stream.
pub const CLOSING_REASON: &str = "CLOSING_CONNECTION";

// ---------------------------------------------------------------------------
// ChannelClosing
// ---------------------------------------------------------------------------

/// Cause attached to every stream cancellation the manager performs.
#[derive(Debug, Error)]
#[error("channel closing")]
pub struct ChannelClosing;

// ---------------------------------------------------------------------------
// ChannelSlot
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChannelSlot {
    // ---
    channel: Option<TraceChannelPtr>,
    stream: Option<SpanStreamPtr>,

    /// Bumped for every stream opened; observers carry the value of theirs.
    epoch: u64,
}

// ---------------------------------------------------------------------------
// GateGuard
// ---------------------------------------------------------------------------

/// Lifts the backoff gate when dropped, including when the backoff future
/// is dropped mid-sleep.
struct GateGuard<'a> {
    // ---
    gate: &'a StdMutex<Option<watch::Receiver<()>>>,

    /// Dropping the sender wakes every waiter.
    _release: watch::Sender<()>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *lock(self.gate) = None;
    }
}

// ---

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ChannelManager
// ---------------------------------------------------------------------------

pub struct ChannelManager {
    // ---
    transport: TraceTransportPtr,
    target: ChannelTarget,
    headers: Arc<ConnectionHeaders>,
    metrics: MetricSinkPtr,

    slot: Mutex<ChannelSlot>,

    /// `Some` while a backoff is in progress.
    gate: StdMutex<Option<watch::Receiver<()>>>,

    /// `true` once shut down forever. Also cuts any backoff sleep short.
    shutdown_forever: watch::Sender<bool>,

    /// Set once at wiring time. Weak because the handler owns this manager.
    disconnection: OnceLock<Weak<DisconnectionHandler>>,
}

// ---

impl ChannelManager {
    // ---
    pub fn new(
        transport: TraceTransportPtr,
        target: ChannelTarget,
        headers: Arc<ConnectionHeaders>,
        metrics: MetricSinkPtr,
    ) -> Self {
        // ---
        Self {
            transport,
            target,
            headers,
            metrics,
            slot: Mutex::new(ChannelSlot::default()),
            gate: StdMutex::new(None),
            shutdown_forever: watch::channel(false).0,
            disconnection: OnceLock::new(),
        }
    }

    // ---

    /// Route observer callbacks of every stream opened from now on to
    /// `handler`. Only the first call takes effect.
    pub fn bind_disconnection_handler(&self, handler: Weak<DisconnectionHandler>) {
        // ---
        if self.disconnection.set(handler).is_err() {
            tracing::warn!("disconnection handler already bound; ignoring rebind");
        }
    }

    // ---

    pub fn is_shut_down_forever(&self) -> bool {
        *self.shutdown_forever.borrow()
    }

    // ---

    /// `true` while a backoff sleep is in progress.
    pub fn is_backing_off(&self) -> bool {
        lock(&self.gate).is_some()
    }

    // ---

    /// Current stream, creating the channel and stream if needed.
    ///
    /// Waits out any backoff in progress first. Fails with
    /// [`UplinkError::ShutdownForever`] once the uplink has stopped.
    pub async fn get_stream_handle(&self) -> Result<SpanStreamPtr> {
        // ---
        loop {
            self.wait_for_gate().await;

            let mut slot = self.slot.lock().await;

            // A backoff may have started between the gate check and the
            // lock; go back and wait for it.
            if self.is_backing_off() {
                drop(slot);
                continue;
            }

            if self.is_shut_down_forever() {
                return Err(UplinkError::ShutdownForever);
            }

            let channel = match &slot.channel {
                Some(channel) => Arc::clone(channel),
                None => {
                    let channel = self
                        .transport
                        .open_channel(&self.target, self.headers.headers())
                        .await?;
                    tracing::info!(authority = %self.target.authority(), "channel opened");
                    slot.channel = Some(Arc::clone(&channel));
                    channel
                }
            };

            if slot.stream.is_none() {
                let epoch = slot.epoch + 1;
                let observer = Arc::new(ResponseObserver::new(
                    self.disconnection_handler()?,
                    Arc::clone(&self.metrics),
                    epoch,
                ));
                let stream = channel.open_stream(observer).await?;
                self.metrics.increment_counter(metrics::CONNECT);
                tracing::debug!(epoch, "span stream opened");

                slot.stream = Some(stream);
                slot.epoch = epoch;
            }

            return match &slot.stream {
                Some(stream) => Ok(Arc::clone(stream)),
                None => Err(UplinkError::StreamClosed),
            };
        }
    }

    // ---

    /// Cancel the stream opened at `epoch` so the next
    /// [`Self::get_stream_handle`] opens a new one on the existing channel.
    ///
    /// No-op if `epoch` is not the current stream's: a late request from an
    /// older stream must not replace a healthy one.
    pub async fn request_stream_recreation(&self, epoch: u64) {
        // ---
        let mut slot = self.slot.lock().await;

        if slot.epoch != epoch {
            tracing::debug!(epoch, current = slot.epoch, "stale stream recreation ignored");
            return;
        }
        if let Some(stream) = slot.stream.take() {
            stream.cancel(CLOSING_REASON, Some(Arc::new(ChannelClosing)));
        }
    }

    // ---

    /// Tear down the stream and channel, then hold callers at the gate for
    /// `delay`. No-op if a backoff is already in progress.
    ///
    /// A zero `delay` tears down and lets callers reconnect immediately.
    pub async fn shutdown_channel_and_backoff(&self, delay: Duration) {
        // ---
        let (release, rx) = watch::channel(());
        {
            let mut gate = lock(&self.gate);
            if gate.is_some() {
                tracing::debug!("backoff already in progress");
                return;
            }
            *gate = Some(rx);
        }
        let _guard = GateGuard {
            gate: &self.gate,
            _release: release,
        };

        self.teardown().await;

        if !delay.is_zero() {
            tracing::info!("backing off for {:?} before reconnecting", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(self.shutdown_forever.subscribe()) => {
                    tracing::debug!("backoff cut short by shutdown");
                }
            }
        }
    }

    // ---

    /// Tear down and never connect again.
    ///
    /// The flag is raised before the teardown so no caller released from
    /// the gate can open a new channel.
    pub async fn shutdown_channel_forever(&self) {
        // ---
        if self.shutdown_forever.send_replace(true) {
            return;
        }
        tracing::info!("shutting down channel forever");
        self.shutdown_channel_and_backoff(Duration::ZERO).await;
    }

    // ---

    async fn teardown(&self) {
        // ---
        let mut slot = self.slot.lock().await;

        if let Some(stream) = slot.stream.take() {
            stream.cancel(CLOSING_REASON, Some(Arc::new(ChannelClosing)));
        }
        if let Some(channel) = slot.channel.take() {
            channel.shutdown().await;
            tracing::debug!("channel shut down");
        }
    }

    // ---

    async fn wait_for_gate(&self) {
        // ---
        let gate = lock(&self.gate).clone();
        if let Some(mut rx) = gate {
            // Resolves with Err once the backoff drops its sender.
            while rx.changed().await.is_ok() {}
        }
    }

    // ---

    fn disconnection_handler(&self) -> Result<Arc<DisconnectionHandler>> {
        // ---
        self.disconnection
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| UplinkError::Transport("no disconnection handler bound".into()))
    }
}

// ---

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // ---
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Manager dropped; nothing left to wait for.
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::time::Duration;

    use tracelink_domain::{InboundObserver, UplinkError};
    use tracelink_sim::{SimConfig, TraceObserverSim};

    use crate::test_support::Harness;
    use crate::ResponseObserver;

    #[tokio::test]
    async fn stream_is_reused_until_torn_down() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::healthy());
        let h = Harness::new(&sim);

        let a = h.channel_manager.get_stream_handle().await.expect("stream");
        let b = h.channel_manager.get_stream_handle().await.expect("stream");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(sim.channels_opened(), 1);
        assert_eq!(sim.streams_opened(), 1);

        h.channel_manager
            .shutdown_channel_and_backoff(Duration::ZERO)
            .await;
        assert!(!a.is_ready());

        h.channel_manager.get_stream_handle().await.expect("stream");
        assert_eq!(sim.channels_opened(), 2);
    }

    // ---

    #[tokio::test]
    async fn second_concurrent_backoff_is_a_no_op() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::healthy());
        let h = Harness::new(&sim);
        h.channel_manager.get_stream_handle().await.expect("stream");

        let first = {
            let cm = Arc::clone(&h.channel_manager);
            tokio::spawn(async move {
                cm.shutdown_channel_and_backoff(Duration::from_millis(200))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.channel_manager.is_backing_off());

        // Returns at once instead of sleeping another 5 s.
        tokio::time::timeout(
            Duration::from_millis(100),
            h.channel_manager
                .shutdown_channel_and_backoff(Duration::from_secs(5)),
        )
        .await
        .expect("second backoff must not sleep");

        first.await.expect("join");
        assert!(!h.channel_manager.is_backing_off());
    }

    // ---

    #[tokio::test]
    async fn callers_wait_at_the_gate() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::healthy());
        let h = Harness::new(&sim);
        h.channel_manager.get_stream_handle().await.expect("stream");

        let backoff = {
            let cm = Arc::clone(&h.channel_manager);
            tokio::spawn(async move {
                cm.shutdown_channel_and_backoff(Duration::from_millis(150))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = tokio::time::Instant::now();
        h.channel_manager.get_stream_handle().await.expect("stream");
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(sim.channels_opened(), 2);

        backoff.await.expect("join");
    }

    // ---

    #[tokio::test]
    async fn shutdown_forever_fails_fast() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::healthy());
        let h = Harness::new(&sim);
        h.channel_manager.get_stream_handle().await.expect("stream");

        h.channel_manager.shutdown_channel_forever().await;
        assert!(!sim.has_active_stream());

        let err = h.channel_manager.get_stream_handle().await;
        assert!(matches!(err, Err(UplinkError::ShutdownForever)));
        assert_eq!(sim.channels_opened(), 1);
    }

    // ---

    #[tokio::test]
    async fn refused_connect_surfaces_as_error() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::unreachable());
        let h = Harness::new(&sim);

        let err = h.channel_manager.get_stream_handle().await;
        assert!(matches!(err, Err(UplinkError::Transport(_))));

        sim.set_refuse_connections(false);
        h.channel_manager.get_stream_handle().await.expect("stream");
    }

    // ---

    #[tokio::test]
    async fn recreation_cancels_the_outgoing_stream() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::healthy());
        let h = Harness::new(&sim);

        let a = h.channel_manager.get_stream_handle().await.expect("stream");
        let epoch = h.channel_manager.slot.lock().await.epoch;
        h.channel_manager.request_stream_recreation(epoch).await;
        assert!(!a.is_ready());

        let b = h.channel_manager.get_stream_handle().await.expect("stream");
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(b.is_ready());
        assert_eq!(sim.channels_opened(), 1);
        assert_eq!(sim.streams_opened(), 2);
    }

    // ---

    #[tokio::test]
    async fn late_completion_of_old_stream_keeps_current_stream() {
        // ---
        let sim = TraceObserverSim::new(SimConfig::healthy());
        let h = Harness::new(&sim);

        h.channel_manager.get_stream_handle().await.expect("stream");
        let old_epoch = h.channel_manager.slot.lock().await.epoch;
        h.channel_manager
            .shutdown_channel_and_backoff(Duration::ZERO)
            .await;
        let b = h.channel_manager.get_stream_handle().await.expect("stream");

        // The first stream's completion arrives after it was replaced.
        ResponseObserver::new(Arc::clone(&h.handler), h.metrics.clone(), old_epoch)
            .on_completed()
            .await;

        assert!(b.is_ready());
        let c = h.channel_manager.get_stream_handle().await.expect("stream");
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(sim.streams_opened(), 2);
    }
}
