use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---

use async_trait::async_trait;

// ---

use tracelink_domain::{
    // ---
    ChannelTarget,
    Code,
    ConnectionMetadata,
    InboundObserver,
    OutboundMessage,
    RecordStatus,
    SpanEvent,
    SpanStreamPtr,
    Status,
    FLAKY_CODE_HEADER,
    FLAKY_HEADER,
};

// ---

use super::{SimConfig, TraceObserverSim};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingObserver {
    // ---
    acks: AtomicU64,
    completed: AtomicUsize,
    errors: Mutex<Vec<Status>>,
}

#[async_trait]
impl InboundObserver for RecordingObserver {
    // ---
    async fn on_ack(&self, status: RecordStatus) {
        self.acks.store(status.messages_seen, Ordering::SeqCst);
    }

    async fn on_error(&self, status: Status) {
        self.errors.lock().unwrap().push(status);
    }

    async fn on_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

fn target() -> ChannelTarget {
    // ---
    ChannelTarget {
        host: "observer.test".into(),
        port: 443,
        use_plaintext: false,
        use_compression: false,
    }
}

async fn open(
    sim: &TraceObserverSim,
    metadata: &ConnectionMetadata,
    observer: Arc<RecordingObserver>,
) -> SpanStreamPtr {
    // ---
    let channel = sim
        .transport()
        .open_channel(&target(), metadata.to_headers())
        .await
        .expect("open_channel");
    channel.open_stream(observer).await.expect("open_stream")
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    // ---
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn span(trace_id: &str) -> OutboundMessage {
    OutboundMessage::Span(SpanEvent::new().with_intrinsic("traceId", trace_id).into_wire())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spans_are_recorded_and_acknowledged() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let observer = Arc::new(RecordingObserver::default());
    let stream = open(&sim, &ConnectionMetadata::new("lk"), Arc::clone(&observer)).await;

    stream.send(span("a")).await.unwrap();
    stream
        .send(OutboundMessage::Batch(vec![
            SpanEvent::new().with_intrinsic("traceId", "b").into_wire(),
            SpanEvent::new().with_intrinsic("traceId", "c").into_wire(),
        ]))
        .await
        .unwrap();

    assert!(sim.wait_for_spans(3, Duration::from_secs(1)).await);
    let ids: Vec<String> = sim.received_spans().into_iter().map(|s| s.trace_id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(eventually(|| observer.acks.load(Ordering::SeqCst) == 3).await);
    assert_eq!(sim.channels_opened(), 1);
    assert_eq!(sim.streams_opened(), 1);
}

// ---

#[tokio::test]
async fn cancel_reports_cancelled_and_drops_later_writes() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let observer = Arc::new(RecordingObserver::default());
    let stream = open(&sim, &ConnectionMetadata::new("lk"), Arc::clone(&observer)).await;

    let cause: Arc<dyn std::error::Error + Send + Sync> =
        Arc::new(std::io::Error::new(std::io::ErrorKind::Other, "closing"));
    stream.cancel("CLOSING_CONNECTION", Some(cause));

    assert!(eventually(|| !observer.errors.lock().unwrap().is_empty()).await);
    {
        let errors = observer.errors.lock().unwrap();
        assert_eq!(errors[0].code(), Code::Cancelled);
        assert!(errors[0].cause_is::<std::io::Error>());
    }

    assert!(!stream.is_ready());
    assert!(!sim.has_active_stream());
    stream.send(span("late")).await.expect("late write is dropped, not failed");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sim.received_spans().is_empty());
}

// ---

#[tokio::test]
async fn server_side_termination_reaches_observer() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let observer = Arc::new(RecordingObserver::default());
    let stream = open(&sim, &ConnectionMetadata::new("lk"), Arc::clone(&observer)).await;

    assert!(sim.fail_active_stream(Status::new(Code::Unimplemented, "go away")));
    assert!(eventually(|| !observer.errors.lock().unwrap().is_empty()).await);
    assert_eq!(observer.errors.lock().unwrap()[0].code(), Code::Unimplemented);
    assert!(!stream.is_ready());

    // Nothing left to terminate.
    assert!(!sim.complete_active_stream());
}

// ---

#[tokio::test]
async fn completion_reaches_observer() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let observer = Arc::new(RecordingObserver::default());
    let _stream = open(&sim, &ConnectionMetadata::new("lk"), Arc::clone(&observer)).await;

    assert!(sim.complete_active_stream());
    assert!(eventually(|| observer.completed.load(Ordering::SeqCst) == 1).await);
    assert!(observer.errors.lock().unwrap().is_empty());
}

// ---

#[tokio::test]
async fn refused_connections_and_readiness_toggle() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::unreachable());
    let headers = ConnectionMetadata::new("lk").to_headers();
    assert!(sim
        .transport()
        .open_channel(&target(), headers.clone())
        .await
        .is_err());
    assert_eq!(sim.channels_opened(), 0);

    sim.set_refuse_connections(false);
    let observer = Arc::new(RecordingObserver::default());
    let stream = open(&sim, &ConnectionMetadata::new("lk"), observer).await;
    assert!(stream.is_ready());

    sim.set_ready(false);
    assert!(!stream.is_ready());
    sim.set_ready(true);
    assert!(stream.is_ready());
}

// ---

#[tokio::test]
async fn flaky_header_fails_stream_with_requested_code() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::seeded(7));
    let mut metadata = ConnectionMetadata::new("lk");
    metadata
        .request_metadata
        .insert(FLAKY_HEADER.into(), "100".into());
    metadata
        .request_metadata
        .insert(FLAKY_CODE_HEADER.into(), "9".into());

    let observer = Arc::new(RecordingObserver::default());
    let stream = open(&sim, &metadata, Arc::clone(&observer)).await;
    stream.send(span("doomed")).await.unwrap();

    assert!(eventually(|| !observer.errors.lock().unwrap().is_empty()).await);
    assert_eq!(
        observer.errors.lock().unwrap()[0].code(),
        Code::FailedPrecondition
    );
    assert!(sim.received_spans().is_empty());
}

// ---

#[tokio::test]
async fn injected_send_failure_is_returned_once() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let stream = open(
        &sim,
        &ConnectionMetadata::new("lk"),
        Arc::new(RecordingObserver::default()),
    )
    .await;

    sim.fail_next_send();
    assert!(stream.send(span("x")).await.is_err());
    assert!(stream.send(span("y")).await.is_ok());
}

// ---

#[tokio::test]
async fn shut_down_channel_refuses_new_streams() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let channel = sim
        .transport()
        .open_channel(&target(), ConnectionMetadata::new("lk").to_headers())
        .await
        .unwrap();

    channel.shutdown().await;
    assert!(channel
        .open_stream(Arc::new(RecordingObserver::default()))
        .await
        .is_err());
}
