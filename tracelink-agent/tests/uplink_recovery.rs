//! End-to-end uplink behaviour against the in-process trace observer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// ---

use tracelink_agent::{metrics, BackoffSettings, MetricRecorder, State, Uplink, UplinkConfig};
use tracelink_domain::{
    Code, SpanEvent, Status, LICENSE_KEY_HEADER, RUN_TOKEN_HEADER, TRACE_ID_KEY,
};
use tracelink_sim::{SimConfig, TraceObserverSim};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> UplinkConfig {
    // ---
    UplinkConfig {
        use_plaintext: true,
        queue_size: 64,
        backoff: BackoffSettings::compressed(Duration::from_millis(1)),
        ..UplinkConfig::new("observer.test", "license-abc")
    }
}

fn span(n: u32) -> SpanEvent {
    SpanEvent::new()
        .with_intrinsic(TRACE_ID_KEY, format!("t{n}"))
        .with_intrinsic("name", "test/span")
}

fn started(sim: &TraceObserverSim, config: UplinkConfig) -> (Uplink, Arc<MetricRecorder>) {
    // ---
    let metrics = Arc::new(MetricRecorder::new());
    let uplink = Uplink::new(config, sim.transport(), metrics.clone()).expect("uplink");
    uplink.start().expect("start");
    (uplink, metrics)
}

async fn wait_for_state(uplink: &Uplink, state: State) -> bool {
    // ---
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if uplink.connection_state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    // ---
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivers_spans_in_order_with_credentials() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let (uplink, recorder) = started(&sim, config());

    for n in 0..10 {
        assert!(uplink.accept(span(n)));
    }
    assert!(sim.wait_for_spans(10, WAIT).await);

    let ids: Vec<String> = sim.received_spans().into_iter().map(|s| s.trace_id).collect();
    let expected: Vec<String> = (0..10).map(|n| format!("t{n}")).collect();
    assert_eq!(ids, expected);

    let headers = sim.last_headers().expect("headers");
    assert_eq!(
        headers.get(LICENSE_KEY_HEADER).map(String::as_str),
        Some("license-abc")
    );
    assert!(uplink.is_running());
    assert_eq!(uplink.connection_state(), State::Connected);
    assert!(wait_until(|| recorder.count(metrics::SPAN_SENT) == 10).await);

    uplink.shutdown_forever().await;
    assert!(!uplink.is_running());
}

// ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_unavailable() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let (uplink, recorder) = started(&sim, config());

    uplink.accept(span(1));
    assert!(sim.wait_for_spans(1, WAIT).await);

    assert!(sim.fail_active_stream(Status::unavailable("connection reset")));
    assert!(wait_until(|| sim.channels_opened() == 2 && sim.has_active_stream()).await);

    uplink.accept(span(2));
    assert!(sim.wait_for_spans(2, WAIT).await);
    assert_eq!(recorder.count(metrics::RESPONSE_ERROR), 1);
    assert_eq!(recorder.count(&metrics::span_status(Code::Unavailable)), 1);

    uplink.shutdown_forever().await;
}

// ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unimplemented_stops_the_uplink_for_good() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let (uplink, _recorder) = started(&sim, config());

    assert!(sim.wait_for_stream(WAIT).await);
    assert!(sim.fail_active_stream(Status::new(Code::Unimplemented, "unsupported")));

    assert!(wait_for_state(&uplink, State::StoppedForever).await);
    assert!(wait_until(|| !uplink.is_running()).await);

    // Accepted spans go nowhere and no reconnect happens.
    uplink.accept(span(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sim.channels_opened(), 1);
    assert!(sim.received_spans().is_empty());

    uplink.shutdown_forever().await;
}

// ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metadata_update_reconnects_with_new_headers() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let (uplink, _recorder) = started(&sim, config());
    assert!(sim.wait_for_stream(WAIT).await);

    let mut request_metadata = BTreeMap::new();
    request_metadata.insert("Entity-Guid".to_string(), "guid-1".to_string());
    uplink
        .update_connection_metadata("run-42", request_metadata)
        .await
        .expect("update");

    assert!(wait_until(|| sim.channels_opened() == 2).await);
    let headers = sim.last_headers().expect("headers");
    assert_eq!(headers.get(RUN_TOKEN_HEADER).map(String::as_str), Some("run-42"));
    assert_eq!(headers.get("entity-guid").map(String::as_str), Some("guid-1"));

    uplink.accept(span(7));
    assert!(sim.wait_for_spans(1, WAIT).await);

    uplink.shutdown_forever().await;
}

// ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escaped_send_failure_is_fail_stop() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let (uplink, _recorder) = started(&sim, config());
    assert!(sim.wait_for_stream(WAIT).await);

    sim.fail_next_send();
    uplink.accept(span(1));
    assert!(wait_until(|| !uplink.is_running()).await);

    // A later start does not bring the worker back.
    uplink.start().expect("start");
    assert!(!uplink.is_running());

    uplink.accept(span(2));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sim.received_spans().is_empty());

    uplink.shutdown_forever().await;
}

// ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_observer_is_retried() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::unreachable());
    let (uplink, recorder) = started(&sim, config());

    assert!(wait_until(|| recorder.count(metrics::CONNECT_ERROR) >= 2).await);
    assert!(uplink.is_running());

    sim.set_refuse_connections(false);
    uplink.accept(span(1));
    assert!(sim.wait_for_spans(1, WAIT).await);
    assert_eq!(uplink.connection_state(), State::Connected);

    uplink.shutdown_forever().await;
}

// ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_stream_is_reopened_on_same_channel() {
    // ---
    let sim = TraceObserverSim::new(SimConfig::healthy());
    let (uplink, recorder) = started(&sim, config());
    assert!(sim.wait_for_stream(WAIT).await);

    assert!(sim.complete_active_stream());
    assert!(wait_until(|| recorder.count(metrics::RESPONSE_COMPLETED) == 1).await);

    uplink.accept(span(1));
    assert!(sim.wait_for_spans(1, WAIT).await);
    assert_eq!(sim.channels_opened(), 1);
    assert_eq!(sim.streams_opened(), 2);

    uplink.shutdown_forever().await;
}
