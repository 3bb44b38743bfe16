//! tracelink demo daemon.
//!
//! Runs an [`Uplink`] against the in-process trace observer and feeds it
//! synthetic spans until Ctrl-C, optionally breaking the stream on a timer
//! so the reconnect path can be watched in the logs.
//!
//! Usage:
//!   tracelink-agent --fail-every 10 --fast-backoff
//!   RUST_LOG=tracelink_agent=debug tracelink-agent --flaky 5

use std::sync::Arc;
use std::time::Duration;

// ---

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ---

use tracelink_agent::{MetricRecorder, Uplink};
use tracelink_domain::{SpanEvent, Status, TRACE_ID_KEY};
use tracelink_sim::{SimConfig, TraceObserverSim};

// ---

mod cli;

use cli::Config;

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(!no_color)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tracelink-agent starting");

    let sim = TraceObserverSim::new(SimConfig::healthy());
    let metrics = Arc::new(MetricRecorder::new());

    let uplink = Arc::new(Uplink::new(
        cfg.uplink_config(),
        sim.transport(),
        metrics.clone(),
    )?);
    uplink.start()?;

    // Run token as the collector would hand it out on connect.
    uplink
        .update_connection_metadata(Uuid::new_v4().to_string(), Default::default())
        .await?;

    tokio::spawn(produce(Arc::clone(&uplink), cfg.span_interval()));

    if let Some(secs) = cfg.fail_every {
        tokio::spawn(break_stream_every(sim.clone(), Duration::from_secs(secs.max(1))));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    uplink.shutdown_forever().await;

    info!(
        received = sim.received_spans().len(),
        channels = sim.channels_opened(),
        streams = sim.streams_opened(),
        "observer totals",
    );
    for (name, count) in metrics.snapshot() {
        info!("{name} = {count}");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Demo tasks
// ---------------------------------------------------------------------------

async fn produce(uplink: Arc<Uplink>, interval: Duration) {
    // ---
    let mut ticker = tokio::time::interval(interval);
    let mut seq: i64 = 0;

    loop {
        ticker.tick().await;
        seq += 1;

        let span = SpanEvent::new()
            .with_intrinsic(TRACE_ID_KEY, Uuid::new_v4().simple().to_string())
            .with_intrinsic("name", "demo/work")
            .with_intrinsic("seq", seq)
            .with_agent_attribute("host", "demo")
            .with_user_attribute("sampled", true);

        if !uplink.accept(span) {
            tracing::debug!(seq, "span dropped");
        }
    }
}

// ---

async fn break_stream_every(sim: TraceObserverSim, period: Duration) {
    // ---
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if sim.fail_active_stream(Status::unavailable("demo: connection reset")) {
            info!("demo: broke the active stream");
        }
    }
}
