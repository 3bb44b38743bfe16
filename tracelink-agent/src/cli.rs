//! CLI configuration for the `tracelink-agent` demo daemon.
//!
//! Usage:
//!   tracelink-agent [--host trace-observer.local] [--rate 50] [--fail-every 20]
//!   tracelink-agent --flaky 5 --flaky-code 14 --fast-backoff

use std::time::Duration;

use clap::Parser;

// ---

use tracelink_agent::{BackoffSettings, FaultInjection, UplinkConfig};
use tracelink_domain::Code;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "tracelink-agent",
    about = "Stream synthetic spans to an in-process trace observer"
)]
pub struct Config {
    // ---
    /// Trace observer host name.
    #[arg(long, default_value = "trace-observer.local")]
    pub host: String,

    #[arg(long, default_value_t = 443)]
    pub port: u16,

    /// Connect without TLS.
    #[arg(long)]
    pub plaintext: bool,

    #[arg(long)]
    pub compression: bool,

    /// Send spans in batches instead of one per message.
    #[arg(long)]
    pub batching: bool,

    #[arg(long, default_value_t = 100)]
    pub max_batch_size: usize,

    /// Span queue capacity; spans beyond it are dropped.
    #[arg(long, default_value_t = 10_000)]
    pub queue_size: usize,

    #[arg(long, default_value = "demo-license-key")]
    pub license_key: String,

    /// Percentage (0-100) of spans the observer should fail.
    #[arg(long)]
    pub flaky: Option<f64>,

    /// Numeric status code used for flaky failures (default: observer's
    /// choice).
    #[arg(long, requires = "flaky")]
    pub flaky_code: Option<i32>,

    /// Spans produced per second.
    #[arg(long, default_value_t = 20)]
    pub rate: u32,

    /// Fail the active stream with UNAVAILABLE every N seconds.
    #[arg(long)]
    pub fail_every: Option<u64>,

    /// Scale every backoff delay from seconds down to milliseconds.
    #[arg(long)]
    pub fast_backoff: bool,
}

// ---

impl Config {
    // ---
    pub fn uplink_config(&self) -> UplinkConfig {
        // ---
        let backoff = if self.fast_backoff {
            BackoffSettings::compressed(Duration::from_millis(1))
        } else {
            BackoffSettings::default()
        };

        UplinkConfig {
            host: self.host.clone(),
            port: self.port,
            use_plaintext: self.plaintext,
            use_compression: self.compression,
            use_batching: self.batching,
            max_batch_size: self.max_batch_size,
            queue_size: self.queue_size,
            license_key: self.license_key.clone(),
            fault_injection: self.flaky.map(|percentage| FaultInjection {
                percentage,
                code: self.flaky_code.map(Code::from_i32),
            }),
            backoff,
        }
    }

    /// Interval between produced spans.
    pub fn span_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate.max(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
