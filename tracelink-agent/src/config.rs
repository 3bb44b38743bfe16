//! Uplink configuration.
//!
//! [`UplinkConfig`] is built once by the host and handed to
//! [`crate::Uplink::new`]; collaborators are not reconfigured after start.

use std::time::Duration;

// ---

use tracelink_domain::{ChannelTarget, Code, Result, UplinkError};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Escalating reconnect schedule used by the connect backoff policy.
pub const CONNECT_BACKOFF_SCHEDULE_SECS: [u64; 7] = [0, 15, 15, 30, 60, 120, 300];

/// Fixed delay used by the default backoff policy.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// FaultInjection
// ---------------------------------------------------------------------------

/// Ask the trace observer to fail a percentage of spans (testing only).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultInjection {
    // ---
    /// `0.0 ..= 100.0`
    pub percentage: f64,

    /// Status code the observer fails with. `None` leaves the choice to
    /// the observer.
    pub code: Option<Code>,
}

// ---------------------------------------------------------------------------
// BackoffSettings
// ---------------------------------------------------------------------------

/// Timing knobs for reconnection and the delivery loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSettings {
    // ---
    /// Fixed delay after a generic stream error.
    pub default_delay: Duration,

    /// Escalating delays after failed-precondition responses and connect
    /// failures. Holds at the last entry once exhausted.
    pub connect_schedule: Vec<Duration>,

    /// Re-check interval for callers waiting on another caller's connect.
    pub connection_poll: Duration,

    /// Pause when the stream reports it is not ready for more data.
    pub not_ready_pause: Duration,

    /// Maximum wait for a queued span before the loop re-checks the
    /// connection.
    pub queue_poll: Duration,
}

// ---

impl Default for BackoffSettings {
    fn default() -> Self {
        // ---
        Self {
            default_delay: DEFAULT_BACKOFF,
            connect_schedule: CONNECT_BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            connection_poll: Duration::from_secs(1),
            not_ready_pause: Duration::from_millis(250),
            queue_poll: Duration::from_millis(250),
        }
    }
}

// ---

impl BackoffSettings {
    // ---
    /// Every delay scaled down to `unit` per second, for tests and demos
    /// that must observe several reconnects quickly.
    pub fn compressed(unit: Duration) -> Self {
        // ---
        let scale = |d: Duration| unit.mul_f64(d.as_secs_f64());
        let base = Self::default();
        Self {
            default_delay: scale(base.default_delay),
            connect_schedule: base.connect_schedule.into_iter().map(scale).collect(),
            connection_poll: Duration::from_millis(10),
            not_ready_pause: Duration::from_millis(10),
            queue_poll: Duration::from_millis(20),
        }
    }
}

// ---------------------------------------------------------------------------
// UplinkConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct UplinkConfig {
    // ---
    /// Trace observer host name.
    pub host: String,

    pub port: u16,

    /// Connect without TLS.
    pub use_plaintext: bool,

    pub use_compression: bool,

    /// Write spans in batches of up to `max_batch_size` instead of one at
    /// a time.
    pub use_batching: bool,

    pub max_batch_size: usize,

    /// Bounded span queue capacity. Spans beyond it are dropped.
    pub queue_size: usize,

    pub license_key: String,

    pub fault_injection: Option<FaultInjection>,

    pub backoff: BackoffSettings,
}

// ---

impl Default for UplinkConfig {
    fn default() -> Self {
        // ---
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            use_plaintext: false,
            use_compression: false,
            use_batching: false,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            license_key: String::new(),
            fault_injection: None,
            backoff: BackoffSettings::default(),
        }
    }
}

// ---

impl UplinkConfig {
    // ---
    pub fn new(host: impl Into<String>, license_key: impl Into<String>) -> Self {
        // ---
        Self {
            host: host.into(),
            license_key: license_key.into(),
            ..Default::default()
        }
    }

    // ---

    /// Reject configurations the uplink cannot run with. The only error
    /// the uplink ever surfaces synchronously.
    pub fn validate(&self) -> Result<()> {
        // ---
        let host = self.host.trim();
        if host.is_empty() {
            return Err(UplinkError::Config("trace observer host is empty".into()));
        }
        if host.contains(char::is_whitespace) || host.contains('/') {
            return Err(UplinkError::Config(format!(
                "trace observer host {host:?} is not a valid host name"
            )));
        }
        if self.port == 0 {
            return Err(UplinkError::Config("trace observer port is 0".into()));
        }
        if self.queue_size == 0 {
            return Err(UplinkError::Config("span queue size must be > 0".into()));
        }
        if self.use_batching && self.max_batch_size == 0 {
            return Err(UplinkError::Config("max batch size must be > 0".into()));
        }
        if self.backoff.connect_schedule.is_empty() {
            return Err(UplinkError::Config(
                "connect backoff schedule is empty".into(),
            ));
        }
        if let Some(fault) = &self.fault_injection {
            if !(0.0..=100.0).contains(&fault.percentage) {
                return Err(UplinkError::Config(format!(
                    "flaky percentage {} is outside 0..=100",
                    fault.percentage
                )));
            }
        }
        Ok(())
    }

    // ---

    pub fn channel_target(&self) -> ChannelTarget {
        // ---
        ChannelTarget {
            host: self.host.trim().to_string(),
            port: self.port,
            use_plaintext: self.use_plaintext,
            use_compression: self.use_compression,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::time::Duration;

    use super::{BackoffSettings, FaultInjection, UplinkConfig};

    #[test]
    fn defaults_are_valid_once_host_is_set() {
        // ---
        assert!(UplinkConfig::default().validate().is_err());

        let cfg = UplinkConfig::new("trace-observer.example.com", "lk");
        cfg.validate().expect("valid");
        assert_eq!(cfg.queue_size, 10_000);
        assert_eq!(cfg.channel_target().authority(), "trace-observer.example.com:443");
    }

    // ---

    #[test]
    fn invalid_values_are_rejected() {
        // ---
        let base = UplinkConfig::new("observer", "lk");

        let bad_host = UplinkConfig {
            host: "http://observer".into(),
            ..base.clone()
        };
        assert!(bad_host.validate().is_err());

        let no_port = UplinkConfig {
            port: 0,
            ..base.clone()
        };
        assert!(no_port.validate().is_err());

        let no_queue = UplinkConfig {
            queue_size: 0,
            ..base.clone()
        };
        assert!(no_queue.validate().is_err());

        let bad_flaky = UplinkConfig {
            fault_injection: Some(FaultInjection {
                percentage: 140.0,
                code: None,
            }),
            ..base
        };
        assert!(bad_flaky.validate().is_err());
    }

    // ---

    #[test]
    fn compressed_settings_keep_schedule_shape() {
        // ---
        let fast = BackoffSettings::compressed(Duration::from_millis(1));
        let millis: Vec<u128> = fast.connect_schedule.iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![0, 15, 15, 30, 60, 120, 300]);
        assert_eq!(fast.default_delay, Duration::from_millis(15));
    }
}
