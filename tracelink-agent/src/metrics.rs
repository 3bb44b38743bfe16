//! Supportability counter names and an in-memory [`MetricSink`].

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

// ---

use tracelink_domain::{Code, MetricSink};

// ---------------------------------------------------------------------------
// Counter names
// ---------------------------------------------------------------------------

pub const SPAN_SEEN: &str = "Supportability/Tracelink/Span/Seen";
pub const SPAN_SENT: &str = "Supportability/Tracelink/Span/Sent";
pub const SPAN_DROPPED: &str = "Supportability/Tracelink/Span/Dropped";
pub const CONNECT: &str = "Supportability/Tracelink/Connect";
pub const CONNECT_ERROR: &str = "Supportability/Tracelink/Connect/Error";
pub const NOT_READY: &str = "Supportability/Tracelink/NotReady";
pub const RESPONSE: &str = "Supportability/Tracelink/Response";
pub const RESPONSE_ERROR: &str = "Supportability/Tracelink/Response/Error";
pub const RESPONSE_COMPLETED: &str = "Supportability/Tracelink/Response/Completed";
pub const NO_CAPABILITY: &str = "Supportability/Tracelink/NoCapability";

const SPAN_STATUS_PREFIX: &str = "Supportability/Tracelink/Span/Status";

/// Per-code error counter, e.g. `.../Span/Status/UNAVAILABLE`.
pub fn span_status(code: Code) -> String {
    format!("{SPAN_STATUS_PREFIX}/{}", code.as_str())
}

// ---------------------------------------------------------------------------
// MetricRecorder
// ---------------------------------------------------------------------------

/// Counting [`MetricSink`] for hosts without their own aggregator, and for
/// tests.
#[derive(Debug, Default)]
pub struct MetricRecorder {
    // ---
    counters: Mutex<BTreeMap<String, u64>>,
}

// ---

impl MetricRecorder {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`; `0` if never incremented.
    pub fn count(&self, name: &str) -> u64 {
        // ---
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).copied().unwrap_or(0)
    }

    /// Copy of every counter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ---

impl MetricSink for MetricRecorder {
    // ---
    fn increment_counter(&self, name: &str) {
        // ---
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
