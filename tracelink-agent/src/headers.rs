//! [`ConnectionHeaders`]: the metadata presented on every channel.
//!
//! Read-copy-update: readers take an `Arc` snapshot, writers replace the
//! whole value. A channel built from a snapshot never sees a later update;
//! the uplink tears the channel down after each update instead.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

// ---

use tracelink_domain::{ConnectionMetadata, Headers, FLAKY_CODE_HEADER, FLAKY_HEADER};

// ---

use super::FaultInjection;

// ---------------------------------------------------------------------------
// ConnectionHeaders
// ---------------------------------------------------------------------------

pub struct ConnectionHeaders {
    // ---
    current: RwLock<Arc<ConnectionMetadata>>,
    fault_injection: Option<FaultInjection>,
}

// ---

impl ConnectionHeaders {
    // ---
    pub fn new(license_key: impl Into<String>, fault_injection: Option<FaultInjection>) -> Self {
        // ---
        Self {
            current: RwLock::new(Arc::new(ConnectionMetadata::new(license_key))),
            fault_injection,
        }
    }

    // ---

    /// Replace the run token and request metadata. The license key is
    /// fixed for the life of the uplink.
    pub fn set(
        &self,
        agent_run_token: impl Into<String>,
        request_metadata: BTreeMap<String, String>,
    ) {
        // ---
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = ConnectionMetadata {
            license_key: current.license_key.clone(),
            agent_run_token: Some(agent_run_token.into()),
            request_metadata,
        };
        *current = Arc::new(next);
    }

    // ---

    pub fn snapshot(&self) -> Arc<ConnectionMetadata> {
        // ---
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    // ---

    /// Headers for a new channel: the current metadata plus any
    /// fault-injection headers.
    pub fn headers(&self) -> Headers {
        // ---
        let mut headers = self.snapshot().to_headers();

        if let Some(fault) = &self.fault_injection {
            headers.insert(FLAKY_HEADER.into(), fault.percentage.to_string());
            if let Some(code) = fault.code {
                headers.insert(FLAKY_CODE_HEADER.into(), code.as_i32().to_string());
            }
        }
        headers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
