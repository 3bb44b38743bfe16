//! In-process trace observer for tracelink unit and integration testing.
//!
//! [`TraceObserverSim`] stands in for the remote ingestion endpoint and
//! hands out a [`SimTransport`] implementing
//! [`tracelink_domain::TraceTransport`] over tokio channels instead of a
//! real RPC stack. Injected impairments:
//!
//! - Refused connections
//! - Flow-control back-pressure (`is_ready() == false`)
//! - Server-side stream termination with any [`tracelink_domain::Status`]
//! - Clean server-side completion
//! - Probabilistic failures requested through the `flaky` / `flaky_code`
//!   connection headers, with a deterministic RNG seed
//! - A write failure outside the observer error channel
//!
//! # Quick start
//!
//! ```rust
//! use tracelink_sim::{SimConfig, TraceObserverSim};
//!
//! let sim = TraceObserverSim::new(SimConfig::healthy());
//! let transport = sim.transport();
//! ```

mod channel;
mod config;
mod stream;
mod transport;

#[cfg(test)]
mod tests;

// --- public API
pub use channel::SimChannel;
pub use config::SimConfig;
pub use transport::{SimTransport, TraceObserverSim};
