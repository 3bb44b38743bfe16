//! Resilient streaming span uplink.
//!
//! Producers hand spans to [`Uplink::accept`]; a dedicated delivery thread
//! streams them to a remote trace observer over one long-lived
//! bidirectional stream, reconnecting with backoff when the stream fails.
//!
//! # Structure
//!
//! - [`config`]           : [`UplinkConfig`], [`BackoffSettings`]
//! - [`connection_state`] : [`ConnectionState`] single-flight state machine
//! - [`backoff`]          : default and connect [`BackoffPolicy`]s
//! - [`channel_manager`]  : [`ChannelManager`], channel, stream, backoff gate
//! - [`disconnection`]    : [`DisconnectionHandler`], recovery decisions
//! - [`response_observer`]: [`ResponseObserver`], error classification
//! - [`delivery`]         : bounded [`SpanQueue`] and [`SpanDelivery`] loop
//! - [`uplink`]           : [`Uplink`], the producer-facing API
//! - [`metrics`]          : supportability counter names, [`MetricRecorder`]
//!
//! Transport errors never reach producers. The only error surfaced
//! synchronously is a bad configuration at [`Uplink::new`].

pub mod backoff;
pub mod channel_manager;
pub mod config;
pub mod connection_state;
pub mod delivery;
pub mod disconnection;
pub mod headers;
pub mod metrics;
pub mod response_observer;
pub mod uplink;

#[cfg(test)]
mod test_support;

// Gateway re-exports; siblings import via super::Symbol.
pub use backoff::{BackoffPolicy, ConnectBackoffPolicy, DefaultBackoffPolicy};
pub use channel_manager::{ChannelClosing, ChannelManager, CLOSING_REASON};
pub use config::{BackoffSettings, FaultInjection, UplinkConfig};
pub use connection_state::{BlockResult, ConnectionState, State};
pub use delivery::{span_queue, DeliverySettings, SpanDelivery, SpanQueue};
pub use disconnection::DisconnectionHandler;
pub use headers::ConnectionHeaders;
pub use metrics::MetricRecorder;
pub use response_observer::{ResponseObserver, ALPN_ERROR_PREFIX, IDLE_TIMEOUT_PREFIX};
pub use uplink::{Uplink, DELIVERY_THREAD_NAME};
