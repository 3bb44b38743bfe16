//! Core types and traits for the tracelink telemetry uplink.
//!
//! This crate defines the vocabulary of the system. The uplink core and
//! every transport implementation depend on `tracelink-domain` and speak
//! its types. No connection logic lives here.
//!
//! # Structure
//!
//! - [`error`]    : [`UplinkError`] and [`Result<T>`] alias
//! - [`status`]   : [`Status`] and [`Code`] delivered when a stream ends
//! - [`span`]     : [`SpanEvent`] and its wire form
//! - [`metadata`] : [`ConnectionMetadata`], [`ChannelTarget`], header names
//! - [`transport`]: [`TraceTransport`], [`TraceChannel`], [`SpanStream`],
//!   [`InboundObserver`] and [`MetricSink`] traits

mod error;
mod metadata;
mod span;
mod status;
mod transport;

// --- error
pub use error::{Result, UplinkError};

// --- status
pub use status::{Code, Status, StatusCause};

// --- span
pub use span::{
    // ---
    AttributeValue,
    Attributes,
    OutboundMessage,
    RecordStatus,
    SpanEvent,
    WireSpan,
    TRACE_ID_KEY,
};

// --- metadata
pub use metadata::{
    // ---
    ChannelTarget,
    ConnectionMetadata,
    Headers,
    FLAKY_CODE_HEADER,
    FLAKY_HEADER,
    LICENSE_KEY_HEADER,
    RUN_TOKEN_HEADER,
};

// --- transport
pub use transport::{
    // ---
    InboundObserver,
    InboundObserverPtr,
    MetricSink,
    MetricSinkPtr,
    SpanStream,
    SpanStreamPtr,
    TraceChannel,
    TraceChannelPtr,
    TraceTransport,
    TraceTransportPtr,
};
