use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// AttributeValue
// ---------------------------------------------------------------------------

/// Typed attribute value carried on a span.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    // ---
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
}

// ---

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

// ---

pub type Attributes = BTreeMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// SpanEvent
// ---------------------------------------------------------------------------

/// Intrinsic key holding the trace id. Lifted out onto [`WireSpan::trace_id`]
/// by [`SpanEvent::into_wire`].
pub const TRACE_ID_KEY: &str = "traceId";

/// One telemetry record handed to the uplink by a producer.
///
/// Consumed exactly once by the delivery loop. Spans dropped on queue
/// overflow are never retried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanEvent {
    // ---
    pub intrinsics: Attributes,
    pub user_attributes: Attributes,
    pub agent_attributes: Attributes,
}

// ---

impl SpanEvent {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    pub fn with_intrinsic(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        // ---
        self.intrinsics.insert(key.into(), value.into());
        self
    }

    pub fn with_user_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        // ---
        self.user_attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_agent_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        // ---
        self.agent_attributes.insert(key.into(), value.into());
        self
    }

    // ---

    /// The `traceId` intrinsic, if present and a string.
    pub fn trace_id(&self) -> Option<&str> {
        // ---
        match self.intrinsics.get(TRACE_ID_KEY) {
            Some(AttributeValue::String(id)) => Some(id),
            _ => None,
        }
    }

    // ---

    /// Convert into the form written on the stream.
    ///
    /// The trace id is kept in the intrinsics as well; the observer routes
    /// on the top-level field and stores the intrinsics verbatim.
    pub fn into_wire(self) -> WireSpan {
        // ---
        let trace_id = self.trace_id().unwrap_or_default().to_string();
        WireSpan {
            trace_id,
            intrinsics: self.intrinsics,
            user_attributes: self.user_attributes,
            agent_attributes: self.agent_attributes,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// A span as written on the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct WireSpan {
    // ---
    pub trace_id: String,
    pub intrinsics: Attributes,
    pub user_attributes: Attributes,
    pub agent_attributes: Attributes,
}

/// One outbound message on the span stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    // ---
    Span(WireSpan),

    /// Sent instead of [`OutboundMessage::Span`] when batching is enabled.
    Batch(Vec<WireSpan>),
}

// ---

impl OutboundMessage {
    // ---
    /// Number of spans carried by this message.
    pub fn span_count(&self) -> usize {
        // ---
        match self {
            OutboundMessage::Span(_) => 1,
            OutboundMessage::Batch(spans) => spans.len(),
        }
    }
}

/// Inbound acknowledgement from the trace observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStatus {
    // ---
    /// Running count of spans the observer has accepted on this stream.
    pub messages_seen: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
