//! Span records and batches.
//!
//! The exporter core is generic over any [`SpanRecord`]: it only needs to
//! serialize a record for the wire and format it with `Debug` when the record
//! has to be reported as lost. [`Span`] is a ready-made OpenTelemetry-shaped
//! record for applications (and the demo) that don't bring their own.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

/// A unit of trace data the exporter can buffer and deliver.
///
/// Blanket-implemented for every `Serialize + Debug + Send + Sync + 'static`
/// type. `Sync` is needed because the in-flight batch is borrowed across the
/// network call inside the worker task.
pub trait SpanRecord: Serialize + Debug + Send + Sync + 'static {}

impl<T: Serialize + Debug + Send + Sync + 'static> SpanRecord for T {}

/// Represents a single distributed tracing span
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    /// Unique trace identifier (128-bit), rendered as 32 hex digits
    #[serde(serialize_with = "hex_u128")]
    pub trace_id: u128,
    /// Unique span identifier (64-bit), rendered as 16 hex digits
    #[serde(serialize_with = "hex_u64")]
    pub span_id: u64,
    /// Parent span identifier (`None` for a root span)
    #[serde(serialize_with = "hex_u64_opt")]
    pub parent_span_id: Option<u64>,
    /// Operation name
    pub name: String,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds)
    pub end_time: u64,
    /// Span attributes
    pub attributes: HashMap<String, AttributeValue>,
    /// Span status
    pub status: SpanStatus,
    /// Span kind
    pub kind: SpanKind,
}

/// Attribute value types for span metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanStatus {
    /// Span completed successfully
    Ok,
    /// Span completed with error
    Error,
    /// Span status unknown
    Unset,
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

fn hex_u128<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:032x}"))
}

fn hex_u64<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:016x}"))
}

#[allow(clippy::ref_option)]
fn hex_u64_opt<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(id) => hex_u64(id, serializer),
        None => serializer.serialize_none(),
    }
}

impl Span {
    /// Starts a new span; `end_time` equals `start_time` until [`Span::finish`].
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: Option<u64>,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        let now = unix_nanos();
        Self {
            trace_id,
            span_id,
            parent_span_id,
            name: name.into(),
            start_time: now,
            end_time: now,
            attributes: HashMap::new(),
            status: SpanStatus::Unset,
            kind,
        }
    }

    /// Marks the span as completed with the given status
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = unix_nanos().max(self.start_time);
        self.status = status;
    }

    /// Adds an attribute to the span
    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }

    /// Duration of the span in nanoseconds
    pub fn duration_nanos(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// Ordered group of records handed to one delivery attempt.
///
/// A batch is moved out of the buffer by value, so nothing can append to it
/// while the attempt is in flight.
#[derive(Debug)]
pub struct SpanBatch<S> {
    /// Records in submission order
    pub spans: Vec<S>,
}

impl<S> SpanBatch<S> {
    /// Creates a new empty batch
    pub fn new() -> Self {
        Self { spans: Vec::new() }
    }

    /// Creates a batch with the given records
    pub fn with_spans(spans: Vec<S>) -> Self {
        Self { spans }
    }

    /// Returns the number of records in the batch
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Consumes the batch, returning its records
    pub fn into_spans(self) -> Vec<S> {
        self.spans
    }
}

impl<S> Default for SpanBatch<S> {
    fn default() -> Self {
        Self::new()
    }
}
