//! Ingest Adapter
//!
//! Receives feed callbacks on the feed thread, unwraps the envelope once
//! and hands each item to the distribution queue. Nothing here blocks or
//! panics: the feed thread must stay free to read the socket.
//!
//! # Envelopes
//!
//! | Shape | Items enqueued |
//! |---|---|
//! | `{"data": [a, b], ...}` | `a`, `b` |
//! | `{"data": x, ...}` | `x` |
//! | `[a, b]` | `a`, `b` |
//! | `{...}` without `data` | the object |
//! | scalar | the scalar, as a status item |
//!
//! Empty messages (`null`, `""`, `[]`, `{}`) are ignored.

use serde_json::Value;

use crate::application::ports::FeedCallbacks;
use crate::domain::quote::FeedItem;
use crate::infrastructure::queue::QueueProducer;

/// Field carrying the payload in wrapped envelopes.
pub const ENVELOPE_DATA_FIELD: &str = "data";

// =============================================================================
// Envelope
// =============================================================================

/// The shapes a feed message arrives in.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEnvelope {
    /// Object with a `data` payload.
    Wrapped(Value),
    /// Bare list of items.
    Batch(Vec<Value>),
    /// A single object.
    Record(Value),
    /// Status string, number or other scalar.
    Scalar(Value),
    /// Nothing to deliver.
    Empty,
}

impl From<Value> for FeedEnvelope {
    fn from(message: Value) -> Self {
        match message {
            Value::Null => Self::Empty,
            Value::String(ref s) if s.is_empty() => Self::Empty,
            Value::Array(items) if items.is_empty() => Self::Empty,
            Value::Array(items) => Self::Batch(items),
            Value::Object(mut fields) => {
                if fields.is_empty() {
                    Self::Empty
                } else if let Some(data) = fields.remove(ENVELOPE_DATA_FIELD) {
                    Self::Wrapped(data)
                } else {
                    Self::Record(Value::Object(fields))
                }
            }
            other => Self::Scalar(other),
        }
    }
}

impl FeedEnvelope {
    /// Items to enqueue, in arrival order.
    #[must_use]
    pub fn into_items(self) -> Vec<FeedItem> {
        match self {
            Self::Wrapped(Value::Array(items)) | Self::Batch(items) => {
                items.into_iter().map(FeedItem::from).collect()
            }
            Self::Wrapped(item) | Self::Record(item) | Self::Scalar(item) => {
                vec![FeedItem::from(item)]
            }
            Self::Empty => Vec::new(),
        }
    }

    /// Shape name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Wrapped(_) => "wrapped",
            Self::Batch(_) => "batch",
            Self::Record(_) => "record",
            Self::Scalar(_) => "scalar",
            Self::Empty => "empty",
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// `FeedCallbacks` implementation feeding the distribution queue.
#[derive(Debug, Clone)]
pub struct IngestAdapter {
    queue: QueueProducer,
}

impl IngestAdapter {
    /// Create an adapter over a queue producer.
    #[must_use]
    pub const fn new(queue: QueueProducer) -> Self {
        Self { queue }
    }

    /// Unwrap and enqueue one message. Returns the number of items enqueued.
    pub fn ingest(&self, message: Value) -> usize {
        let envelope = FeedEnvelope::from(message);
        let kind = envelope.kind();

        let mut enqueued = 0;
        for item in envelope.into_items() {
            if !self.queue.push(item) {
                tracing::trace!(kind, "Distribution queue closed, dropping feed message");
                return enqueued;
            }
            enqueued += 1;
        }

        tracing::trace!(kind, enqueued, "Feed message ingested");
        enqueued
    }
}

impl FeedCallbacks for IngestAdapter {
    fn on_open(&self, info: &str) {
        tracing::info!(info, "Neo feed connection opened");
    }

    fn on_message(&self, message: Value) {
        self.ingest(message);
    }

    fn on_error(&self, error: &str) {
        tracing::error!(error, "Neo feed error");
    }

    fn on_close(&self, reason: Option<&str>) {
        tracing::warn!(reason = reason.unwrap_or("none"), "Neo feed connection closed");
    }
}
