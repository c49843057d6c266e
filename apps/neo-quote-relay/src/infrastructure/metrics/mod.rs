//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Messages, errors and reconnects on the upstream connection
//! - **Relay**: Records ingested, quotes broadcast, records discarded
//! - **Subscribers**: Connected downstream clients and delivery failures
//! - **Session**: Credential polls and upstream subscription requests
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "neo_relay_feed_messages_total",
        "Total messages received from the Neo feed"
    );
    describe_counter!(
        "neo_relay_feed_errors_total",
        "Total feed connection errors by type"
    );
    describe_counter!(
        "neo_relay_feed_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_counter!(
        "neo_relay_upstream_requests_total",
        "Total subscription frames sent to the feed by type"
    );

    // Relay
    describe_counter!(
        "neo_relay_records_received_total",
        "Total items taken off the distribution queue"
    );
    describe_counter!(
        "neo_relay_quotes_broadcast_total",
        "Total normalized quotes fanned out"
    );
    describe_counter!(
        "neo_relay_records_discarded_total",
        "Total items discarded by reason"
    );

    // Subscribers
    describe_gauge!(
        "neo_relay_subscribers",
        "Number of connected downstream subscribers"
    );
    describe_counter!(
        "neo_relay_delivery_failures_total",
        "Total failed sends to downstream subscribers"
    );

    // Session
    describe_counter!(
        "neo_relay_credential_polls_total",
        "Total credential polls by outcome"
    );

    // Latency
    describe_histogram!(
        "neo_relay_broadcast_seconds",
        "Time to fan one quote out to every subscriber"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a queued item produced no quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Not a structured record.
    Status,
    /// Record without a usable key or price.
    Partial,
    /// Quote built but nobody was connected.
    NoSubscribers,
}

impl DiscardReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Partial => "partial",
            Self::NoSubscribers => "no_subscribers",
        }
    }
}

/// Outcome of one credential poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Credentials available.
    Ready,
    /// Endpoint answered without a session token.
    Waiting,
    /// Request or decoding failed.
    Failed,
}

impl PollOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Waiting => "waiting",
            Self::Failed => "failed",
        }
    }
}

/// Record a message received from the feed.
pub fn record_feed_message() {
    counter!("neo_relay_feed_messages_total").increment(1);
}

/// Record a feed connection error.
pub fn record_feed_error(error_type: &'static str) {
    counter!("neo_relay_feed_errors_total", "error_type" => error_type).increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_feed_reconnect() {
    counter!("neo_relay_feed_reconnects_total").increment(1);
}

/// Record a subscription frame sent upstream.
pub fn record_upstream_request(kind: &'static str) {
    counter!("neo_relay_upstream_requests_total", "type" => kind).increment(1);
}

/// Record an item taken off the distribution queue.
pub fn record_record_received() {
    counter!("neo_relay_records_received_total").increment(1);
}

/// Record a quote fanned out.
pub fn record_quote_broadcast() {
    counter!("neo_relay_quotes_broadcast_total").increment(1);
}

/// Record a discarded item.
pub fn record_discarded(reason: DiscardReason) {
    counter!("neo_relay_records_discarded_total", "reason" => reason.as_str()).increment(1);
}

/// Record failed deliveries.
pub fn record_delivery_failures(count: u64) {
    counter!("neo_relay_delivery_failures_total").increment(count);
}

/// Update the connected subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("neo_relay_subscribers").set(count as f64);
}

/// Record a credential poll.
pub fn record_credential_poll(outcome: PollOutcome) {
    counter!("neo_relay_credential_polls_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record fan-out duration.
pub fn record_broadcast_duration(duration: Duration) {
    histogram!("neo_relay_broadcast_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
