//! Broadcast Loop
//!
//! The sole consumer of the distribution queue. Each structured record is
//! normalized, keyed back to the downstream code and fanned out to every
//! connected subscriber.
//!
//! # Delivery
//!
//! The payload is serialized once and sent to all subscribers concurrently.
//! Sends are independent: a failing subscriber neither blocks nor aborts
//! the others, and failed sends are not retried. The next quote for the
//! same instrument supersedes a missed one.
//!
//! # Failure Handling
//!
//! Errors while processing an item are logged at the loop boundary, then the
//! loop pauses briefly and continues with the next item. Panics are caught
//! at two levels: a panicking sink counts as one failed delivery, and a panic
//! anywhere else in processing is treated like an error.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::application::context::{RelayContext, SubscriberId};
use crate::application::ports::SubscriberSink;
use crate::domain::quote::{FeedItem, NormalizedQuote, QuoteRecord};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics::{self, DiscardReason};
use crate::infrastructure::queue::QueueConsumer;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of fanning one payload out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers whose send failed.
    pub failed: usize,
}

/// What happened to one queued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Not a structured record.
    Status,
    /// Record missing a key or price.
    Partial,
    /// Quote built, nobody connected.
    NoSubscribers(NormalizedQuote),
    /// Quote fanned out.
    Delivered {
        /// The quote sent.
        quote: NormalizedQuote,
        /// Per-subscriber results.
        report: DeliveryReport,
    },
}

/// Failure processing one item.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// Quote could not be serialized.
    #[error("failed to encode quote: {0}")]
    Encode(#[from] serde_json::Error),

    /// Processing panicked.
    #[error("broadcast processing panicked: {0}")]
    Panicked(String),
}

/// Run `future`, turning a panic into [`BroadcastError::Panicked`].
///
/// # Errors
///
/// Returns the future's own error, or `Panicked` if it unwound.
pub async fn guarded<T>(
    future: impl Future<Output = Result<T, BroadcastError>>,
) -> Result<T, BroadcastError> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(BroadcastError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// =============================================================================
// Fan-out
// =============================================================================

/// Send `payload` to every subscriber concurrently.
///
/// Never fails; failed sends are counted and logged at debug level. A sink
/// that panics counts as a failed send.
pub async fn deliver_all(
    subscribers: &[(SubscriberId, Arc<dyn SubscriberSink>)],
    payload: &str,
) -> DeliveryReport {
    let results = join_all(subscribers.iter().map(|(id, sink)| async move {
        let sent = AssertUnwindSafe(sink.send_text(payload))
            .catch_unwind()
            .await;
        (*id, sent)
    }))
    .await;

    let mut report = DeliveryReport::default();
    for (id, result) in results {
        match result {
            Ok(Ok(())) => report.delivered += 1,
            Ok(Err(e)) => {
                tracing::debug!(subscriber = %id, error = %e, "Delivery failed");
                report.failed += 1;
            }
            Err(panic) => {
                tracing::warn!(
                    subscriber = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Subscriber sink panicked"
                );
                report.failed += 1;
            }
        }
    }
    report
}

// =============================================================================
// Broadcast Loop
// =============================================================================

/// Consumes the distribution queue and fans quotes out.
pub struct BroadcastLoop {
    context: Arc<RelayContext>,
    queue: QueueConsumer,
    error_pause: Duration,
}

impl BroadcastLoop {
    /// Create a loop over the shared context.
    #[must_use]
    pub const fn new(
        context: Arc<RelayContext>,
        queue: QueueConsumer,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            context,
            queue,
            error_pause: settings.error_pause,
        }
    }

    /// Run until cancelled or every producer is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Broadcast loop started");

        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => break,
                item = self.queue.next() => match item {
                    Some(item) => item,
                    None => {
                        tracing::info!("Distribution queue closed");
                        break;
                    }
                },
            };

            if let Err(e) = guarded(self.process(item)).await {
                self.context.stats.record_loop_error();
                tracing::error!(error = %e, "Error in broadcast loop");

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.error_pause) => {}
                }
            }
        }

        tracing::info!("Broadcast loop stopped");
    }

    /// Handle one queued item.
    ///
    /// # Errors
    ///
    /// Returns an error if the quote cannot be serialized.
    pub async fn process(&self, item: FeedItem) -> Result<BroadcastOutcome, BroadcastError> {
        self.context.stats.record_received();
        metrics::record_record_received();

        let record = match item {
            FeedItem::Record(record) => record,
            FeedItem::Status(status) => {
                tracing::info!(status = %status, "Feed status message");
                self.discard(DiscardReason::Status);
                return Ok(BroadcastOutcome::Status);
            }
        };

        let Some(quote) = self.normalize(&record) else {
            if let Some(key) = record.instrument_key() {
                tracing::debug!(tk = %key, "Partial update without price");
            }
            self.discard(DiscardReason::Partial);
            return Ok(BroadcastOutcome::Partial);
        };

        let subscribers = self.context.subscribers.snapshot();
        if subscribers.is_empty() {
            self.discard(DiscardReason::NoSubscribers);
            return Ok(BroadcastOutcome::NoSubscribers(quote));
        }

        let payload = quote.to_json()?;
        let started = Instant::now();
        let report = deliver_all(&subscribers, &payload).await;
        metrics::record_broadcast_duration(started.elapsed());

        self.context.stats.record_broadcast();
        metrics::record_quote_broadcast();
        if report.failed > 0 {
            let failed = u64::try_from(report.failed).unwrap_or(u64::MAX);
            self.context.stats.record_delivery_failures(failed);
            metrics::record_delivery_failures(failed);
        }

        Ok(BroadcastOutcome::Delivered { quote, report })
    }

    fn normalize(&self, record: &QuoteRecord) -> Option<NormalizedQuote> {
        let tokens = &self.context.tokens;
        NormalizedQuote::from_record(record, |key| {
            let downstream = tokens.reverse_lookup(key);
            if downstream != key {
                tracing::debug!(upstream = key, downstream = %downstream, "Mapped index token");
            }
            downstream
        })
    }

    fn discard(&self, reason: DiscardReason) {
        self.context.stats.record_discarded();
        metrics::record_discarded(reason);
    }
}

impl std::fmt::Debug for BroadcastLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastLoop")
            .field("error_pause", &self.error_pause)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
