//! Subscription Controller
//!
//! Turns downstream subscribe/unsubscribe frames into upstream calls.
//! Failures never leave this module: the connection handler calls
//! [`SubscriptionController::handle_request`] and moves on.

use std::sync::Arc;

use crate::application::context::RelayContext;
use crate::application::ports::SessionError;
use crate::domain::subscription::{SubscriptionAction, SubscriptionBatch, SubscriptionRequest};

/// Why a request did not reach upstream.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Frame is not a valid request.
    #[error("malformed request: {0}")]
    Parse(#[from] serde_json::Error),
    /// No upstream session yet. Requests are dropped, not queued.
    #[error("upstream session not established")]
    NoSession,
    /// The session refused the call.
    #[error(transparent)]
    Upstream(#[from] SessionError),
}

/// What one request did upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// The requested action.
    pub action: SubscriptionAction,
    /// Upstream calls issued (0, 1 or 2).
    pub upstream_calls: usize,
    /// Instruments sent upstream.
    pub instruments: usize,
    /// Entries skipped as malformed or unknown.
    pub skipped: usize,
}

/// Dispatches subscription requests to the upstream session.
#[derive(Debug, Clone)]
pub struct SubscriptionController {
    context: Arc<RelayContext>,
}

impl SubscriptionController {
    /// Create a controller over the shared context.
    #[must_use]
    pub const fn new(context: Arc<RelayContext>) -> Self {
        Self { context }
    }

    /// Handle one inbound frame, logging and swallowing any failure.
    pub fn handle_request(&self, raw: &str) {
        match self.dispatch(raw) {
            Ok(report) => {
                tracing::info!(
                    action = report.action.as_str(),
                    calls = report.upstream_calls,
                    instruments = report.instruments,
                    skipped = report.skipped,
                    "Subscription request dispatched"
                );
            }
            Err(RequestError::NoSession) => {
                self.context.stats.record_request_dropped();
                tracing::warn!("Upstream session not established, dropping subscription request");
            }
            Err(e) => {
                self.context.stats.record_request_dropped();
                tracing::error!(error = %e, "Failed to handle subscription request");
            }
        }
    }

    /// Parse, resolve and issue the upstream calls for one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed, no session is installed,
    /// or the session rejects a call.
    pub fn dispatch(&self, raw: &str) -> Result<DispatchReport, RequestError> {
        let request = SubscriptionRequest::parse(raw)?;
        let session = self
            .context
            .session
            .current()
            .ok_or(RequestError::NoSession)?;

        let batch = SubscriptionBatch::resolve(&request.symbols, &self.context.tokens);
        for (symbol, reason) in &batch.skipped {
            tracing::warn!(symbol = %symbol, reason = %reason, "Skipping symbol");
        }

        let mut report = DispatchReport {
            action: request.action,
            upstream_calls: 0,
            instruments: 0,
            skipped: batch.skipped.len(),
        };

        match request.action {
            SubscriptionAction::Subscribe => {
                if !batch.regular.is_empty() {
                    session.subscribe(&batch.regular, false)?;
                    self.count_call(&mut report, batch.regular.len());
                }
                if !batch.aggregates.is_empty() {
                    session.subscribe(&batch.aggregates, true)?;
                    self.count_call(&mut report, batch.aggregates.len());
                }
            }
            SubscriptionAction::Unsubscribe => {
                // Index unsubscribe destabilises the Neo feed; indices stay subscribed.
                if !batch.aggregates.is_empty() {
                    tracing::debug!(
                        count = batch.aggregates.len(),
                        "Leaving index instruments subscribed upstream"
                    );
                }
                if !batch.regular.is_empty() {
                    session.unsubscribe(&batch.regular, false)?;
                    self.count_call(&mut report, batch.regular.len());
                }
            }
        }

        Ok(report)
    }

    fn count_call(&self, report: &mut DispatchReport, instruments: usize) {
        self.context.stats.record_upstream_call();
        report.upstream_calls += 1;
        report.instruments += instruments;
    }
}
