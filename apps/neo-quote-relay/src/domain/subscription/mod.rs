//! Subscription Requests
//!
//! Downstream clients send
//! `{"action": "subscribe" | "unsubscribe", "symbols": ["EXCH|CODE", ...]}`.
//! Each symbol resolves independently into a [`Resolution`]; resolved
//! references are partitioned into aggregate and regular groups because the
//! feed needs a separate call for each.
//!
//! Subscriptions are process-wide, not per client: every connected client
//! receives every instrument subscribed upstream.

use serde::Deserialize;
use serde_json::Value;

use super::instrument::{InstrumentRef, ScripError, UpstreamRef};
use super::token::TokenNormalizer;

// =============================================================================
// Request
// =============================================================================

/// Requested change to the upstream subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start receiving quotes.
    Subscribe,
    /// Stop receiving quotes.
    Unsubscribe,
}

impl SubscriptionAction {
    /// Lowercase action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A parsed downstream request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionRequest {
    /// What to do.
    pub action: SubscriptionAction,
    /// Scrip strings in request order. Non-string entries are kept so they
    /// can be skipped individually.
    #[serde(default)]
    pub symbols: Vec<Value>,
}

impl SubscriptionRequest {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, the action is missing or
    /// unknown, or `symbols` is not a list.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Why a single symbol was left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    /// The entry was not a string.
    #[error("symbol is not a string: {0}")]
    NotAString(String),
    /// The string was not a valid scrip.
    #[error(transparent)]
    Malformed(#[from] ScripError),
}

/// Outcome of resolving one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Symbol maps to an upstream instrument.
    Resolved(UpstreamRef),
    /// Symbol skipped; the rest of the batch continues.
    Skipped {
        /// The offending entry, rendered as text.
        symbol: String,
        /// Why it was skipped.
        reason: SkipReason,
    },
}

impl Resolution {
    /// Resolve one request entry.
    pub fn resolve(symbol: &Value, tokens: &TokenNormalizer) -> Self {
        let Some(text) = symbol.as_str() else {
            return Self::Skipped {
                symbol: symbol.to_string(),
                reason: SkipReason::NotAString(symbol.to_string()),
            };
        };

        let instrument = match InstrumentRef::parse(text) {
            Ok(instrument) => instrument,
            Err(e) => {
                return Self::Skipped {
                    symbol: text.to_string(),
                    reason: e.into(),
                };
            }
        };

        match tokens.resolve_upstream(&instrument) {
            Some(upstream) => Self::Resolved(upstream),
            None => Self::Skipped {
                symbol: text.to_string(),
                reason: ScripError::UnknownExchange(instrument.exchange).into(),
            },
        }
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Resolved references of one request, split by upstream call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionBatch {
    /// Index instruments (subscribed with the aggregate flag).
    pub aggregates: Vec<UpstreamRef>,
    /// Everything else.
    pub regular: Vec<UpstreamRef>,
    /// Entries that could not be resolved.
    pub skipped: Vec<(String, SkipReason)>,
}

impl SubscriptionBatch {
    /// Resolve every symbol, preserving request order within each group.
    pub fn resolve(symbols: &[Value], tokens: &TokenNormalizer) -> Self {
        symbols
            .iter()
            .map(|symbol| Resolution::resolve(symbol, tokens))
            .collect()
    }

    /// Whether nothing resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty() && self.regular.is_empty()
    }
}

impl FromIterator<Resolution> for SubscriptionBatch {
    fn from_iter<I: IntoIterator<Item = Resolution>>(iter: I) -> Self {
        let mut batch = Self::default();
        for resolution in iter {
            match resolution {
                Resolution::Resolved(upstream) if upstream.is_aggregate => {
                    batch.aggregates.push(upstream);
                }
                Resolution::Resolved(upstream) => batch.regular.push(upstream),
                Resolution::Skipped { symbol, reason } => batch.skipped.push((symbol, reason)),
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_subscribe_request() {
        let request =
            SubscriptionRequest::parse(r#"{"action":"subscribe","symbols":["NSE|26000"]}"#)
                .unwrap();
        assert_eq!(request.action, SubscriptionAction::Subscribe);
        assert_eq!(request.symbols, vec![json!("NSE|26000")]);
    }

    #[test]
    fn parse_defaults_missing_symbols() {
        let request = SubscriptionRequest::parse(r#"{"action":"unsubscribe"}"#).unwrap();
        assert_eq!(request.action, SubscriptionAction::Unsubscribe);
        assert!(request.symbols.is_empty());
    }

    #[test]
    fn parse_rejects_unknown_action_and_garbage() {
        assert!(SubscriptionRequest::parse(r#"{"action":"snapshot","symbols":[]}"#).is_err());
        assert!(SubscriptionRequest::parse("not json").is_err());
        assert!(SubscriptionRequest::parse(r#"{"symbols":[]}"#).is_err());
    }

    #[test]
    fn batch_partitions_and_skips() {
        let tokens = TokenNormalizer::new();
        let symbols = vec![
            json!("NSE|26000"),
            json!("NSE|11536"),
            json!("garbage"),
            json!("MCX|1"),
            json!(17),
            json!("BSE|1"),
            json!("NFO|43210"),
        ];

        let batch = SubscriptionBatch::resolve(&symbols, &tokens);

        let aggregates: Vec<_> = batch
            .aggregates
            .iter()
            .map(|r| r.instrument_id.as_str())
            .collect();
        let regular: Vec<_> = batch.regular.iter().map(|r| r.scrip()).collect();

        assert_eq!(aggregates, vec!["Nifty 50", "SENSEX"]);
        assert_eq!(regular, vec!["nse_cm|11536", "nse_fo|43210"]);
        assert_eq!(batch.skipped.len(), 3);
        assert!(matches!(
            batch.skipped[1].1,
            SkipReason::Malformed(ScripError::UnknownExchange(_))
        ));
        assert!(matches!(batch.skipped[2].1, SkipReason::NotAString(_)));
    }

    #[test]
    fn all_skipped_batch_is_empty() {
        let tokens = TokenNormalizer::new();
        let batch = SubscriptionBatch::resolve(&[json!("XYZ|1"), json!("nosep")], &tokens);
        assert!(batch.is_empty());
        assert_eq!(batch.skipped.len(), 2);
    }
}
