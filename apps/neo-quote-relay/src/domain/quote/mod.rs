//! Quote Records
//!
//! The upstream feed delivers loosely-typed JSON objects whose field names
//! differ between equities, indices and SDK versions. [`QuoteRecord`] wraps
//! such an object; [`NormalizedQuote`] is the fixed shape sent downstream.
//!
//! # Field Precedence
//!
//! | Downstream | Upstream candidates (first match wins) |
//! |---|---|
//! | `tk` | `tk`, `instrument_token` |
//! | `lp` | `ltp`, `iv`, `last_traded_price`, `lp`, `lastPrice` |
//! | `o` | `op`, `openingPrice`, `open` |
//! | `h` | `h`, `highPrice`, `high_price` |
//! | `l` | `lo`, `lowPrice`, `low_price` |
//! | `c` | `c`, `prev_day_close`, `ic` |
//! | `v` | `v`, `volume` |
//!
//! `tk` and `lp` skip blank values (null, `""`, numeric zero, `false`) and
//! fall through to the next candidate. The remaining fields take the first
//! non-null candidate and default to `"0"`.

use serde::Serialize;
use serde_json::{Map, Value};

/// Instrument key candidates.
pub const KEY_FIELDS: &[&str] = &["tk", "instrument_token"];
/// Last price candidates: trade price, index value, then alternates.
pub const PRICE_FIELDS: &[&str] = &["ltp", "iv", "last_traded_price", "lp", "lastPrice"];
/// Open price candidates.
pub const OPEN_FIELDS: &[&str] = &["op", "openingPrice", "open"];
/// High price candidates.
pub const HIGH_FIELDS: &[&str] = &["h", "highPrice", "high_price"];
/// Low price candidates.
pub const LOW_FIELDS: &[&str] = &["lo", "lowPrice", "low_price"];
/// Previous close candidates.
pub const CLOSE_FIELDS: &[&str] = &["c", "prev_day_close", "ic"];
/// Volume candidates.
pub const VOLUME_FIELDS: &[&str] = &["v", "volume"];

/// Value used for any OHLCV field missing from the record.
pub const DEFAULT_FIELD: &str = "0";

// =============================================================================
// Feed Item
// =============================================================================

/// A single item taken off the distribution queue.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// A structured record that may carry a quote.
    Record(QuoteRecord),
    /// Anything else the feed sent (status strings, numbers, nested lists).
    Status(Value),
}

impl From<Value> for FeedItem {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::Record(QuoteRecord::new(fields)),
            other => Self::Status(other),
        }
    }
}

// =============================================================================
// Quote Record
// =============================================================================

/// An upstream record: field name → scalar, schema not guaranteed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteRecord {
    fields: Map<String, Value>,
}

impl QuoteRecord {
    /// Wrap a JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Raw field access.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Instrument key as the feed sent it.
    #[must_use]
    pub fn instrument_key(&self) -> Option<String> {
        self.first_filled(KEY_FIELDS).map(scalar_to_string)
    }

    /// Last price as a string.
    #[must_use]
    pub fn last_price(&self) -> Option<String> {
        self.first_filled(PRICE_FIELDS).map(scalar_to_string)
    }

    /// First non-blank value among `candidates`.
    fn first_filled(&self, candidates: &[&str]) -> Option<&Value> {
        candidates
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .find(|v| !is_blank(v))
    }

    /// First non-null value among `candidates`, stringified, or `"0"`.
    fn field_or_default(&self, candidates: &[&str]) -> String {
        candidates
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .find(|v| !v.is_null())
            .map_or_else(|| DEFAULT_FIELD.to_string(), scalar_to_string)
    }
}

impl From<Map<String, Value>> for QuoteRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

// =============================================================================
// Normalized Quote
// =============================================================================

/// The quote frame broadcast to every downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedQuote {
    /// Downstream instrument code.
    pub tk: String,
    /// Last price.
    pub lp: String,
    /// Open.
    pub o: String,
    /// High.
    pub h: String,
    /// Low.
    pub l: String,
    /// Previous close.
    pub c: String,
    /// Volume.
    pub v: String,
}

impl NormalizedQuote {
    /// Build a quote from a record.
    ///
    /// `resolve_key` maps the upstream instrument key to the downstream code.
    /// Returns `None` when the record has no usable key or last price.
    pub fn from_record(
        record: &QuoteRecord,
        resolve_key: impl FnOnce(&str) -> String,
    ) -> Option<Self> {
        let key = record.instrument_key()?;
        let lp = record.last_price()?;

        Some(Self {
            tk: resolve_key(&key),
            lp,
            o: record.field_or_default(OPEN_FIELDS),
            h: record.field_or_default(HIGH_FIELDS),
            l: record.field_or_default(LOW_FIELDS),
            c: record.field_or_default(CLOSE_FIELDS),
            v: record.field_or_default(VOLUME_FIELDS),
        })
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Render a scalar the way it should appear downstream.
///
/// Strings are used verbatim; numbers keep their JSON representation.
#[must_use]
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[allow(clippy::float_cmp)]
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn record(value: Value) -> QuoteRecord {
        match FeedItem::from(value) {
            FeedItem::Record(r) => r,
            FeedItem::Status(s) => panic!("expected record, got {s}"),
        }
    }

    fn identity(key: &str) -> String {
        key.to_string()
    }

    #[test]
    fn non_objects_are_status_items() {
        assert!(matches!(FeedItem::from(json!("connected")), FeedItem::Status(_)));
        assert!(matches!(FeedItem::from(json!(42)), FeedItem::Status(_)));
        assert!(matches!(FeedItem::from(json!([1, 2])), FeedItem::Status(_)));
    }

    #[test_case(json!({"tk": "11536", "instrument_token": "999"}), "11536" ; "tk wins")]
    #[test_case(json!({"instrument_token": "999"}), "999" ; "instrument_token fallback")]
    #[test_case(json!({"tk": "", "instrument_token": "999"}), "999" ; "blank tk skipped")]
    #[test_case(json!({"tk": 11536}), "11536" ; "numeric key stringified")]
    fn instrument_key_precedence(value: Value, expected: &str) {
        assert_eq!(record(value).instrument_key().as_deref(), Some(expected));
    }

    #[test_case(json!({"ltp": "101.5", "iv": "200"}), "101.5" ; "ltp first")]
    #[test_case(json!({"iv": "24500.5", "lp": "1"}), "24500.5" ; "index value second")]
    #[test_case(json!({"last_traded_price": 7.25}), "7.25" ; "alternate name")]
    #[test_case(json!({"lp": "3"}), "3" ; "lp")]
    #[test_case(json!({"lastPrice": "4"}), "4" ; "lastPrice last")]
    #[test_case(json!({"ltp": 0, "iv": "12"}), "12" ; "zero trade price falls through")]
    #[test_case(json!({"ltp": 0.0, "iv": "12"}), "12" ; "float zero falls through")]
    #[test_case(json!({"ltp": 1e-20, "iv": "12"}), "1e-20" ; "tiny price kept")]
    fn last_price_precedence(value: Value, expected: &str) {
        assert_eq!(record(value).last_price().as_deref(), Some(expected));
    }

    #[test]
    fn missing_key_or_price_yields_nothing() {
        let no_key = record(json!({"ltp": "10"}));
        assert!(NormalizedQuote::from_record(&no_key, identity).is_none());

        let no_price = record(json!({"tk": "11536", "v": "100"}));
        assert!(NormalizedQuote::from_record(&no_price, identity).is_none());

        let neither = record(json!({"name": "x"}));
        assert!(NormalizedQuote::from_record(&neither, identity).is_none());
    }

    #[test]
    fn absent_fields_default_to_zero() {
        let quote = NormalizedQuote::from_record(&record(json!({"tk": "1", "ltp": "5"})), identity)
            .unwrap();

        assert_eq!(quote.o, "0");
        assert_eq!(quote.h, "0");
        assert_eq!(quote.l, "0");
        assert_eq!(quote.c, "0");
        assert_eq!(quote.v, "0");
    }

    #[test]
    fn equity_field_names() {
        let quote = NormalizedQuote::from_record(
            &record(json!({
                "tk": "11536", "ltp": "3450.10", "op": "3400", "h": "3460.5",
                "lo": "3390", "c": "3410", "v": 120_000
            })),
            identity,
        )
        .unwrap();

        assert_eq!(
            quote,
            NormalizedQuote {
                tk: "11536".to_string(),
                lp: "3450.10".to_string(),
                o: "3400".to_string(),
                h: "3460.5".to_string(),
                l: "3390".to_string(),
                c: "3410".to_string(),
                v: "120000".to_string(),
            }
        );
    }

    #[test]
    fn index_field_names() {
        let quote = NormalizedQuote::from_record(
            &record(json!({
                "tk": "Nifty 50", "iv": "24500.5", "openingPrice": 24400.0,
                "highPrice": "24550", "lowPrice": "24380", "ic": "24410.2"
            })),
            identity,
        )
        .unwrap();

        assert_eq!(quote.lp, "24500.5");
        assert_eq!(quote.o, "24400.0");
        assert_eq!(quote.h, "24550");
        assert_eq!(quote.l, "24380");
        assert_eq!(quote.c, "24410.2");
        assert_eq!(quote.v, "0");
    }

    #[test]
    fn null_ohlc_field_falls_through() {
        let quote = NormalizedQuote::from_record(
            &record(json!({"tk": "1", "ltp": "5", "op": null, "open": "4.5"})),
            identity,
        )
        .unwrap();
        assert_eq!(quote.o, "4.5");
    }

    #[test]
    fn key_resolver_applied() {
        let quote = NormalizedQuote::from_record(
            &record(json!({"tk": "Nifty 50", "iv": "24500.5"})),
            |_| "26000".to_string(),
        )
        .unwrap();
        assert_eq!(quote.tk, "26000");
    }

    #[test]
    fn wire_format() {
        let quote = NormalizedQuote {
            tk: "26000".to_string(),
            lp: "24500.5".to_string(),
            o: "0".to_string(),
            h: "0".to_string(),
            l: "0".to_string(),
            c: "0".to_string(),
            v: "0".to_string(),
        };
        let decoded: Value = serde_json::from_str(&quote.to_json().unwrap()).unwrap();
        assert_eq!(
            decoded,
            json!({"tk": "26000", "lp": "24500.5", "o": "0", "h": "0", "l": "0", "c": "0", "v": "0"})
        );
    }
}
