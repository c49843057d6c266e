//! Token Normalization
//!
//! Bridges the downstream naming scheme (`EXCHANGE|CODE`) and the upstream one
//! (`segment` + token). Most instruments pass through with their numeric code.
//! Index instruments are the exception: the feed identifies them by display
//! name, so `NSE|26000` is subscribed as `nse_cm|Nifty 50` and its quotes come
//! back keyed `Nifty 50` (or `NIFTY 50`, depending on the feed version).
//!
//! # Token Map
//!
//! Resolving an aggregate records `display name → original code` (plus the
//! uppercase form and known alias spellings). The map is append-only for the
//! lifetime of the process; unsubscribing never removes entries.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::instrument::{Exchange, InstrumentRef, Segment, UpstreamRef};

// =============================================================================
// Aggregate Table
// =============================================================================

/// An index instrument whose upstream identifier is a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateInstrument {
    /// Segment the index is listed in.
    pub segment: Segment,
    /// Downstream instrument code.
    pub code: &'static str,
    /// Upstream identifier.
    pub display_name: &'static str,
    /// Additional spellings the feed has been seen to use.
    pub aliases: &'static [&'static str],
}

/// Known aggregate instruments.
pub const AGGREGATES: &[AggregateInstrument] = &[
    AggregateInstrument {
        segment: Segment::NseCm,
        code: "26000",
        display_name: "Nifty 50",
        aliases: &[],
    },
    AggregateInstrument {
        segment: Segment::NseCm,
        code: "26009",
        display_name: "Nifty Bank",
        aliases: &["NIFTY BANK"],
    },
    AggregateInstrument {
        segment: Segment::NseCm,
        code: "26037",
        display_name: "Nifty Fin Service",
        aliases: &["NIFTY FIN SERVICE"],
    },
    AggregateInstrument {
        segment: Segment::NseCm,
        code: "26001",
        display_name: "Nifty Next 50",
        aliases: &[],
    },
    AggregateInstrument {
        segment: Segment::NseCm,
        code: "26034",
        display_name: "NIFTY MIDCAP 100",
        aliases: &[],
    },
    AggregateInstrument {
        segment: Segment::NseCm,
        code: "26074",
        display_name: "NIFTY MID SELECT",
        aliases: &[],
    },
    AggregateInstrument {
        segment: Segment::BseCm,
        code: "1",
        display_name: "SENSEX",
        aliases: &[],
    },
    AggregateInstrument {
        segment: Segment::BseCm,
        code: "12",
        display_name: "BANKEX",
        aliases: &[],
    },
];

/// Find the aggregate entry for a segment and downstream code.
#[must_use]
pub fn find_aggregate(segment: Segment, code: &str) -> Option<&'static AggregateInstrument> {
    AGGREGATES
        .iter()
        .find(|a| a.segment == segment && a.code == code)
}

// =============================================================================
// Token Normalizer
// =============================================================================

/// Bidirectional mapping between downstream codes and upstream identifiers.
#[derive(Debug, Default)]
pub struct TokenNormalizer {
    reverse: RwLock<HashMap<String, String>>,
}

impl TokenNormalizer {
    /// Create a normalizer with an empty token map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a downstream exchange code to its upstream segment.
    #[must_use]
    pub fn resolve_segment(exchange_code: &str) -> Option<Segment> {
        Exchange::from_code(exchange_code).map(Exchange::segment)
    }

    /// Resolve a downstream reference to its upstream form.
    ///
    /// Returns `None` for unknown exchanges. Resolving an aggregate registers
    /// its reverse mappings as a side effect.
    pub fn resolve_upstream(&self, instrument: &InstrumentRef) -> Option<UpstreamRef> {
        let segment = Self::resolve_segment(&instrument.exchange)?;

        let Some(aggregate) = find_aggregate(segment, &instrument.code) else {
            return Some(UpstreamRef {
                instrument_id: instrument.code.clone(),
                segment,
                is_aggregate: false,
            });
        };

        self.register(aggregate);

        Some(UpstreamRef {
            instrument_id: aggregate.display_name.to_string(),
            segment,
            is_aggregate: true,
        })
    }

    /// Map an upstream identifier back to the downstream code.
    ///
    /// Tries the identifier as given, then uppercased. Unknown identifiers
    /// are returned unchanged.
    #[must_use]
    pub fn reverse_lookup(&self, upstream_id: &str) -> String {
        let map = self.reverse.read();
        map.get(upstream_id)
            .or_else(|| map.get(&upstream_id.to_uppercase()))
            .cloned()
            .unwrap_or_else(|| upstream_id.to_string())
    }

    /// Whether an upstream identifier has a reverse mapping.
    #[must_use]
    pub fn is_mapped(&self, upstream_id: &str) -> bool {
        let map = self.reverse.read();
        map.contains_key(upstream_id) || map.contains_key(&upstream_id.to_uppercase())
    }

    /// Number of entries in the token map.
    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.reverse.read().len()
    }

    fn register(&self, aggregate: &AggregateInstrument) {
        let upper = aggregate.display_name.to_uppercase();
        let keys = std::iter::once(aggregate.display_name)
            .chain(std::iter::once(upper.as_str()))
            .chain(aggregate.aliases.iter().copied());

        let mut map = self.reverse.write();
        for key in keys {
            let existing = map
                .entry(key.to_string())
                .or_insert_with(|| aggregate.code.to_string());
            if existing != aggregate.code {
                tracing::warn!(
                    upstream_id = key,
                    mapped = %existing,
                    rejected = aggregate.code,
                    "Conflicting token mapping ignored"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn scrip(s: &str) -> InstrumentRef {
        InstrumentRef::parse(s).unwrap()
    }

    #[test]
    fn regular_code_passes_through() {
        let normalizer = TokenNormalizer::new();
        let resolved = normalizer.resolve_upstream(&scrip("NFO|43210")).unwrap();

        assert_eq!(resolved.instrument_id, "43210");
        assert_eq!(resolved.segment, Segment::NseFo);
        assert!(!resolved.is_aggregate);
        assert_eq!(normalizer.mapped_count(), 0);
    }

    #[test]
    fn unknown_exchange_resolves_to_none() {
        let normalizer = TokenNormalizer::new();
        assert!(normalizer.resolve_upstream(&scrip("MCX|234")).is_none());
    }

    #[test]
    fn nifty_resolves_to_display_name_and_registers() {
        let normalizer = TokenNormalizer::new();
        let resolved = normalizer.resolve_upstream(&scrip("NSE|26000")).unwrap();

        assert_eq!(resolved.instrument_id, "Nifty 50");
        assert_eq!(resolved.segment, Segment::NseCm);
        assert!(resolved.is_aggregate);

        assert_eq!(normalizer.reverse_lookup("Nifty 50"), "26000");
        assert_eq!(normalizer.reverse_lookup("NIFTY 50"), "26000");
    }

    #[test]
    fn index_codes_are_per_segment() {
        let normalizer = TokenNormalizer::new();

        // "1" is SENSEX on BSE but an ordinary token on NSE.
        let nse = normalizer.resolve_upstream(&scrip("NSE|1")).unwrap();
        assert!(!nse.is_aggregate);

        let bse = normalizer.resolve_upstream(&scrip("BSE|1")).unwrap();
        assert!(bse.is_aggregate);
        assert_eq!(bse.instrument_id, "SENSEX");
    }

    #[test]
    fn alias_spellings_registered() {
        let normalizer = TokenNormalizer::new();
        normalizer.resolve_upstream(&scrip("NSE|26037"));

        assert_eq!(normalizer.reverse_lookup("Nifty Fin Service"), "26037");
        assert_eq!(normalizer.reverse_lookup("NIFTY FIN SERVICE"), "26037");
    }

    #[test]
    fn lowercase_lookup_falls_back_to_uppercase_key() {
        let normalizer = TokenNormalizer::new();
        normalizer.resolve_upstream(&scrip("BSE|12"));

        assert_eq!(normalizer.reverse_lookup("bankex"), "12");
    }

    #[test]
    fn unmapped_identifier_passes_through() {
        let normalizer = TokenNormalizer::new();
        assert_eq!(normalizer.reverse_lookup("Nifty 50"), "Nifty 50");
        assert_eq!(normalizer.reverse_lookup("11536"), "11536");
    }

    #[test]
    fn repeated_resolution_does_not_grow_map() {
        let normalizer = TokenNormalizer::new();
        normalizer.resolve_upstream(&scrip("NSE|26009"));
        let count = normalizer.mapped_count();

        normalizer.resolve_upstream(&scrip("NSE|26009"));
        assert_eq!(normalizer.mapped_count(), count);
    }

    #[test]
    fn every_aggregate_has_unique_display_name() {
        for (i, a) in AGGREGATES.iter().enumerate() {
            for b in &AGGREGATES[i + 1..] {
                assert_ne!(a.display_name.to_uppercase(), b.display_name.to_uppercase());
            }
        }
    }

    proptest! {
        #[test]
        fn known_exchanges_always_resolve(
            exchange in prop::sample::select(vec!["NSE", "NFO", "BSE", "BFO"]),
            code in "[0-9A-Za-z]{1,8}",
        ) {
            let normalizer = TokenNormalizer::new();
            let instrument = InstrumentRef { exchange: exchange.to_string(), code };
            prop_assert!(normalizer.resolve_upstream(&instrument).is_some());
        }

        #[test]
        fn unknown_exchanges_never_resolve(
            exchange in "[A-Z]{2,4}".prop_filter("known", |e| Exchange::from_code(e).is_none()),
            code in "[0-9]{1,6}",
        ) {
            let normalizer = TokenNormalizer::new();
            let instrument = InstrumentRef { exchange, code };
            prop_assert!(normalizer.resolve_upstream(&instrument).is_none());
        }

        #[test]
        fn reverse_lookup_is_idempotent(id in "[ -~]{0,16}") {
            let normalizer = TokenNormalizer::new();
            for aggregate in AGGREGATES {
                normalizer.register(aggregate);
            }
            let first = normalizer.reverse_lookup(&id);
            let second = normalizer.reverse_lookup(&id);
            prop_assert_eq!(first, second);
        }
    }
}
