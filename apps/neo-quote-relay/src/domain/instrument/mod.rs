//! Instrument References
//!
//! Downstream clients name instruments as `"EXCHANGE|CODE"` (e.g. `NSE|26000`).
//! The upstream feed names them by segment and token (e.g. `nse_cm` /
//! `Nifty 50`). This module holds both shapes and the exchange → segment table.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Separator between exchange and code in a downstream scrip string.
pub const SCRIP_SEPARATOR: char = '|';

// =============================================================================
// Exchange
// =============================================================================

/// Exchanges accepted from downstream clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// NSE cash market.
    Nse,
    /// NSE futures and options.
    Nfo,
    /// BSE cash market.
    Bse,
    /// BSE futures and options.
    Bfo,
}

impl Exchange {
    /// Parse an exchange code as sent by downstream clients.
    ///
    /// Codes are matched exactly (`"NSE"`, not `"nse"`).
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NSE" => Some(Self::Nse),
            "NFO" => Some(Self::Nfo),
            "BSE" => Some(Self::Bse),
            "BFO" => Some(Self::Bfo),
            _ => None,
        }
    }

    /// Downstream exchange code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Nfo => "NFO",
            Self::Bse => "BSE",
            Self::Bfo => "BFO",
        }
    }

    /// Upstream segment name for this exchange.
    #[must_use]
    pub const fn segment(self) -> Segment {
        match self {
            Self::Nse => Segment::NseCm,
            Self::Nfo => Segment::NseFo,
            Self::Bse => Segment::BseCm,
            Self::Bfo => Segment::BseFo,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Segment
// =============================================================================

/// Upstream exchange segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Segment {
    /// `nse_cm`
    #[serde(rename = "nse_cm")]
    NseCm,
    /// `nse_fo`
    #[serde(rename = "nse_fo")]
    NseFo,
    /// `bse_cm`
    #[serde(rename = "bse_cm")]
    BseCm,
    /// `bse_fo`
    #[serde(rename = "bse_fo")]
    BseFo,
}

impl Segment {
    /// Segment name as the upstream feed spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NseCm => "nse_cm",
            Self::NseFo => "nse_fo",
            Self::BseCm => "bse_cm",
            Self::BseFo => "bse_fo",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// References
// =============================================================================

/// Why a downstream scrip string could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScripError {
    /// No `|` between exchange and code.
    #[error("missing '|' separator in {0:?}")]
    MissingSeparator(String),
    /// More than one `|`.
    #[error("too many '|' separators in {0:?}")]
    ExtraSeparator(String),
    /// Empty instrument code.
    #[error("empty instrument code in {0:?}")]
    EmptyCode(String),
    /// Exchange code not in the segment table.
    #[error("unknown exchange {0:?}")]
    UnknownExchange(String),
}

/// A downstream instrument reference: exchange code plus instrument code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentRef {
    /// Exchange code exactly as the client sent it.
    pub exchange: String,
    /// Instrument code (numeric token for most instruments).
    pub code: String,
}

impl InstrumentRef {
    /// Split a `"EXCHANGE|CODE"` string.
    ///
    /// The exchange is not validated here; see
    /// [`TokenNormalizer::resolve_upstream`](crate::domain::token::TokenNormalizer::resolve_upstream).
    ///
    /// # Errors
    ///
    /// Returns an error if the separator is missing or repeated, or the code is empty.
    pub fn parse(scrip: &str) -> Result<Self, ScripError> {
        let Some((exchange, code)) = scrip.split_once(SCRIP_SEPARATOR) else {
            return Err(ScripError::MissingSeparator(scrip.to_string()));
        };

        if code.contains(SCRIP_SEPARATOR) {
            return Err(ScripError::ExtraSeparator(scrip.to_string()));
        }

        if code.is_empty() {
            return Err(ScripError::EmptyCode(scrip.to_string()));
        }

        Ok(Self {
            exchange: exchange.to_string(),
            code: code.to_string(),
        })
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SCRIP_SEPARATOR}{}", self.exchange, self.code)
    }
}

/// An upstream instrument reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UpstreamRef {
    /// Upstream identifier: the downstream code, or a display name for aggregates.
    #[serde(rename = "instrument_token")]
    pub instrument_id: String,
    /// Upstream segment.
    #[serde(rename = "exchange_segment")]
    pub segment: Segment,
    /// Whether this is an aggregate (index) instrument.
    #[serde(skip)]
    pub is_aggregate: bool,
}

impl UpstreamRef {
    /// `segment|id` form used in feed subscription frames.
    #[must_use]
    pub fn scrip(&self) -> String {
        format!("{}{SCRIP_SEPARATOR}{}", self.segment, self.instrument_id)
    }
}
