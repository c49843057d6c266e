//! Neo Feed Frames
//!
//! Outbound requests understood by the Neo market-data socket.
//!
//! ```json
//! {"type":"cn","Authorization":"<token>","Sid":"<sid>","source":"API"}
//! {"type":"mws","scrips":"nse_cm|11536&nse_cm|1594","channelnum":1}
//! {"type":"ifs","scrips":"nse_cm|Nifty 50","channelnum":1}
//! ```
//!
//! `mws`/`mwu` subscribe and unsubscribe regular scrips; `ifs`/`ifu` do the
//! same for indices.

use serde::Serialize;

use crate::domain::instrument::UpstreamRef;
use crate::domain::session::SessionCredentials;

/// Channel every subscription is placed on.
pub const DEFAULT_CHANNEL: u8 = 1;

/// Separator between scrips in one request.
pub const SCRIP_LIST_SEPARATOR: &str = "&";

/// A request frame sent to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum FeedRequest {
    /// Authenticate the socket.
    #[serde(rename = "cn")]
    Connect {
        /// Session token.
        #[serde(rename = "Authorization")]
        authorization: String,
        /// Session id.
        #[serde(rename = "Sid")]
        sid: String,
        /// Client source tag.
        source: &'static str,
    },
    /// Subscribe regular scrips.
    #[serde(rename = "mws")]
    SubscribeScrips {
        /// `seg|id&seg|id`.
        scrips: String,
        /// Channel number.
        channelnum: u8,
    },
    /// Unsubscribe regular scrips.
    #[serde(rename = "mwu")]
    UnsubscribeScrips {
        /// `seg|id&seg|id`.
        scrips: String,
        /// Channel number.
        channelnum: u8,
    },
    /// Subscribe indices.
    #[serde(rename = "ifs")]
    SubscribeIndices {
        /// `seg|name&seg|name`.
        scrips: String,
        /// Channel number.
        channelnum: u8,
    },
    /// Unsubscribe indices.
    #[serde(rename = "ifu")]
    UnsubscribeIndices {
        /// `seg|name&seg|name`.
        scrips: String,
        /// Channel number.
        channelnum: u8,
    },
}

impl FeedRequest {
    /// Connection frame for a credential set.
    #[must_use]
    pub fn connect(credentials: &SessionCredentials) -> Self {
        Self::Connect {
            authorization: credentials.token.clone(),
            sid: credentials.sid.clone(),
            source: "API",
        }
    }

    /// Subscription frame for already-joined scrips.
    #[must_use]
    pub fn subscription(subscribe: bool, aggregate: bool, scrips: String) -> Self {
        let channelnum = DEFAULT_CHANNEL;
        match (subscribe, aggregate) {
            (true, false) => Self::SubscribeScrips { scrips, channelnum },
            (false, false) => Self::UnsubscribeScrips { scrips, channelnum },
            (true, true) => Self::SubscribeIndices { scrips, channelnum },
            (false, true) => Self::UnsubscribeIndices { scrips, channelnum },
        }
    }

    /// Frame type tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "cn",
            Self::SubscribeScrips { .. } => "mws",
            Self::UnsubscribeScrips { .. } => "mwu",
            Self::SubscribeIndices { .. } => "ifs",
            Self::UnsubscribeIndices { .. } => "ifu",
        }
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Join instruments into the feed's scrip list format.
#[must_use]
pub fn join_scrips<'a>(instruments: impl IntoIterator<Item = &'a UpstreamRef>) -> String {
    instruments
        .into_iter()
        .map(UpstreamRef::scrip)
        .collect::<Vec<_>>()
        .join(SCRIP_LIST_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::domain::instrument::Segment;

    fn encoded(request: &FeedRequest) -> Value {
        serde_json::from_str(&request.to_json().unwrap()).unwrap()
    }

    #[test]
    fn connect_frame() {
        let credentials = SessionCredentials {
            token: "tok".to_string(),
            sid: "sid-1".to_string(),
            user_id: String::new(),
            base_url: String::new(),
            consumer_key: String::new(),
            server_id: String::new(),
        };
        assert_eq!(
            encoded(&FeedRequest::connect(&credentials)),
            json!({"type": "cn", "Authorization": "tok", "Sid": "sid-1", "source": "API"})
        );
    }

    #[test]
    fn subscription_frame_kinds() {
        let kinds: Vec<_> = [(true, false), (false, false), (true, true), (false, true)]
            .into_iter()
            .map(|(sub, agg)| FeedRequest::subscription(sub, agg, String::new()).kind())
            .collect();
        assert_eq!(kinds, ["mws", "mwu", "ifs", "ifu"]);
    }

    #[test]
    fn scrips_joined_with_ampersand() {
        let instruments = [
            UpstreamRef {
                instrument_id: "11536".to_string(),
                segment: Segment::NseCm,
                is_aggregate: false,
            },
            UpstreamRef {
                instrument_id: "43210".to_string(),
                segment: Segment::NseFo,
                is_aggregate: false,
            },
        ];
        let request = FeedRequest::subscription(true, false, join_scrips(&instruments));
        assert_eq!(
            encoded(&request),
            json!({"type": "mws", "scrips": "nse_cm|11536&nse_fo|43210", "channelnum": 1})
        );
    }
}
