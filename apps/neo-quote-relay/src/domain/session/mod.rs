//! Upstream Session Types
//!
//! Credentials handed out by the credential endpoint and the lifecycle of
//! the single upstream session.

use std::fmt;

use serde::Serialize;

/// Lifecycle of the upstream session.
///
/// `AwaitingCredentials → Connecting → Connected`. A failed connection
/// attempt returns to `AwaitingCredentials`; `Connected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Polling the credential endpoint.
    #[default]
    AwaitingCredentials,
    /// Credentials received, constructing the session.
    Connecting,
    /// Session established.
    Connected,
}

impl SessionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingCredentials => "awaiting_credentials",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Whether the session is up.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for the upstream feed.
///
/// Only `token` is required; the rest may be empty strings.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Session token. Never empty.
    pub token: String,
    /// Session id.
    pub sid: String,
    /// Account user id.
    pub user_id: String,
    /// REST base URL.
    pub base_url: String,
    /// API consumer key.
    pub consumer_key: String,
    /// Feed server id.
    pub server_id: String,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("token", &"[REDACTED]")
            .field("sid", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("base_url", &self.base_url)
            .field("consumer_key", &"[REDACTED]")
            .field("server_id", &self.server_id)
            .finish()
    }
}
