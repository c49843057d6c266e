//! HTTP Credential Source
//!
//! Fetches the upstream session from the credential endpoint:
//!
//! ```json
//! {"usersession": "...", "sid": "...", "userid": "...",
//!  "baseUrl": "...", "consumerKey": "...", "serverId": "..."}
//! ```
//!
//! An empty `usersession` means the user has not logged in yet and is
//! reported as `Ok(None)`. Fields may be missing or `null`; numeric ids are
//! taken as their decimal text.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::application::ports::{CredentialError, CredentialSource};
use crate::domain::session::SessionCredentials;
use crate::infrastructure::config::CredentialSettings;
use crate::infrastructure::metrics::{self, PollOutcome};

/// Credential endpoint payload. Every field is optional.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialPayload {
    /// Session token.
    #[serde(alias = "token", deserialize_with = "lenient_string")]
    pub usersession: String,
    /// Session id.
    #[serde(deserialize_with = "lenient_string")]
    pub sid: String,
    /// User id.
    #[serde(alias = "userId", deserialize_with = "lenient_string")]
    pub userid: String,
    /// REST base URL.
    #[serde(rename = "baseUrl", deserialize_with = "lenient_string")]
    pub base_url: String,
    /// API consumer key.
    #[serde(rename = "consumerKey", deserialize_with = "lenient_string")]
    pub consumer_key: String,
    /// Feed server id.
    #[serde(rename = "serverId", deserialize_with = "lenient_string")]
    pub server_id: String,
}

/// `null` becomes empty; numbers and booleans become their JSON text.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

impl fmt::Debug for CredentialPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPayload")
            .field("usersession", &"[REDACTED]")
            .field("userid", &self.userid)
            .field("base_url", &self.base_url)
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl CredentialPayload {
    /// Convert to credentials, or `None` when no session token is present.
    #[must_use]
    pub fn into_credentials(self, default_base_url: &str) -> Option<SessionCredentials> {
        if self.usersession.trim().is_empty() {
            return None;
        }
        let base_url = if self.base_url.is_empty() {
            default_base_url.to_string()
        } else {
            self.base_url
        };
        Some(SessionCredentials {
            token: self.usersession,
            sid: self.sid,
            user_id: self.userid,
            base_url,
            consumer_key: self.consumer_key,
            server_id: self.server_id,
        })
    }
}

/// `CredentialSource` backed by a plain HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpCredentialSource {
    client: Client,
    url: String,
    default_base_url: String,
}

impl HttpCredentialSource {
    /// Create a source from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &CredentialSettings) -> Result<Self, CredentialError> {
        Self::with_timeout(
            settings.url.clone(),
            settings.default_base_url.clone(),
            settings.timeout,
        )
    }

    /// Create a source for an explicit endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(
        url: String,
        default_base_url: String,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url,
            default_base_url,
        })
    }

    async fn fetch_payload(&self) -> Result<CredentialPayload, CredentialError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Status(status.as_u16()));
        }

        response
            .json::<CredentialPayload>()
            .await
            .map_err(|e| CredentialError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> Result<Option<SessionCredentials>, CredentialError> {
        let result = self
            .fetch_payload()
            .await
            .map(|payload| payload.into_credentials(&self.default_base_url));

        let outcome = match &result {
            Ok(Some(_)) => PollOutcome::Ready,
            Ok(None) => PollOutcome::Waiting,
            Err(_) => PollOutcome::Failed,
        };
        metrics::record_credential_poll(outcome);

        result
    }
}
