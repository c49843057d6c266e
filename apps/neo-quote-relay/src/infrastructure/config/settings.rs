//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Unparseable values fall back to the default for that setting. Intervals
//! must be positive, so a zero interval also falls back.

use std::time::Duration;

/// Downstream and health server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Downstream WebSocket bind host.
    pub ws_host: String,
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 8767,
            health_port: 8087,
        }
    }
}

impl ServerSettings {
    /// `host:port` for the downstream listener.
    #[must_use]
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    /// Whether the health server should run.
    #[must_use]
    pub const fn health_enabled(&self) -> bool {
        self.health_port != 0
    }
}

/// Credential endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSettings {
    /// Endpoint returning the upstream session payload.
    pub url: String,
    /// Timeout for a single fetch.
    pub timeout: Duration,
    /// Interval between polls.
    pub poll_interval: Duration,
    /// `baseUrl` used when the payload leaves it empty.
    pub default_base_url: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/kotakneo/websocketData".to_string(),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            default_base_url: "https://mis.kotaksecurities.com".to_string(),
        }
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Feed WebSocket endpoint.
    pub url: String,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "wss://mlhsm.kotaksecurities.com".to_string(),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Broadcast loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Pause after a failure caught at the loop boundary.
    pub error_pause: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            error_pause: Duration::from_millis(100),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelayConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Credential endpoint settings.
    pub credentials: CredentialSettings,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Broadcast loop settings.
    pub broadcast: BroadcastSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is set to an empty value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is set to an empty value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvLookup(lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            ws_host: env.string("RELAY_WS_HOST", defaults.server.ws_host),
            ws_port: env.parse("RELAY_WS_PORT", defaults.server.ws_port),
            health_port: env.parse("RELAY_HEALTH_PORT", defaults.server.health_port),
        };

        let credentials = CredentialSettings {
            url: env.required_url("NEO_CREDENTIALS_URL", defaults.credentials.url)?,
            timeout: env.duration_millis("NEO_CREDENTIALS_TIMEOUT_MS", defaults.credentials.timeout),
            poll_interval: env.duration_secs(
                "NEO_CREDENTIALS_POLL_SECS",
                defaults.credentials.poll_interval,
            ),
            default_base_url: env
                .required_url("NEO_DEFAULT_BASE_URL", defaults.credentials.default_base_url)?,
        };

        let feed = FeedSettings {
            url: env.required_url("NEO_FEED_URL", defaults.feed.url)?,
            reconnect_delay_initial: env.duration_millis(
                "NEO_RECONNECT_DELAY_INITIAL_MS",
                defaults.feed.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "NEO_RECONNECT_DELAY_MAX_SECS",
                defaults.feed.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "NEO_RECONNECT_DELAY_MULTIPLIER",
                defaults.feed.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "NEO_MAX_RECONNECT_ATTEMPTS",
                defaults.feed.max_reconnect_attempts,
            ),
        };

        let broadcast = BroadcastSettings {
            error_pause: env.duration_millis("RELAY_ERROR_PAUSE_MS", defaults.broadcast.error_pause),
        };

        Ok(Self {
            server,
            credentials,
            feed,
            broadcast,
        })
    }

    /// Replace the downstream port, e.g. from the command line.
    #[must_use]
    pub fn with_ws_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.server.ws_port = port;
        }
        self
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct EnvLookup<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvLookup<F> {
    fn string(&self, key: &str, default: String) -> String {
        (self.0)(key).unwrap_or(default)
    }

    fn required_url(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match (self.0)(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(value.trim().to_string()),
            None => Ok(default),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.server.ws_addr(), "0.0.0.0:8767");
        assert!(config.server.health_enabled());
        assert_eq!(config.credentials.timeout, Duration::from_secs(5));
        assert_eq!(config.credentials.poll_interval, Duration::from_secs(5));
        assert_eq!(config.broadcast.error_pause, Duration::from_millis(100));
    }

    #[test]
    fn overrides_applied() {
        let config = config_from(&[
            ("RELAY_WS_HOST", "127.0.0.1"),
            ("RELAY_WS_PORT", "9000"),
            ("RELAY_HEALTH_PORT", "0"),
            ("NEO_CREDENTIALS_URL", "http://auth:8080/kotakneo/websocketData"),
            ("NEO_CREDENTIALS_POLL_SECS", "2"),
            ("NEO_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("RELAY_ERROR_PAUSE_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.server.ws_addr(), "127.0.0.1:9000");
        assert!(!config.server.health_enabled());
        assert_eq!(
            config.credentials.url,
            "http://auth:8080/kotakneo/websocketData"
        );
        assert_eq!(config.credentials.poll_interval, Duration::from_secs(2));
        assert!((config.feed.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.broadcast.error_pause, Duration::from_millis(250));
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = config_from(&[
            ("RELAY_WS_PORT", "not-a-port"),
            ("NEO_CREDENTIALS_TIMEOUT_MS", "-1"),
        ])
        .unwrap();

        assert_eq!(config.server.ws_port, 8767);
        assert_eq!(config.credentials.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_intervals_fall_back() {
        let config = config_from(&[
            ("NEO_CREDENTIALS_POLL_SECS", "0"),
            ("NEO_CREDENTIALS_TIMEOUT_MS", "0"),
            ("RELAY_ERROR_PAUSE_MS", "0"),
        ])
        .unwrap();

        assert_eq!(config.credentials.poll_interval, Duration::from_secs(5));
        assert_eq!(config.credentials.timeout, Duration::from_secs(5));
        assert_eq!(config.broadcast.error_pause, Duration::from_millis(100));
    }

    #[test]
    fn empty_url_rejected() {
        let err = config_from(&[("NEO_FEED_URL", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref key) if key == "NEO_FEED_URL"));
    }

    #[test]
    fn cli_port_override() {
        let config = RelayConfig::default().with_ws_port(Some(9100));
        assert_eq!(config.server.ws_port, 9100);

        let config = RelayConfig::default().with_ws_port(None);
        assert_eq!(config.server.ws_port, 8767);
    }

    #[test]
    fn feed_settings_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(settings.max_reconnect_attempts, 0);
    }
}
