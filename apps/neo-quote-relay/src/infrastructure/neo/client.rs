//! Neo Feed Client
//!
//! Runs the upstream connection on a dedicated OS thread with its own
//! single-threaded runtime. That thread is the only place feed callbacks
//! are invoked from; the relay reaches it through [`NeoSession`], whose
//! commands are queued to the thread and never awaited.
//!
//! The client reconnects on its own and replays every subscription it
//! holds after each reconnect.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::messages::{FeedRequest, join_scrips};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedCallbacks, FeedSession, SessionError, SessionFactory};
use crate::domain::instrument::UpstreamRef;
use crate::domain::session::SessionCredentials;
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Commands
// =============================================================================

/// Work queued from the relay to the feed thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Add instruments.
    Subscribe {
        /// Instruments to add.
        instruments: Vec<UpstreamRef>,
        /// Index subscription.
        aggregate: bool,
    },
    /// Remove instruments.
    Unsubscribe {
        /// Instruments to remove.
        instruments: Vec<UpstreamRef>,
        /// Index subscription.
        aggregate: bool,
    },
}

impl FeedCommand {
    /// The frame that carries this command.
    #[must_use]
    pub fn to_request(&self) -> FeedRequest {
        match self {
            Self::Subscribe {
                instruments,
                aggregate,
            } => FeedRequest::subscription(true, *aggregate, join_scrips(instruments)),
            Self::Unsubscribe {
                instruments,
                aggregate,
            } => FeedRequest::subscription(false, *aggregate, join_scrips(instruments)),
        }
    }
}

// =============================================================================
// Subscription State
// =============================================================================

/// Scrips currently subscribed, replayed after a reconnect.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    regular: BTreeSet<UpstreamRef>,
    aggregates: BTreeSet<UpstreamRef>,
}

impl SubscriptionState {
    /// Record the effect of a command.
    pub fn apply(&mut self, command: &FeedCommand) {
        match command {
            FeedCommand::Subscribe {
                instruments,
                aggregate,
            } => {
                let set = self.set_mut(*aggregate);
                set.extend(instruments.iter().cloned());
            }
            FeedCommand::Unsubscribe {
                instruments,
                aggregate,
            } => {
                let set = self.set_mut(*aggregate);
                for instrument in instruments {
                    set.remove(instrument);
                }
            }
        }
    }

    /// Requests that restore the current subscriptions.
    #[must_use]
    pub fn restore_requests(&self) -> Vec<FeedRequest> {
        [(&self.regular, false), (&self.aggregates, true)]
            .into_iter()
            .filter(|(set, _)| !set.is_empty())
            .map(|(set, aggregate)| FeedRequest::subscription(true, aggregate, join_scrips(set)))
            .collect()
    }

    /// Total subscribed instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regular.len() + self.aggregates.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regular.is_empty() && self.aggregates.is_empty()
    }

    fn set_mut(&mut self, aggregate: bool) -> &mut BTreeSet<UpstreamRef> {
        if aggregate {
            &mut self.aggregates
        } else {
            &mut self.regular
        }
    }
}

// =============================================================================
// Neo Feed Client
// =============================================================================

/// Configuration for one feed connection.
#[derive(Debug, Clone)]
pub struct NeoClientConfig {
    /// Feed WebSocket URL.
    pub url: String,
    /// Credentials sent in the connection frame.
    pub credentials: SessionCredentials,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

/// The feed connection loop. Owned by the feed thread.
pub struct NeoFeedClient {
    config: NeoClientConfig,
    callbacks: Arc<dyn FeedCallbacks>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    subscriptions: SubscriptionState,
    cancel: CancellationToken,
}

impl NeoFeedClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        config: NeoClientConfig,
        callbacks: Arc<dyn FeedCallbacks>,
        commands: mpsc::UnboundedReceiver<FeedCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            callbacks,
            commands,
            subscriptions: SubscriptionState::default(),
            cancel,
        }
    }

    /// Run until cancelled, the session handle is dropped, or reconnection
    /// attempts run out.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` when the policy gives up.
    pub async fn run(mut self) -> Result<(), FeedClientError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Feed client stopped");
                    self.callbacks.on_close(Some("shutdown"));
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection error");
                    metrics::record_feed_error(error_kind(&e));
                    self.callbacks.on_error(&e.to_string());
                    self.callbacks.on_close(Some(&e.to_string()));

                    let Some(delay) = reconnect_policy.next_delay() else {
                        return Err(FeedClientError::MaxReconnectAttemptsExceeded);
                    };

                    let attempt = reconnect_policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );
                    metrics::record_feed_reconnect();

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Feed client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, authenticate, replay subscriptions and pump messages.
    async fn connect_and_run(
        &mut self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to Neo feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let connect = FeedRequest::connect(&self.config.credentials).to_json()?;
        write.send(Message::Text(connect.into())).await?;

        reconnect_policy.reset();
        self.callbacks.on_open(&self.config.url);

        for request in self.subscriptions.restore_requests() {
            tracing::debug!(kind = request.kind(), "Restoring subscriptions");
            write.send(Message::Text(request.to_json()?.into())).await?;
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("Session handle dropped");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    };
                    let request = command.to_request();
                    self.subscriptions.apply(&command);
                    metrics::record_upstream_request(request.kind());
                    write.send(Message::Text(request.to_json()?.into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.deliver(decode_text(&text));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.deliver(decode_text(text)),
                                Err(_) => tracing::debug!(len = data.len(), "Ignoring non-UTF-8 frame"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Feed sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    fn deliver(&self, message: Value) {
        metrics::record_feed_message();
        self.callbacks.on_message(message);
    }
}

/// JSON text becomes its value; anything else arrives as a JSON string.
fn decode_text(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

const fn error_kind(error: &FeedClientError) -> &'static str {
    match error {
        FeedClientError::WebSocket(_) => "websocket",
        FeedClientError::Encode(_) => "encode",
        FeedClientError::ConnectionClosed => "closed",
        FeedClientError::MaxReconnectAttemptsExceeded => "max_reconnects",
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// Relay-side handle to the feed thread.
#[derive(Debug, Clone)]
pub struct NeoSession {
    commands: mpsc::UnboundedSender<FeedCommand>,
}

impl NeoSession {
    /// Wrap a command sender.
    #[must_use]
    pub const fn new(commands: mpsc::UnboundedSender<FeedCommand>) -> Self {
        Self { commands }
    }

    fn send(&self, command: FeedCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

impl FeedSession for NeoSession {
    fn subscribe(&self, instruments: &[UpstreamRef], aggregate: bool) -> Result<(), SessionError> {
        self.send(FeedCommand::Subscribe {
            instruments: instruments.to_vec(),
            aggregate,
        })
    }

    fn unsubscribe(
        &self,
        instruments: &[UpstreamRef],
        aggregate: bool,
    ) -> Result<(), SessionError> {
        self.send(FeedCommand::Unsubscribe {
            instruments: instruments.to_vec(),
            aggregate,
        })
    }
}

// =============================================================================
// Session Factory
// =============================================================================

/// Starts the feed thread for a credential set.
#[derive(Debug, Clone)]
pub struct NeoSessionFactory {
    settings: FeedSettings,
    cancel: CancellationToken,
}

impl NeoSessionFactory {
    /// Create a factory.
    #[must_use]
    pub const fn new(settings: FeedSettings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }
}

impl SessionFactory for NeoSessionFactory {
    fn connect(
        &self,
        credentials: &SessionCredentials,
        callbacks: Arc<dyn FeedCallbacks>,
    ) -> Result<Arc<dyn FeedSession>, SessionError> {
        if credentials.token.is_empty() {
            return Err(SessionError::InvalidCredentials(
                "session token is empty".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::Construction(format!("feed runtime: {e}")))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let client = NeoFeedClient::new(
            NeoClientConfig {
                url: self.settings.url.clone(),
                credentials: credentials.clone(),
                reconnect: ReconnectConfig::from(&self.settings),
            },
            callbacks,
            command_rx,
            self.cancel.clone(),
        );

        std::thread::Builder::new()
            .name("neo-feed".to_string())
            .spawn(move || {
                if let Err(e) = runtime.block_on(client.run()) {
                    tracing::error!(error = %e, "Feed client terminated");
                }
            })
            .map_err(|e| SessionError::Construction(format!("feed thread: {e}")))?;

        tracing::info!(url = %self.settings.url, "Feed thread started");
        Ok(Arc::new(NeoSession::new(command_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::Segment;

    fn upstream(id: &str, segment: Segment, is_aggregate: bool) -> UpstreamRef {
        UpstreamRef {
            instrument_id: id.to_string(),
            segment,
            is_aggregate,
        }
    }

    #[test]
    fn state_tracks_subscribe_and_unsubscribe() {
        let mut state = SubscriptionState::default();
        state.apply(&FeedCommand::Subscribe {
            instruments: vec![
                upstream("11536", Segment::NseCm, false),
                upstream("2885", Segment::NseCm, false),
            ],
            aggregate: false,
        });
        state.apply(&FeedCommand::Subscribe {
            instruments: vec![upstream("Nifty 50", Segment::NseCm, true)],
            aggregate: true,
        });
        state.apply(&FeedCommand::Unsubscribe {
            instruments: vec![upstream("11536", Segment::NseCm, false)],
            aggregate: false,
        });

        assert_eq!(state.len(), 2);
        assert_eq!(
            state.restore_requests(),
            vec![
                FeedRequest::subscription(true, false, "nse_cm|2885".to_string()),
                FeedRequest::subscription(true, true, "nse_cm|Nifty 50".to_string()),
            ]
        );
    }

    #[test]
    fn empty_state_restores_nothing() {
        let state = SubscriptionState::default();
        assert!(state.is_empty());
        assert!(state.restore_requests().is_empty());
    }

    #[test]
    fn non_json_text_becomes_string() {
        assert_eq!(decode_text("connected"), Value::String("connected".to_string()));
        assert_eq!(decode_text(r#"{"tk":"1"}"#), serde_json::json!({"tk": "1"}));
    }

    #[test]
    fn session_reports_closed_thread() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = NeoSession::new(tx);
        drop(rx);

        let result = session.subscribe(&[upstream("1", Segment::NseCm, false)], false);
        assert!(matches!(result, Err(SessionError::Closed)));
    }

    #[test]
    fn session_queues_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = NeoSession::new(tx);

        session
            .unsubscribe(&[upstream("43210", Segment::NseFo, false)], false)
            .unwrap();

        let command = rx.try_recv().unwrap();
        assert_eq!(command.to_request().kind(), "mwu");
    }

    #[test]
    fn factory_rejects_empty_token() {
        struct Ignore;
        impl FeedCallbacks for Ignore {
            fn on_open(&self, _: &str) {}
            fn on_message(&self, _: Value) {}
            fn on_error(&self, _: &str) {}
            fn on_close(&self, _: Option<&str>) {}
        }

        let factory = NeoSessionFactory::new(FeedSettings::default(), CancellationToken::new());
        let credentials = SessionCredentials {
            token: String::new(),
            sid: String::new(),
            user_id: String::new(),
            base_url: String::new(),
            consumer_key: String::new(),
            server_id: String::new(),
        };

        let result = factory.connect(&credentials, Arc::new(Ignore));
        assert!(matches!(result, Err(SessionError::InvalidCredentials(_))));
    }
}
