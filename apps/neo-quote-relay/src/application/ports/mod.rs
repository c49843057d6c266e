//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CredentialSource`: where upstream credentials come from
//! - `SessionFactory` / `FeedSession`: the upstream feed integration
//! - `SubscriberSink`: one downstream connection
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedCallbacks`: invoked by the feed integration from its own thread

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::instrument::UpstreamRef;
use crate::domain::session::SessionCredentials;

// =============================================================================
// Errors
// =============================================================================

/// Failure fetching credentials.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// Request could not be sent or timed out.
    #[error("credential request failed: {0}")]
    Request(String),
    /// Endpoint answered with a non-success status.
    #[error("credential endpoint returned HTTP {0}")]
    Status(u16),
    /// Body was not the expected JSON.
    #[error("invalid credential payload: {0}")]
    Decode(String),
}

/// Failure creating or driving the upstream session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Credentials rejected before connecting.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    /// The session could not be constructed.
    #[error("session construction failed: {0}")]
    Construction(String),
    /// A session is already installed.
    #[error("upstream session already established")]
    AlreadyConnected,
    /// The session has shut down and accepts no more commands.
    #[error("upstream session closed")]
    Closed,
}

/// Failure delivering a frame to one subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The connection is closed or closing.
    #[error("subscriber connection closed")]
    Closed,
    /// Transport-level failure.
    #[error("delivery failed: {0}")]
    Transport(String),
}

// =============================================================================
// Credential Source
// =============================================================================

/// Source of upstream credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch the current credentials.
    ///
    /// `Ok(None)` means the source answered but no session token is
    /// available yet.
    async fn fetch(&self) -> Result<Option<SessionCredentials>, CredentialError>;
}

// =============================================================================
// Upstream Feed
// =============================================================================

/// Callbacks the feed integration invokes, from its own thread.
///
/// Implementations must not block and must not panic.
pub trait FeedCallbacks: Send + Sync {
    /// Connection to the feed opened.
    fn on_open(&self, info: &str);
    /// A message arrived. The shape is whatever the feed sent.
    fn on_message(&self, message: Value);
    /// The feed reported an error.
    fn on_error(&self, error: &str);
    /// Connection to the feed closed.
    fn on_close(&self, reason: Option<&str>);
}

/// An established upstream session.
///
/// Calls are fire-and-forget: `Ok` means the command was handed to the
/// feed, not that the feed acknowledged it.
pub trait FeedSession: Send + Sync {
    /// Subscribe to instruments. `aggregate` selects the index subscription call.
    ///
    /// # Errors
    ///
    /// Returns an error if the session no longer accepts commands.
    fn subscribe(&self, instruments: &[UpstreamRef], aggregate: bool) -> Result<(), SessionError>;

    /// Unsubscribe from instruments.
    ///
    /// # Errors
    ///
    /// Returns an error if the session no longer accepts commands.
    fn unsubscribe(&self, instruments: &[UpstreamRef], aggregate: bool)
    -> Result<(), SessionError>;
}

/// Builds the upstream session from credentials.
pub trait SessionFactory: Send + Sync {
    /// Construct a session and bind its callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be constructed.
    fn connect(
        &self,
        credentials: &SessionCredentials,
        callbacks: Arc<dyn FeedCallbacks>,
    ) -> Result<Arc<dyn FeedSession>, SessionError>;
}

// =============================================================================
// Downstream
// =============================================================================

/// Outbound half of one downstream connection.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    /// Send a text frame.
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError>;
}
