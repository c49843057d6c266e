//! Relay Context
//!
//! The state shared by the broadcast loop, connection handlers and the
//! session bootstrapper. Built once by the composition root and handed to
//! each component as an `Arc<RelayContext>`; there are no globals.

mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;

pub use registry::{SubscriberId, SubscriberRegistry};

use super::ports::{FeedSession, SessionError};
use crate::domain::session::SessionState;
use crate::domain::token::TokenNormalizer;

// =============================================================================
// Session Slot
// =============================================================================

/// Holds the single upstream session.
///
/// The session is installed at most once per process.
#[derive(Default)]
pub struct SessionSlot {
    state: RwLock<SessionState>,
    session: OnceLock<Arc<dyn FeedSession>>,
}

impl SessionSlot {
    /// Create an empty slot in `AwaitingCredentials`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move between the pre-connection states.
    ///
    /// Ignored once the session is connected.
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        if !current.is_connected() {
            *current = state;
        }
    }

    /// The installed session, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn FeedSession>> {
        self.session.get().cloned()
    }

    /// Install the session and mark the slot connected.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyConnected` if a session was installed
    /// before.
    pub fn install(&self, session: Arc<dyn FeedSession>) -> Result<(), SessionError> {
        self.session
            .set(session)
            .map_err(|_| SessionError::AlreadyConnected)?;
        *self.state.write() = SessionState::Connected;
        Ok(())
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("state", &self.state())
            .field("installed", &self.session.get().is_some())
            .finish()
    }
}

// =============================================================================
// Relay Statistics
// =============================================================================

/// Process-wide counters, reported by the health endpoint.
#[derive(Debug, Default)]
pub struct RelayStats {
    records_received: AtomicU64,
    quotes_broadcast: AtomicU64,
    records_discarded: AtomicU64,
    delivery_failures: AtomicU64,
    loop_errors: AtomicU64,
    requests_dropped: AtomicU64,
    upstream_calls: AtomicU64,
    credential_polls: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Items taken off the distribution queue.
    pub records_received: u64,
    /// Quotes serialized and fanned out.
    pub quotes_broadcast: u64,
    /// Items dropped as status messages or partial updates.
    pub records_discarded: u64,
    /// Per-subscriber send failures.
    pub delivery_failures: u64,
    /// Failures caught at the broadcast loop boundary.
    pub loop_errors: u64,
    /// Subscription requests dropped before reaching upstream.
    pub requests_dropped: u64,
    /// Subscribe and unsubscribe calls issued upstream.
    pub upstream_calls: u64,
    /// Credential source polls.
    pub credential_polls: u64,
}

impl RelayStats {
    /// Count an item taken off the queue.
    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a quote fanned out.
    pub fn record_broadcast(&self) {
        self.quotes_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a discarded item.
    pub fn record_discarded(&self) {
        self.records_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count failed deliveries.
    pub fn record_delivery_failures(&self, count: u64) {
        self.delivery_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a failure caught by the broadcast loop.
    pub fn record_loop_error(&self) {
        self.loop_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped subscription request.
    pub fn record_request_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an upstream subscribe or unsubscribe call.
    pub fn record_upstream_call(&self) {
        self.upstream_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a credential poll.
    pub fn record_credential_poll(&self) {
        self.credential_polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            quotes_broadcast: self.quotes_broadcast.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            credential_polls: self.credential_polls.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Relay Context
// =============================================================================

/// Everything the relay components share.
#[derive(Debug, Default)]
pub struct RelayContext {
    /// Connected downstream subscribers.
    pub subscribers: SubscriberRegistry,
    /// Downstream ↔ upstream identifier mapping.
    pub tokens: TokenNormalizer,
    /// The upstream session.
    pub session: SessionSlot,
    /// Counters.
    pub stats: RelayStats,
}

impl RelayContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty context behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}
