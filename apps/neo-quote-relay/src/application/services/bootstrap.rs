//! Session Bootstrapper
//!
//! Polls the credential source at a fixed interval until it hands out a
//! session token, then builds the upstream session exactly once. Fetch
//! errors and "no token yet" answers are treated the same; there is no
//! backoff. A failed session construction goes back to polling.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::context::RelayContext;
use crate::application::ports::{CredentialSource, FeedCallbacks, SessionFactory};
use crate::domain::session::SessionState;

/// Default credential polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How a bootstrap run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The session was installed.
    Connected {
        /// Polls it took, including the successful one.
        polls: u64,
    },
    /// Shutdown was requested first.
    Cancelled,
}

/// Establishes the upstream session.
pub struct SessionBootstrapper {
    context: Arc<RelayContext>,
    credentials: Arc<dyn CredentialSource>,
    factory: Arc<dyn SessionFactory>,
    callbacks: Arc<dyn FeedCallbacks>,
    poll_interval: Duration,
}

impl SessionBootstrapper {
    /// Create a bootstrapper.
    #[must_use]
    pub fn new(
        context: Arc<RelayContext>,
        credentials: Arc<dyn CredentialSource>,
        factory: Arc<dyn SessionFactory>,
        callbacks: Arc<dyn FeedCallbacks>,
    ) -> Self {
        Self {
            context,
            credentials,
            factory,
            callbacks,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll until the session is installed or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> BootstrapOutcome {
        let mut polls = 0_u64;

        loop {
            if cancel.is_cancelled() {
                return BootstrapOutcome::Cancelled;
            }

            polls += 1;
            self.context.stats.record_credential_poll();

            if self.attempt(polls).await {
                return BootstrapOutcome::Connected { polls };
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Session bootstrap cancelled");
                    return BootstrapOutcome::Cancelled;
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One poll. Returns `true` once the session is installed.
    async fn attempt(&self, poll: u64) -> bool {
        let credentials = match self.credentials.fetch().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                tracing::info!(poll, "Waiting for credentials");
                return false;
            }
            Err(e) => {
                tracing::warn!(poll, error = %e, "Failed to retrieve credentials");
                return false;
            }
        };

        self.context.session.set_state(SessionState::Connecting);

        let session = match self
            .factory
            .connect(&credentials, Arc::clone(&self.callbacks))
        {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(poll, error = %e, "Failed to initialize upstream session");
                self.context
                    .session
                    .set_state(SessionState::AwaitingCredentials);
                return false;
            }
        };

        if let Err(e) = self.context.session.install(session) {
            tracing::warn!(error = %e, "Upstream session already installed");
            return true;
        }

        tracing::info!(
            poll,
            user_id = %credentials.user_id,
            server_id = %credentials.server_id,
            "Upstream session established"
        );
        true
    }
}

impl std::fmt::Debug for SessionBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrapper")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
