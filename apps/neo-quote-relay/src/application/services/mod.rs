//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionController`: Routes downstream requests to the upstream session
//! - `SessionBootstrapper`: Polls for credentials and establishes the session

/// Session bootstrap.
pub mod bootstrap;

/// Subscription request handling.
pub mod controller;

pub use bootstrap::{BootstrapOutcome, DEFAULT_POLL_INTERVAL, SessionBootstrapper};
pub use controller::{DispatchReport, RequestError, SubscriptionController};
