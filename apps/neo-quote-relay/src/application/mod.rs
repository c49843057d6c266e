//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the upstream feed, the
//! credential source and downstream subscribers.

/// Shared relay state passed to every component.
pub mod context;

/// Port interfaces for external systems (feed session, credentials, sinks).
pub mod ports;

/// Application services for subscription control and session bootstrap.
pub mod services;
