#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Neo Quote Relay - Market Data Fan-out
//!
//! Holds a single session with the Kotak Neo market data feed and fans
//! normalized quotes out to any number of downstream WebSocket clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Instrument naming, token normalization, quotes
//!   - `instrument`: `EXCHANGE|CODE` references and segments
//!   - `token`: downstream ↔ upstream identifier mapping
//!   - `quote`: raw records and the normalized downstream quote
//!   - `subscription`: subscribe/unsubscribe requests and batches
//!   - `session`: credentials and session lifecycle
//!
//! - **Application**: Use cases and port definitions
//!   - `context`: subscriber registry, session slot, counters
//!   - `ports`: feed session, credential source, subscriber sink
//!   - `services`: subscription controller, session bootstrapper
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `neo`: upstream feed client on its own thread
//!   - `ingest` / `queue` / `broadcast`: the data path
//!   - `downstream`: subscriber WebSocket server
//!   - `credentials`: HTTP credential source
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                 feed thread          │          relay runtime
//! Neo feed ──► IngestAdapter ──► queue ──► BroadcastLoop ──► subscriber 1
//!                  ▲                   │                  ──► subscriber N
//!                  │ subscribe         │                        │
//!              NeoSession ◄──── SubscriptionController ◄────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Relay types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{Exchange, InstrumentRef, Segment, UpstreamRef};
pub use domain::quote::{FeedItem, NormalizedQuote, QuoteRecord};
pub use domain::session::{SessionCredentials, SessionState};
pub use domain::subscription::{SubscriptionAction, SubscriptionBatch, SubscriptionRequest};
pub use domain::token::TokenNormalizer;

// Application
pub use application::context::{RelayContext, StatsSnapshot, SubscriberId, SubscriberRegistry};
pub use application::services::{BootstrapOutcome, SessionBootstrapper, SubscriptionController};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, CredentialSettings, FeedSettings, RelayConfig, ServerSettings,
};

// Adapters
pub use infrastructure::broadcast::BroadcastLoop;
pub use infrastructure::credentials::HttpCredentialSource;
pub use infrastructure::downstream::{DownstreamServer, ServerError};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::ingest::IngestAdapter;
pub use infrastructure::neo::NeoSessionFactory;
pub use infrastructure::queue::distribution_queue;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
