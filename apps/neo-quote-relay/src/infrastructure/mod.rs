//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Fan-out of normalized quotes to subscribers.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// HTTP credential source.
pub mod credentials;

/// Downstream WebSocket server.
pub mod downstream;

/// Health check HTTP endpoint.
pub mod health;

/// Feed callbacks feeding the distribution queue.
pub mod ingest;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Kotak Neo feed client.
pub mod neo;

/// Distribution queue between the feed thread and the broadcast loop.
pub mod queue;

/// OpenTelemetry tracing integration.
pub mod telemetry;
