//! Domain Layer - Core relay types and business logic.
//!
//! Instrument naming, token normalization, quote records and subscription
//! batches. Nothing in here performs I/O.

/// Downstream and upstream instrument references.
pub mod instrument;

/// Quote records and the normalized downstream quote.
pub mod quote;

/// Upstream session credentials and lifecycle state.
pub mod session;

/// Subscription requests and batches.
pub mod subscription;

/// Downstream ↔ upstream token normalization.
pub mod token;
