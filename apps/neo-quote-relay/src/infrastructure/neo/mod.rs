//! Kotak Neo Feed Adapter
//!
//! The upstream market-data integration:
//!
//! - **client**: feed thread, connection loop and the `FeedSession` handle
//! - **messages**: `cn` / `mws` / `mwu` / `ifs` / `ifu` request frames
//! - **reconnect**: backoff between connection attempts

pub mod client;
pub mod messages;
pub mod reconnect;

pub use client::{
    FeedClientError, FeedCommand, NeoClientConfig, NeoFeedClient, NeoSession, NeoSessionFactory,
    SubscriptionState,
};
pub use messages::{FeedRequest, join_scrips};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
