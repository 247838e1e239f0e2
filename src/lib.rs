// =============================================================================
// PulseFeed: live market-data distribution engine
// =============================================================================
//
// Acquires quotes from a prioritised provider chain (with a synthetic
// fallback so the pipeline never starves), maintains bounded per-symbol
// history, derives technical indicators and rule-based trading signals, and
// fans everything out to rate-limited subscriber connections.

pub mod acquisition;
pub mod config;
pub mod connection;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod history;
pub mod indicators;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod signals;
pub mod types;

pub use engine::Engine;
pub use error::{FeedError, Result};
