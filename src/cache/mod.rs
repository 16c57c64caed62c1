//! Multi-tier cache engine.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: CacheEntry, Payload, Tier and Priority definitions
//! - [`engine`]: the public engine that coordinates every component below
//! - [`expiry`]: TTL checks and per-tier sweeps
//! - [`analytics`]: per-resource access counters and hour histograms
//! - [`evictor`]: retention scoring and lowest-score eviction
//! - [`prefetcher`]: confidence scoring for predictive prefetch
//! - [`quota`]: admission check before writes
//! - [`scheduler`]: clock-driven maintenance scheduling
//! - [`compressor`]: zstd compression for indexed records
//! - [`events`]: cross-context change feed
//! - [`fetch`]: the injected fetch capability
//! - [`clock`]: injected time source

pub mod analytics;
pub mod clock;
pub mod compressor;
pub mod engine;
pub mod entry;
pub mod events;
pub mod evictor;
pub mod expiry;
pub mod fetch;
pub mod prefetcher;
pub mod quota;
pub mod scheduler;
