//! smart-cache-tier: a multi-tier predictive cache.
//!
//! Entries are spread over four storage tiers of differing durability and
//! capacity:
//!   Ephemeral (process memory) → Page-scoped → Session-scoped → Indexed
//!
//! Writes pass a quota guard that evicts the lowest-retention entries under
//! pressure; reads expire stale entries lazily; observed accesses feed a
//! prefetcher that fetches likely resources ahead of time.

pub mod cache;
pub mod config;
pub mod storage;

pub use cache::engine::{CacheEngine, CacheStats, SharedEngine};
pub use cache::entry::{GetOptions, Payload, Priority, SetOptions, Tier};
