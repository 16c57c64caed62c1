//! Storage tiers behind one contract.
//!
//! - [`ephemeral`]: in-process map with an entry-count limit
//! - [`durable`]: page/session scoped tiers over a string key-value backend
//! - [`file_storage`]: on-disk string key-value backend with a byte quota
//! - [`indexed`]: binary records with a secondary index on expiry

pub mod durable;
pub mod ephemeral;
pub mod file_storage;
pub mod indexed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::compressor::CompressionError;
use crate::cache::entry::{CacheEntry, Tier};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Entry limit of {limit} reached")]
    EntryLimit { limit: usize },

    #[error("Corrupted record {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Backend unavailable for tier {0}")]
    Unavailable(Tier),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),
}

impl StoreError {
    /// Whether a cleanup pass could make room for the failed write.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            StoreError::QuotaExceeded { .. } | StoreError::EntryLimit { .. }
        )
    }
}

/// Aggregate usage of a capacity-bounded backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaState {
    pub used_bytes: u64,
    pub capacity_bytes: u64,
}

impl QuotaState {
    /// Usage as a fraction of capacity (0.0 - 1.0).
    pub fn utilization_ratio(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.capacity_bytes as f64
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }
}

/// Uniform set/get/delete/has contract over one storage tier.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// The tier this store backs.
    fn tier(&self) -> Tier;

    /// Write an entry, replacing any entry with the same key.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Read an entry without checking expiry.
    ///
    /// A record that cannot be decoded yields [`StoreError::Corrupted`].
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Count one read of the entry written with `sequence`.
    ///
    /// Returns `false` without writing when the record was replaced or
    /// removed since it was loaded.
    async fn touch(&self, key: &str, sequence: u64) -> Result<bool, StoreError>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Whether a record exists for the key, expired or not.
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keys().await?.iter().any(|k| k == key))
    }

    /// Keys of all records in this tier.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// All decodable entries. Corrupted records are repaired (deleted) on the way.
    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError>;

    /// Remove every record in this tier, returning how many were removed.
    async fn clear(&self) -> Result<usize, StoreError>;

    /// Current usage, or `None` when the backend cannot report it.
    async fn quota(&self) -> Result<Option<QuotaState>, StoreError>;

    /// Remove entries that expired before `now`, returning how many were removed.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.entries().await? {
            if entry.is_expired_at(now) {
                self.remove(&entry.key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
