//! Indexed tier: binary records with a secondary index on expiry.
//!
//! Records are serialized entries wrapped by the [`Compressor`]. The expiry
//! index lets a sweep delete every stale record with one range query
//! instead of decoding the whole store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cache::compressor::Compressor;
use crate::cache::entry::{CacheEntry, Tier};
use crate::storage::{QuotaState, StoreError, TierStore};

#[derive(Debug)]
struct Record {
    bytes: Vec<u8>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, Record>,
    by_expiry: BTreeSet<(DateTime<Utc>, String)>,
    used_bytes: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Record> {
        let record = self.records.remove(key)?;
        self.by_expiry.remove(&(record.expires_at, key.to_string()));
        self.used_bytes = self.used_bytes.saturating_sub(record.bytes.len() as u64);
        Some(record)
    }
}

#[derive(Debug)]
pub struct IndexedStore {
    inner: Mutex<Inner>,
    quota_bytes: u64,
    compressor: Compressor,
}

impl IndexedStore {
    pub fn new(quota_bytes: u64, compressor: Compressor) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            quota_bytes,
            compressor,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<CacheEntry, StoreError> {
        let corrupted = |reason: String| StoreError::Corrupted {
            key: key.to_string(),
            reason,
        };
        let raw = self
            .compressor
            .decode(bytes)
            .map_err(|e| corrupted(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| corrupted(e.to_string()))
    }

    /// Keys whose expiry is strictly before `now`, answered from the index.
    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.lock()
            .by_expiry
            .range(..(now, String::new()))
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Stored size of a record, after compression.
    pub fn stored_len(&self, key: &str) -> Option<usize> {
        self.lock().records.get(key).map(|r| r.bytes.len())
    }
}

#[async_trait]
impl TierStore for IndexedStore {
    fn tier(&self) -> Tier {
        Tier::TransactionalIndexed
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(&entry)?;
        let bytes = self.compressor.encode(&raw)?;

        let mut inner = self.lock();
        let existing = inner
            .records
            .get(&entry.key)
            .map(|r| r.bytes.len() as u64)
            .unwrap_or(0);
        let used = inner.used_bytes - existing;
        let needed = bytes.len() as u64;
        if used + needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed,
                available: self.quota_bytes.saturating_sub(used),
            });
        }

        inner.remove(&entry.key);
        inner
            .by_expiry
            .insert((entry.expires_at, entry.key.clone()));
        inner.used_bytes += needed;
        inner.records.insert(
            entry.key,
            Record {
                bytes,
                expires_at: entry.expires_at,
            },
        );
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let bytes = match self.lock().records.get(key) {
            Some(record) => record.bytes.clone(),
            None => return Ok(None),
        };
        self.decode(key, &bytes).map(Some)
    }

    async fn touch(&self, key: &str, sequence: u64) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(record) = inner.records.get(key) else {
            return Ok(false);
        };
        let mut entry = self.decode(key, &record.bytes)?;
        if entry.sequence != sequence {
            return Ok(false);
        }
        entry.touch();

        let bytes = self.compressor.encode(&serde_json::to_vec(&entry)?)?;
        let old_len = record.bytes.len() as u64;
        inner.used_bytes = inner.used_bytes - old_len + bytes.len() as u64;
        if let Some(record) = inner.records.get_mut(key) {
            record.bytes = bytes;
        }
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().records.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().records.keys().cloned().collect())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let snapshot: Vec<(String, Vec<u8>)> = self
            .lock()
            .records
            .iter()
            .map(|(k, r)| (k.clone(), r.bytes.clone()))
            .collect();

        let mut entries = Vec::with_capacity(snapshot.len());
        for (key, bytes) in snapshot {
            match self.decode(&key, &bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(tier = %self.tier(), key = %key, error = %e, "Removing corrupted record");
                    self.lock().remove(&key);
                }
            }
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let removed = inner.records.len();
        *inner = Inner::default();
        Ok(removed)
    }

    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        Ok(Some(QuotaState {
            used_bytes: self.lock().used_bytes,
            capacity_bytes: self.quota_bytes,
        }))
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let stale: Vec<String> = inner
            .by_expiry
            .range(..(now, String::new()))
            .map(|(_, key)| key.clone())
            .collect();
        for key in &stale {
            inner.remove(key);
        }
        Ok(stale.len())
    }
}
