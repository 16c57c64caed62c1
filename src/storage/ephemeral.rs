//! Ephemeral tier: entries held in process memory.
//!
//! Never suspends; every operation completes synchronously under a short
//! lock. Capacity is an entry-count limit plus a byte budget.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::entry::{CacheEntry, Tier};
use crate::storage::{QuotaState, StoreError, TierStore};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    used_bytes: u64,
}

#[derive(Debug)]
pub struct EphemeralStore {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: u64,
}

impl EphemeralStore {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries,
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let replaced = inner.entries.get(&entry.key).map(|e| e.size_bytes);

        if replaced.is_none() && inner.entries.len() >= self.max_entries {
            return Err(StoreError::EntryLimit {
                limit: self.max_entries,
            });
        }

        let used_after = inner.used_bytes - replaced.unwrap_or(0) + entry.size_bytes;
        if used_after > self.max_bytes {
            return Err(StoreError::QuotaExceeded {
                needed: entry.size_bytes,
                available: self.max_bytes.saturating_sub(inner.used_bytes),
            });
        }

        inner.used_bytes = used_after;
        inner.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn evict(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key)?;
        inner.used_bytes = inner.used_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn usage(&self) -> QuotaState {
        QuotaState {
            used_bytes: self.lock().used_bytes,
            capacity_bytes: self.max_bytes,
        }
    }

    /// Whether the next new key would be refused by the entry limit.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_entries
    }
}

#[async_trait]
impl TierStore for EphemeralStore {
    fn tier(&self) -> Tier {
        Tier::Ephemeral
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.insert(entry)
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.lookup(key))
    }

    async fn touch(&self, key: &str, sequence: u64) -> Result<bool, StoreError> {
        match self.lock().entries.get_mut(key) {
            Some(entry) if entry.sequence == sequence => {
                entry.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.evict(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().entries.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().entries.keys().cloned().collect())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        Ok(self.lock().entries.values().cloned().collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.used_bytes = 0;
        Ok(removed)
    }

    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        // Entry-count pressure counts as full usage so the quota guard
        // evicts before the limit refuses a write.
        if self.is_full() {
            return Ok(Some(QuotaState {
                used_bytes: self.max_bytes,
                capacity_bytes: self.max_bytes,
            }));
        }
        Ok(Some(self.usage()))
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let before = inner.entries.len();
        let mut freed = 0;
        inner.entries.retain(|_, e| {
            let keep = !e.is_expired_at(now);
            if !keep {
                freed += e.size_bytes;
            }
            keep
        });
        inner.used_bytes = inner.used_bytes.saturating_sub(freed);
        Ok(before - inner.entries.len())
    }
}
