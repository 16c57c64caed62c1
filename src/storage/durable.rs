//! Durable tiers over a string key-value backend.
//!
//! Page-scoped and session-scoped tiers share this implementation and differ
//! only in their key prefix and backing storage. Entries are stored as JSON
//! strings under `{prefix}{key}` so unrelated data in the same backend is
//! never touched.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::warn;

use crate::cache::entry::{CacheEntry, Tier};
use crate::storage::{QuotaState, StoreError, TierStore};

/// A string key-value backend, shared by every context that opens it.
#[async_trait]
pub trait StringStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Fails with [`StoreError::QuotaExceeded`] when the value does not fit.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Write `value` only if the item still holds `expected`. Returns whether
    /// the write happened.
    ///
    /// The default re-reads then writes; backends that can should do both
    /// under one lock.
    async fn replace_item(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        if self.get_item(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.set_item(key, value).await?;
        Ok(true)
    }

    /// Usage report; `None` when the backend cannot measure it.
    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        Ok(None)
    }
}

/// In-memory string storage with an optional byte quota.
///
/// Usage is charged as key length plus value length.
#[derive(Debug, Default)]
pub struct MemoryStringStorage {
    items: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryStringStorage {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Storage that cannot report or enforce a quota.
    pub fn unbounded() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn used(items: &BTreeMap<String, String>) -> u64 {
        items.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum()
    }

    fn insert(
        &self,
        items: &mut BTreeMap<String, String>,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        if let Some(capacity) = self.quota_bytes {
            let existing = items.get(key).map(|v| (key.len() + v.len()) as u64);
            let used = Self::used(items) - existing.unwrap_or(0);
            let needed = (key.len() + value.len()) as u64;
            if used + needed > capacity {
                return Err(StoreError::QuotaExceeded {
                    needed,
                    available: capacity.saturating_sub(used),
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl StringStorage for MemoryStringStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(&mut self.lock(), key, value)
    }

    async fn replace_item(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut items = self.lock();
        if items.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        self.insert(&mut items, key, value)?;
        Ok(true)
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        Ok(self.quota_bytes.map(|capacity| QuotaState {
            used_bytes: Self::used(&self.lock()),
            capacity_bytes: capacity,
        }))
    }
}

/// A durable tier: JSON-encoded entries in a [`StringStorage`].
pub struct DurableStore {
    tier: Tier,
    prefix: String,
    storage: Arc<dyn StringStorage>,
}

impl DurableStore {
    pub fn new(tier: Tier, prefix: impl Into<String>, storage: Arc<dyn StringStorage>) -> Self {
        Self {
            tier,
            prefix: prefix.into(),
            storage,
        }
    }

    /// Page-scoped tier.
    pub fn page(prefix: impl Into<String>, storage: Arc<dyn StringStorage>) -> Self {
        Self::new(Tier::DurablePageScoped, prefix, storage)
    }

    /// Session-scoped tier.
    pub fn session(prefix: impl Into<String>, storage: Arc<dyn StringStorage>) -> Self {
        Self::new(Tier::DurableSessionScoped, prefix, storage)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn decode(&self, key: &str, raw: &str) -> Result<CacheEntry, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl TierStore for DurableStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&entry)?;
        self.storage
            .set_item(&self.storage_key(&entry.key), &raw)
            .await
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        match self.storage.get_item(&self.storage_key(key)).await? {
            Some(raw) => self.decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn touch(&self, key: &str, sequence: u64) -> Result<bool, StoreError> {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.storage.get_item(&storage_key).await? else {
            return Ok(false);
        };
        let mut entry = self.decode(key, &raw)?;
        if entry.sequence != sequence {
            return Ok(false);
        }
        entry.touch();
        let updated = serde_json::to_string(&entry)?;
        self.storage.replace_item(&storage_key, &raw, &updated).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.storage.remove_item(&self.storage_key(key)).await
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .storage
            .get_item(&self.storage_key(key))
            .await?
            .is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let mut entries = Vec::new();
        for key in self.keys().await? {
            match self.load(&key).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(StoreError::Corrupted { reason, .. }) => {
                    warn!(tier = %self.tier, key = %key, reason = %reason, "Removing corrupted record");
                    self.remove(&key).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let keys = self.keys().await?;
        for key in &keys {
            self.remove(key).await?;
        }
        Ok(keys.len())
    }

    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        self.storage.quota().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn entry(key: &str) -> CacheEntry {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        CacheEntry::new(
            key,
            serde_json::json!({"notice": "closed friday"}).into(),
            Tier::DurablePageScoped,
            now,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_prefix_isolation() {
        let storage = Arc::new(MemoryStringStorage::unbounded());
        storage.set_item("theme", "dark").await.unwrap();

        let store = DurableStore::page("sc_page_", storage.clone());
        store.put(entry("notices")).await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["notices".to_string()]);
        assert!(storage.get_item("sc_page_notices").await.unwrap().is_some());

        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(storage.get_item("theme").await.unwrap().as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn test_corrupted_record_reported_and_repaired() {
        let storage = Arc::new(MemoryStringStorage::unbounded());
        storage.set_item("sc_page_bad", "{not json").await.unwrap();
        let store = DurableStore::page("sc_page_", storage.clone());

        assert!(matches!(
            store.load("bad").await,
            Err(StoreError::Corrupted { .. })
        ));

        let entries = store.entries().await.unwrap();
        assert!(entries.is_empty());
        assert!(storage.get_item("sc_page_bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let storage = Arc::new(MemoryStringStorage::new(64));
        let store = DurableStore::session("sc_session_", storage);
        let err = store.put(entry("too-big")).await.unwrap_err();
        assert!(err.is_capacity());
    }

    #[tokio::test]
    async fn test_touch_skips_replaced_record() {
        let storage = Arc::new(MemoryStringStorage::unbounded());
        let store = DurableStore::page("sc_page_", storage);

        let first = entry("menu");
        store.put(first.clone()).await.unwrap();
        assert!(store.touch("menu", first.sequence).await.unwrap());
        assert_eq!(store.load("menu").await.unwrap().unwrap().access_count, 1);

        let second = entry("menu");
        store.put(second.clone()).await.unwrap();
        assert!(!store.touch("menu", first.sequence).await.unwrap());
        assert_eq!(store.load("menu").await.unwrap(), Some(second));

        store.remove("menu").await.unwrap();
        assert!(!store.touch("menu", first.sequence).await.unwrap());
        assert!(store.load("menu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_item_requires_expected_value() {
        let storage = MemoryStringStorage::new(1024);
        storage.set_item("k", "old").await.unwrap();
        assert!(!storage.replace_item("k", "other", "new").await.unwrap());
        assert!(storage.replace_item("k", "old", "new").await.unwrap());
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("new"));
        assert!(!storage.replace_item("missing", "old", "new").await.unwrap());
    }

    #[tokio::test]
    async fn test_unbounded_storage_has_no_quota() {
        let storage = Arc::new(MemoryStringStorage::unbounded());
        let store = DurableStore::page("p_", storage);
        assert!(store.quota().await.unwrap().is_none());
    }
}
