//! Cache engine: the public surface over all tiers.
//!
//! The engine is the sole owner of entries and access records. It:
//! - Routes writes through the quota guard and one cleanup-and-retry cycle
//! - Serves reads in fallback order, expiring and repairing records lazily
//! - Feeds every observed access to the analytics recorder
//! - Runs scheduled sweeps, analytics cleanup and prefetch cycles
//!
//! No operation here returns an error. Failures are logged, counted in
//! [`CacheStats`] and degrade to "no cache benefit".

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::analytics::{AccessRecorder, AccessType, AnalyticsSnapshot};
use crate::cache::clock::Clock;
use crate::cache::compressor::Compressor;
use crate::cache::entry::{CacheEntry, GetOptions, Payload, Priority, SetOptions, Tier};
use crate::cache::events::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::cache::evictor::Evictor;
use crate::cache::expiry::{ExpiryManager, SweepReason, SweepReport};
use crate::cache::fetch::Fetcher;
use crate::cache::prefetcher::{NetworkConditions, PrefetchReport, Prefetcher};
use crate::cache::quota::{Admission, QuotaGuard};
use crate::cache::scheduler::{MaintenanceTask, Scheduler};
use crate::config::Config;
use crate::storage::durable::{DurableStore, MemoryStringStorage};
use crate::storage::ephemeral::EphemeralStore;
use crate::storage::indexed::IndexedStore;
use crate::storage::{StoreError, TierStore};

/// Key prefix for named network responses in the indexed tier.
const NAMED_RESPONSE_PREFIX: &str = "api_";

/// Reserved session-tier key holding the persisted analytics snapshot.
const ANALYTICS_KEY: &str = "sc_analytics_snapshot";

/// Tag attached to every prefetched entry.
pub const PREFETCH_TAG: &str = "prefetch";

pub type SharedEngine = Arc<CacheEngine>;

/// Storage key of a named response.
pub fn named_response_key(resource_id: &str) -> String {
    format!("{NAMED_RESPONSE_PREFIX}{resource_id}")
}

/// Host visibility, as reported by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Options recognised by [`CacheEngine::cache_named_response`].
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    /// Time-to-live (default: `expiry.response_ttl_secs`).
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    set_failures: AtomicU64,
    eviction_rounds: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    corrupted_repairs: AtomicU64,
    prefetch_attempts: AtomicU64,
    prefetch_successes: AtomicU64,
    prefetch_failures: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Engine-wide operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub hits: u64,
    /// Read misses plus failed prefetch fetches.
    pub misses: u64,
    pub sets: u64,
    pub set_failures: u64,
    /// Cleanup cycles run by the quota guard or the retry path.
    pub eviction_rounds: u64,
    /// Entries removed by eviction.
    pub evictions: u64,
    /// Expired entries removed by sweeps or lazily on read.
    pub expirations: u64,
    pub corrupted_repairs: u64,
    pub prefetch_attempts: u64,
    pub prefetch_successes: u64,
    pub prefetch_failures: u64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            hits: load(&self.hits),
            misses: load(&self.misses),
            sets: load(&self.sets),
            set_failures: load(&self.set_failures),
            eviction_rounds: load(&self.eviction_rounds),
            evictions: load(&self.evictions),
            expirations: load(&self.expirations),
            corrupted_repairs: load(&self.corrupted_repairs),
            prefetch_attempts: load(&self.prefetch_attempts),
            prefetch_successes: load(&self.prefetch_successes),
            prefetch_failures: load(&self.prefetch_failures),
        }
    }
}

/// Per-tier usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Number of decodable entries, expired or not.
    pub entry_count: usize,
    /// Bytes used, as reported by the backend or summed from entry sizes.
    pub used_bytes: u64,
    /// Capacity budget; `None` when the backend cannot report it.
    pub capacity_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub per_tier: BTreeMap<Tier, TierStats>,
    pub estimated_usage_bytes: u64,
    pub estimated_capacity_bytes: u64,
    pub counters: CounterSnapshot,
}

impl CacheStats {
    /// Hit rate over all reads (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.counters.hits + self.counters.misses;
        if total == 0 {
            return 0.0;
        }
        self.counters.hits as f64 / total as f64
    }
}

/// The multi-tier cache engine.
pub struct CacheEngine {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    stores: BTreeMap<Tier, Arc<dyn TierStore>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    recorder: RwLock<AccessRecorder>,
    prefetcher: RwLock<Prefetcher>,
    evictor: Evictor,
    expiry: ExpiryManager,
    quota: QuotaGuard,
    scheduler: Mutex<Scheduler>,
    feed: ChangeFeed,
    origin: Uuid,
    counters: Counters,
    shut_down: AtomicBool,
}

impl CacheEngine {
    /// Create an engine with no tiers attached and the maintenance tasks
    /// scheduled from `clock.now()`.
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let secs = |s: u64| chrono::Duration::seconds(s.max(1) as i64);

        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            MaintenanceTask::ExpirySweep,
            secs(config.expiry.sweep_interval_secs),
            now,
        );
        scheduler.schedule(
            MaintenanceTask::AnalyticsCleanup,
            secs(config.analytics.cleanup_interval_secs),
            now,
        );
        if config.prefetch.enabled {
            scheduler.schedule(
                MaintenanceTask::PrefetchCycle,
                secs(config.prefetch.interval_secs),
                now,
            );
        }

        Self {
            recorder: RwLock::new(AccessRecorder::new(config.analytics.retention_days)),
            prefetcher: RwLock::new(Prefetcher::new(config.prefetch.clone())),
            evictor: Evictor::new(config.eviction.clone()),
            expiry: ExpiryManager::new(),
            quota: QuotaGuard::new(config.eviction.cleanup_threshold),
            scheduler: Mutex::new(scheduler),
            feed: ChangeFeed::new(),
            origin: Uuid::new_v4(),
            counters: Counters::default(),
            shut_down: AtomicBool::new(false),
            stores: BTreeMap::new(),
            fetcher: None,
            config: Arc::new(config),
            clock,
        }
    }

    /// Engine with all four tiers held in memory.
    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> Self {
        let tiers = config.tiers.clone();
        let compressor = Compressor::new(config.compression.clone());
        Self::new(config, clock)
            .with_store(Arc::new(EphemeralStore::new(
                tiers.ephemeral_max_entries,
                tiers.ephemeral_max_bytes,
            )))
            .with_store(Arc::new(DurableStore::page(
                tiers.page_prefix,
                Arc::new(MemoryStringStorage::new(tiers.page_quota_bytes)),
            )))
            .with_store(Arc::new(DurableStore::session(
                tiers.session_prefix,
                Arc::new(MemoryStringStorage::new(tiers.session_quota_bytes)),
            )))
            .with_store(Arc::new(IndexedStore::new(
                tiers.indexed_quota_bytes,
                compressor,
            )))
    }

    /// Attach (or replace) the store for its tier.
    pub fn with_store(mut self, store: Arc<dyn TierStore>) -> Self {
        self.stores.insert(store.tier(), store);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Join a change feed shared with other contexts.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Identifier of this context on the change feed.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn feed(&self) -> ChangeFeed {
        self.feed.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Tiers with an attached store, fastest first.
    pub fn tiers(&self) -> Vec<Tier> {
        self.stores.keys().copied().collect()
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, tier: Tier, key: Option<&str>, kind: ChangeKind) {
        if !tier.is_persistent() {
            return;
        }
        self.feed.publish(ChangeEvent {
            origin: self.origin,
            tier,
            key: key.map(str::to_string),
            kind,
        });
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Store `value` under `key`.
    ///
    /// Writes to the requested tier (default ephemeral). If that tier is
    /// missing or its backend is unavailable, the write degrades to the
    /// next slower tier. Capacity failures that survive one cleanup cycle
    /// return `false`.
    pub async fn set(&self, key: &str, value: impl Into<Payload>, options: SetOptions) -> bool {
        let now = self.clock.now();
        let tier = options.tier.unwrap_or(Tier::Ephemeral);
        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());

        let Some(entry) = CacheEntry::new(key, value.into(), tier, now, ttl) else {
            warn!(key, ttl_ms = ttl.as_millis() as u64, "Rejected write with unusable TTL");
            bump(&self.counters.set_failures, 1);
            return false;
        };
        let entry = entry
            .with_priority(options.priority.unwrap_or_default())
            .with_tags(options.tags);

        for target in std::iter::once(tier).chain(tier.slower()) {
            let Some(store) = self.stores.get(&target) else {
                debug!(key, tier = %target, "Tier not attached; degrading");
                continue;
            };

            let mut entry = entry.clone();
            entry.tier = target;
            match self.write_to(store.as_ref(), entry).await {
                Ok(()) => {
                    bump(&self.counters.sets, 1);
                    self.notify(target, Some(key), ChangeKind::Set);
                    return true;
                }
                Err(e) if e.is_capacity() => {
                    warn!(key, tier = %target, error = %e, "Write failed after cleanup");
                    bump(&self.counters.set_failures, 1);
                    return false;
                }
                Err(e) => {
                    warn!(key, tier = %target, error = %e, "Tier write failed; degrading");
                }
            }
        }

        bump(&self.counters.set_failures, 1);
        false
    }

    /// Quota check, write, and at most one cleanup cycle per call.
    async fn write_to(&self, store: &dyn TierStore, entry: CacheEntry) -> Result<(), StoreError> {
        let mut cleaned = false;
        if let Admission::EvictFirst(_) = self.quota.check(store).await {
            self.cleanup(store).await;
            cleaned = true;
        }

        match store.put(entry.clone()).await {
            Err(e) if e.is_capacity() && !cleaned => {
                info!(
                    tier = %store.tier(),
                    key = %entry.key,
                    error = %e,
                    "Write refused for capacity; cleaning up and retrying"
                );
                self.cleanup(store).await;
                store.put(entry).await
            }
            result => result,
        }
    }

    /// One cleanup cycle: drop expired entries, then run an eviction round.
    async fn cleanup(&self, store: &dyn TierStore) {
        let now = self.clock.now();
        if let Some(removed) = self.expiry.sweep_tier(store, now, SweepReason::Cleanup).await {
            bump(&self.counters.expirations, removed as u64);
        }

        bump(&self.counters.eviction_rounds, 1);
        match self.evictor.evict_tier(store, now).await {
            Ok(evicted) => bump(&self.counters.evictions, evicted as u64),
            Err(e) => warn!(tier = %store.tier(), error = %e, "Eviction round failed"),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// First unexpired entry for `key` in `order`, with lazy expiry and
    /// corrupted-record repair. Does not touch the entry or the counters.
    async fn find(&self, key: &str, order: &[Tier]) -> Option<(Arc<dyn TierStore>, CacheEntry)> {
        let now = self.clock.now();
        for tier in order {
            let Some(store) = self.stores.get(tier) else {
                continue;
            };
            match store.load(key).await {
                Ok(Some(entry)) if self.expiry.is_expired(&entry, now) => {
                    debug!(key, tier = %tier, "Removing expired entry on read");
                    bump(&self.counters.expirations, 1);
                    if let Err(e) = store.remove(key).await {
                        warn!(key, tier = %tier, error = %e, "Failed to remove expired entry");
                    }
                }
                Ok(Some(entry)) => return Some((Arc::clone(store), entry)),
                Ok(None) => {}
                Err(StoreError::Corrupted { reason, .. }) => {
                    warn!(key, tier = %tier, reason = %reason, "Removing corrupted record");
                    bump(&self.counters.corrupted_repairs, 1);
                    if let Err(e) = store.remove(key).await {
                        warn!(key, tier = %tier, error = %e, "Failed to remove corrupted record");
                    }
                }
                Err(e) => {
                    warn!(key, tier = %tier, error = %e, "Tier read failed; trying next");
                }
            }
        }
        None
    }

    /// Read `key` from the first tier in fallback order holding an
    /// unexpired entry. Other tiers are left untouched.
    pub async fn get(&self, key: &str, options: GetOptions) -> Option<Payload> {
        let order = options.resolved_order();
        match self.find(key, &order).await {
            Some((store, entry)) => {
                // Counted in place; a record replaced or removed since the
                // load is left as it is.
                match store.touch(key, entry.sequence).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(key, tier = %store.tier(), "Entry changed during read; access not counted")
                    }
                    Err(e) => {
                        debug!(key, tier = %store.tier(), error = %e, "Could not persist access count")
                    }
                }
                bump(&self.counters.hits, 1);
                Some(entry.payload)
            }
            None => {
                bump(&self.counters.misses, 1);
                None
            }
        }
    }

    /// Whether an unexpired entry exists in `tier`, or in any tier.
    pub async fn has(&self, key: &str, tier: Option<Tier>) -> bool {
        let order = match tier {
            Some(tier) => vec![tier],
            None => Tier::default_fallback_order(),
        };
        self.find(key, &order).await.is_some()
    }

    /// Remove `key` from one tier, or from every tier.
    pub async fn delete(&self, key: &str, tier: Option<Tier>) {
        for (t, store) in self.selected(tier) {
            match store.remove(key).await {
                Ok(()) => self.notify(t, Some(key), ChangeKind::Delete),
                Err(e) => warn!(key, tier = %t, error = %e, "Delete failed"),
            }
        }
    }

    /// Remove every entry from one tier, or from every tier.
    pub async fn clear(&self, tier: Option<Tier>) {
        for (t, store) in self.selected(tier) {
            match store.clear().await {
                Ok(removed) => {
                    info!(tier = %t, removed, "Cleared tier");
                    self.notify(t, None, ChangeKind::Clear);
                }
                Err(e) => warn!(tier = %t, error = %e, "Clear failed"),
            }
        }
    }

    fn selected(&self, tier: Option<Tier>) -> Vec<(Tier, Arc<dyn TierStore>)> {
        self.stores
            .iter()
            .filter(|(t, _)| tier.map_or(true, |wanted| **t == wanted))
            .map(|(t, s)| (*t, Arc::clone(s)))
            .collect()
    }

    /// Remove every entry carrying `tag`, across all tiers.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut removed = 0;
        for (tier, store) in self.selected(None) {
            let entries = match store.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(tier = %tier, tag, error = %e, "Tag invalidation skipped tier");
                    continue;
                }
            };
            for entry in entries.iter().filter(|e| e.has_tag(tag)) {
                match store.remove(&entry.key).await {
                    Ok(()) => {
                        removed += 1;
                        self.notify(tier, Some(&entry.key), ChangeKind::Delete);
                    }
                    Err(e) => warn!(tier = %tier, key = %entry.key, error = %e, "Invalidation failed"),
                }
            }
        }
        info!(tag, removed, "Invalidated tag");
        removed
    }

    // ── Named responses ──────────────────────────────────────────────────

    /// Cache a network response in the indexed tier.
    pub async fn cache_named_response(
        &self,
        resource_id: &str,
        data: impl Into<Payload>,
        options: ResponseOptions,
    ) -> bool {
        self.record_access(resource_id, AccessType::Fetch).await;
        let set = SetOptions {
            tier: Some(Tier::TransactionalIndexed),
            ttl: Some(options.ttl.unwrap_or_else(|| self.config.response_ttl())),
            priority: None,
            tags: options.tags,
        };
        self.set(&named_response_key(resource_id), data, set).await
    }

    pub async fn get_cached_named_response(&self, resource_id: &str) -> Option<Payload> {
        self.record_access(resource_id, AccessType::Fetch).await;
        self.get(
            &named_response_key(resource_id),
            GetOptions::only(Tier::TransactionalIndexed),
        )
        .await
    }

    // ── Analytics and prefetch ───────────────────────────────────────────

    /// Feed one observed access to the analytics recorder.
    pub async fn record_access(&self, resource_key: &str, access_type: AccessType) {
        let now = self.clock.now();
        self.recorder.write().await.record(resource_key, access_type, now);
    }

    /// Rank known resources and fetch the confident ones that are not
    /// already cached. `trigger` is the resource that prompted the pass
    /// and is never a candidate itself.
    pub async fn prefetch(&self, trigger: Option<&str>) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        if self.shut_down.load(Ordering::Acquire) {
            debug!("Engine shut down; skipping prefetch");
            return report;
        }
        let Some(fetcher) = self.fetcher.clone() else {
            debug!("No fetcher attached; skipping prefetch");
            return report;
        };

        let now = self.clock.now();
        let candidates = {
            let prefetcher = self.prefetcher.read().await;
            if !prefetcher.is_enabled() {
                return report;
            }
            let recorder = self.recorder.read().await;
            prefetcher.rank(recorder.iter(), trigger, now)
        };
        report.selected = candidates.len();

        for candidate in candidates {
            if self.shut_down.load(Ordering::Acquire) {
                debug!(
                    remaining = report.selected - report.fetched - report.failed - report.skipped_cached,
                    "Engine shut down; stopping prefetch pass"
                );
                break;
            }

            let key = named_response_key(&candidate.resource_key);
            if self.has(&key, Some(Tier::TransactionalIndexed)).await {
                report.skipped_cached += 1;
                continue;
            }

            bump(&self.counters.prefetch_attempts, 1);
            match fetcher.fetch(&candidate.resource_key).await {
                Ok(response) => {
                    report.fetched += 1;
                    bump(&self.counters.prefetch_successes, 1);
                    if self.shut_down.load(Ordering::Acquire) {
                        warn!(
                            resource = %candidate.resource_key,
                            "Prefetch completed after shutdown; storing anyway"
                        );
                    }

                    let options = SetOptions::default()
                        .tier(Tier::TransactionalIndexed)
                        .ttl(self.config.response_ttl())
                        .priority(candidate.priority)
                        .tag(PREFETCH_TAG);
                    let payload = Payload::Response(response.into());
                    if !self.set(&key, payload, options).await {
                        report.store_failed += 1;
                    }
                }
                Err(e) => {
                    warn!(resource = %candidate.resource_key, error = %e, "Prefetch fetch failed");
                    report.failed += 1;
                    bump(&self.counters.prefetch_failures, 1);
                    bump(&self.counters.misses, 1);
                }
            }
        }

        info!(
            selected = report.selected,
            fetched = report.fetched,
            skipped = report.skipped_cached,
            failed = report.failed,
            "Prefetch pass complete"
        );
        report
    }

    /// Re-evaluate adaptive prefetch limits. Returns whether they changed.
    pub async fn on_connectivity_change(&self, conditions: &NetworkConditions) -> bool {
        self.prefetcher.write().await.adapt(conditions)
    }

    pub async fn is_prefetch_constrained(&self) -> bool {
        self.prefetcher.read().await.is_constrained()
    }

    // ── Expiry and maintenance ───────────────────────────────────────────

    async fn sweep(&self, reason: SweepReason) -> SweepReport {
        let stores: Vec<Arc<dyn TierStore>> = self.stores.values().cloned().collect();
        let report = self.expiry.sweep(&stores, self.clock.now(), reason).await;
        bump(&self.counters.expirations, report.total_removed() as u64);
        report
    }

    /// Sweep every tier now.
    pub async fn sweep_expired(&self) -> SweepReport {
        self.sweep(SweepReason::OnDemand).await
    }

    /// A hidden host frees resources with an immediate sweep.
    pub async fn on_visibility_change(&self, visibility: Visibility) -> Option<SweepReport> {
        match visibility {
            Visibility::Hidden => Some(self.sweep(SweepReason::Hidden).await),
            Visibility::Visible => None,
        }
    }

    /// Run every maintenance task due at `clock.now()`.
    pub async fn run_due_maintenance(&self) -> Vec<MaintenanceTask> {
        let now = self.clock.now();
        let due = self.scheduler().due(now);

        for task in &due {
            match task {
                MaintenanceTask::ExpirySweep => {
                    self.sweep(SweepReason::Scheduled).await;
                }
                MaintenanceTask::AnalyticsCleanup => {
                    self.purge_stale_analytics().await;
                }
                MaintenanceTask::PrefetchCycle => {
                    self.prefetch(None).await;
                }
            }
        }
        due
    }

    /// Save the analytics snapshot to the session tier.
    pub async fn persist_analytics(&self) -> bool {
        let snapshot = self.recorder.read().await.snapshot();
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize analytics");
                return false;
            }
        };
        let ttl = Duration::from_secs(self.config.analytics.retention_days.max(1) * 86_400);
        let options = SetOptions::default()
            .tier(Tier::DurableSessionScoped)
            .ttl(ttl)
            .priority(Priority::High);
        let stored = self.set(ANALYTICS_KEY, value, options).await;
        if stored {
            info!(records = snapshot.records.len(), "Persisted analytics");
        }
        stored
    }

    /// Merge a persisted snapshot into the recorder. Returns how many
    /// records were restored.
    pub async fn restore_analytics(&self) -> usize {
        let order: Vec<Tier> = std::iter::once(Tier::DurableSessionScoped)
            .chain(Tier::DurableSessionScoped.slower())
            .collect();
        let Some((_, entry)) = self.find(ANALYTICS_KEY, &order).await else {
            return 0;
        };
        let snapshot = entry
            .payload
            .as_json()
            .cloned()
            .map(serde_json::from_value::<AnalyticsSnapshot>);
        match snapshot {
            Some(Ok(snapshot)) => {
                let restored = self.recorder.write().await.restore(snapshot);
                info!(restored, "Restored analytics");
                restored
            }
            _ => {
                warn!("Persisted analytics unreadable; starting fresh");
                0
            }
        }
    }

    /// Drop access records past the retention window.
    pub async fn purge_stale_analytics(&self) -> usize {
        let now = self.clock.now();
        self.recorder.write().await.purge_stale(now)
    }

    pub async fn analytics_len(&self) -> usize {
        self.recorder.read().await.len()
    }

    // ── Statistics and lifecycle ─────────────────────────────────────────

    pub async fn get_stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            counters: self.counters.snapshot(),
            ..Default::default()
        };

        for (tier, store) in &self.stores {
            let entries = match store.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Stats unavailable for tier");
                    continue;
                }
            };
            let quota = store.quota().await.ok().flatten();
            let tier_stats = TierStats {
                entry_count: entries.len(),
                used_bytes: quota
                    .map(|q| q.used_bytes)
                    .unwrap_or_else(|| entries.iter().map(|e| e.size_bytes).sum()),
                capacity_bytes: quota.map(|q| q.capacity_bytes),
            };
            stats.estimated_usage_bytes += tier_stats.used_bytes;
            stats.estimated_capacity_bytes += tier_stats.capacity_bytes.unwrap_or(0);
            stats.per_tier.insert(*tier, tier_stats);
        }

        stats
    }

    /// Stop issuing new work. In-flight prefetches may still complete.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.scheduler().cancel_all();
        info!(cancelled, "Cache engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
