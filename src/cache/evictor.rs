//! Eviction policy: decides which entries to discard under quota pressure.
//!
//! Every entry gets a retention score:
//! - access count (frequently read → keep)
//! - age decay past `max_age_days` (old → discard)
//! - priority multiplier (high → keep)
//!
//! The lowest-scoring fraction of a tier is removed per round.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::entry::{CacheEntry, Priority};
use crate::config::EvictionConfig;
use crate::storage::{StoreError, TierStore};

const MIN_AGE_FACTOR: f64 = 0.1;

/// An eviction candidate with its computed retention score.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

// Greater = evicted sooner: lower score, then earlier insertion.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// The retention scoring engine.
#[derive(Debug, Clone)]
pub struct Evictor {
    config: EvictionConfig,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    fn priority_factor(&self, priority: Priority) -> f64 {
        match priority {
            Priority::High => self.config.high_priority_factor,
            Priority::Medium => self.config.medium_priority_factor,
            Priority::Low => self.config.low_priority_factor,
        }
    }

    /// Age multiplier: 1.0 up to `max_age_days`, then linear decay to a 0.1 floor.
    pub fn age_factor(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_ms = (now - created_at).num_milliseconds() as f64;
        let max_age_ms =
            chrono::Duration::days(self.config.max_age_days as i64).num_milliseconds() as f64;
        if age_ms <= max_age_ms || max_age_ms <= 0.0 {
            return 1.0;
        }
        (1.0 - (age_ms - max_age_ms) / max_age_ms).max(MIN_AGE_FACTOR)
    }

    /// Compute the retention score of a single entry.
    ///
    /// ```text
    /// score(entry) =
    ///     access_count × 10 ×
    ///     age_factor(now - created_at) ×
    ///     priority_factor(priority)
    /// ```
    pub fn compute_score(&self, entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        let base = entry.access_count as f64 * 10.0;
        base * self.age_factor(entry.created_at, now) * self.priority_factor(entry.priority)
    }

    /// How many of `n` entries one round removes.
    pub fn victim_count(&self, n: usize) -> usize {
        (n as f64 * self.config.evict_fraction).floor() as usize
    }

    /// Select the `count` lowest-scoring entries, lowest first.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = &'a CacheEntry>,
        count: usize,
        now: DateTime<Utc>,
    ) -> Vec<EvictionCandidate> {
        let mut heap: BinaryHeap<EvictionCandidate> = entries
            .map(|entry| EvictionCandidate {
                key: entry.key.clone(),
                score: self.compute_score(entry, now),
                created_at: entry.created_at,
                sequence: entry.sequence,
            })
            .collect();

        let mut victims = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(candidate) = heap.pop() {
                victims.push(candidate);
            } else {
                break;
            }
        }

        victims
    }

    /// Run one eviction round on a tier. Returns the number of entries removed.
    pub async fn evict_tier(
        &self,
        store: &dyn TierStore,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let entries = store.entries().await?;
        let count = self.victim_count(entries.len());
        if count == 0 {
            debug!(tier = %store.tier(), entries = entries.len(), "Nothing to evict");
            return Ok(0);
        }

        let victims = self.select_victims(entries.iter(), count, now);

        let mut evicted = 0;
        for victim in victims {
            match store.remove(&victim.key).await {
                Ok(()) => {
                    evicted += 1;
                    debug!(
                        tier = %store.tier(),
                        key = %victim.key,
                        score = victim.score,
                        "Evicted entry"
                    );
                }
                Err(e) => warn!(tier = %store.tier(), key = %victim.key, error = %e, "Eviction failed"),
            }
        }

        info!(evicted, tier = %store.tier(), "Eviction round complete");
        Ok(evicted)
    }
}
