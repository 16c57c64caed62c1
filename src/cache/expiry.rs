//! Expiry bookkeeping and sweeps.
//!
//! Staleness is always checked at read time; sweeps only reclaim space.
//! Each tier is swept independently and a failing tier never blocks the
//! others.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::entry::{CacheEntry, Tier};
use crate::storage::TierStore;

/// Outcome of one sweep across all tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired entries removed, per tier that swept cleanly.
    pub removed: BTreeMap<Tier, usize>,
    /// Tiers whose sweep failed.
    pub failed: Vec<Tier>,
}

impl SweepReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

/// Why a sweep was started; logged only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReason {
    Scheduled,
    Hidden,
    OnDemand,
    Cleanup,
}

impl std::fmt::Display for SweepReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepReason::Scheduled => write!(f, "scheduled"),
            SweepReason::Hidden => write!(f, "hidden"),
            SweepReason::OnDemand => write!(f, "on-demand"),
            SweepReason::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExpiryManager;

impl ExpiryManager {
    pub fn new() -> Self {
        Self
    }

    /// `now > expires_at`.
    pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_expired_at(now)
    }

    /// Sweep a single tier.
    pub async fn sweep_tier(
        &self,
        store: &dyn TierStore,
        now: DateTime<Utc>,
        reason: SweepReason,
    ) -> Option<usize> {
        match store.remove_expired(now).await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(tier = %store.tier(), reason = %reason, removed, "Swept expired entries");
                }
                Some(removed)
            }
            Err(e) => {
                warn!(tier = %store.tier(), reason = %reason, error = %e, "Expiry sweep failed");
                None
            }
        }
    }

    /// Sweep every tier concurrently.
    pub async fn sweep(
        &self,
        stores: &[Arc<dyn TierStore>],
        now: DateTime<Utc>,
        reason: SweepReason,
    ) -> SweepReport {
        let results = join_all(stores.iter().map(|store| async move {
            (store.tier(), self.sweep_tier(store.as_ref(), now, reason).await)
        }))
        .await;

        let mut report = SweepReport::default();
        for (tier, result) in results {
            match result {
                Some(removed) => {
                    report.removed.insert(tier, removed);
                }
                None => report.failed.push(tier),
            }
        }

        info!(
            reason = %reason,
            removed = report.total_removed(),
            failed = report.failed.len(),
            "Expiry sweep complete"
        );
        report
    }
}
