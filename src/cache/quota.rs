//! Quota guard: admission check before writes to capacity-bounded tiers.

use tracing::{debug, warn};

use crate::storage::{QuotaState, TierStore};

/// Decision for one write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Usage below the threshold, or the backend cannot report usage.
    Admit,
    /// Usage at or above the threshold: evict before writing.
    EvictFirst(QuotaState),
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaGuard {
    cleanup_threshold: f64,
}

impl QuotaGuard {
    pub fn new(cleanup_threshold: f64) -> Self {
        Self { cleanup_threshold }
    }

    pub fn decide(&self, quota: Option<QuotaState>) -> Admission {
        match quota {
            Some(state) if state.utilization_ratio() >= self.cleanup_threshold => {
                Admission::EvictFirst(state)
            }
            _ => Admission::Admit,
        }
    }

    /// Query the store and decide. A backend that cannot report usage is
    /// admitted optimistically.
    pub async fn check(&self, store: &dyn TierStore) -> Admission {
        let quota = match store.quota().await {
            Ok(quota) => quota,
            Err(e) => {
                warn!(tier = %store.tier(), error = %e, "Quota query failed; admitting");
                None
            }
        };
        let admission = self.decide(quota);
        if let Admission::EvictFirst(state) = admission {
            debug!(
                tier = %store.tier(),
                used = state.used_bytes,
                capacity = state.capacity_bytes,
                "Tier above cleanup threshold"
            );
        }
        admission
    }
}
