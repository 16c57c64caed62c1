//! Prefetching: predicts which resources will be requested soon and
//! fetches them before they are asked for.
//!
//! Confidence per resource combines four signals from its access record:
//! 1. Frequency: total access count, capped
//! 2. Temporal: share of accesses that happened in the current hour
//! 3. Recency: how recently it was last accessed, fading over a week
//! 4. Type: a fixed bonus for critical assets (stylesheets, scripts, fonts)

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::analytics::AccessRecord;
use crate::cache::entry::Priority;
use crate::config::PrefetchConfig;

const FREQUENCY_CAP: f64 = 0.4;
const TEMPORAL_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.2;
const RECENCY_WINDOW_DAYS: f64 = 7.0;
const CRITICAL_BONUS: f64 = 0.1;
const MS_PER_DAY: f64 = 86_400_000.0;

/// A resource worth fetching ahead of time.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionCandidate {
    pub resource_key: String,
    pub confidence: f64,
    pub priority: Priority,
}

/// Effective connection class reported by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

/// Connectivity and device conditions the prefetcher adapts to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    pub effective_type: Option<ConnectionType>,
    pub downlink_mbps: Option<f64>,
    pub save_data: bool,
    pub device_memory_gb: Option<f64>,
}

impl NetworkConditions {
    /// Low bandwidth or low memory.
    pub fn is_constrained(&self) -> bool {
        self.save_data
            || matches!(
                self.effective_type,
                Some(ConnectionType::Slow2g) | Some(ConnectionType::TwoG)
            )
            || self.downlink_mbps.is_some_and(|d| d < 1.0)
            || self.device_memory_gb.is_some_and(|m| m < 2.0)
    }
}

/// Outcome of one prefetch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Candidates that passed the confidence threshold and cap.
    pub selected: usize,
    /// Candidates already cached and unexpired.
    pub skipped_cached: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Fetched but the write to the cache failed.
    pub store_failed: usize,
}

/// The prefetcher ranks resources by confidence.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    config: PrefetchConfig,
    constrained: bool,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            config,
            constrained: false,
        }
    }

    /// Re-evaluate adaptive limits. Returns whether the mode changed.
    pub fn adapt(&mut self, conditions: &NetworkConditions) -> bool {
        let constrained = conditions.is_constrained();
        let changed = constrained != self.constrained;
        self.constrained = constrained;
        if changed {
            info!(
                constrained,
                cap = self.candidate_cap(),
                "Prefetch limits adapted to network conditions"
            );
        }
        changed
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Maximum candidates per trigger under the current conditions.
    pub fn candidate_cap(&self) -> usize {
        if self.constrained {
            self.config
                .constrained_max_candidates
                .min(self.config.max_candidates)
        } else {
            self.config.max_candidates
        }
    }

    /// Stylesheets, scripts and fonts.
    pub fn is_critical_asset(&self, resource_key: &str) -> bool {
        let path = resource_key
            .split(['?', '#'])
            .next()
            .unwrap_or(resource_key)
            .to_ascii_lowercase();
        self.config
            .critical_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
    }

    /// Compute prefetch confidence for one resource.
    ///
    /// ```text
    /// confidence =
    ///     min(count / 100, 0.4) +
    ///     (accesses this hour / all accesses) × 0.3 +
    ///     clamp((7 - days since last access) / 7, 0, 1) × 0.2 +
    ///     (0.1 if critical asset)
    /// ```
    ///
    /// Clamped to `[0, 1]`; a resource with no recorded accesses scores 0.
    pub fn confidence(&self, resource_key: &str, record: &AccessRecord, now: DateTime<Utc>) -> f64 {
        if record.count == 0 {
            return 0.0;
        }

        let frequency = (record.count as f64 / 100.0).min(FREQUENCY_CAP);

        let total = record.total_hourly();
        let temporal = if total > 0 {
            record.hourly(now.hour()) as f64 / total as f64 * TEMPORAL_WEIGHT
        } else {
            0.0
        };

        let recency_days = (now - record.last_access).num_milliseconds() as f64 / MS_PER_DAY;
        let recency = ((RECENCY_WINDOW_DAYS - recency_days) / RECENCY_WINDOW_DAYS).clamp(0.0, 1.0)
            * RECENCY_WEIGHT;

        let type_bonus = if self.is_critical_asset(resource_key) {
            CRITICAL_BONUS
        } else {
            0.0
        };

        (frequency + temporal + recency + type_bonus).clamp(0.0, 1.0)
    }

    /// Bucket a confidence value.
    pub fn priority_for(confidence: f64) -> Priority {
        if confidence > 0.7 {
            Priority::High
        } else if confidence > 0.4 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Rank resources by confidence, highest first, keeping only those above
    /// the admission threshold and at most `candidate_cap()` of them.
    pub fn rank<'a>(
        &self,
        records: impl Iterator<Item = (&'a str, &'a AccessRecord)>,
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<PredictionCandidate> {
        let mut candidates: Vec<PredictionCandidate> = records
            .filter(|(key, _)| Some(*key) != exclude)
            .filter(|(key, _)| !self.constrained || self.is_critical_asset(key))
            .map(|(key, record)| {
                let confidence = self.confidence(key, record, now);
                PredictionCandidate {
                    resource_key: key.to_string(),
                    confidence,
                    priority: Self::priority_for(confidence),
                }
            })
            .filter(|c| c.confidence > self.config.min_confidence)
            .collect();

        // Sort by confidence descending; key order keeps ties deterministic.
        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.resource_key.cmp(&b.resource_key))
        });
        candidates.truncate(self.candidate_cap());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::analytics::{AccessRecorder, AccessType};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 30, 0).unwrap()
    }

    fn prefetcher() -> Prefetcher {
        Prefetcher::new(PrefetchConfig::default())
    }

    #[test]
    fn test_frequency_and_temporal_ceiling() {
        let mut recorder = AccessRecorder::new(30);
        for _ in 0..120 {
            recorder.record("/calendar", AccessType::View, at(9) - chrono::Duration::days(8));
        }
        let record = recorder.get("/calendar").unwrap();

        // Recency has faded out after 8 days; frequency + temporal remain.
        let c = prefetcher().confidence("/calendar", record, at(9));
        assert!((c - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_hours_confidence() {
        let mut recorder = AccessRecorder::new(30);
        for _ in 0..50 {
            recorder.record("/lunch-menu", AccessType::View, at(9));
        }
        for _ in 0..10 {
            recorder.record("/lunch-menu", AccessType::View, at(15));
        }
        let record = recorder.get("/lunch-menu").unwrap();

        // 0.4 + 0.3 × 50/60 + recency (last access 18 hours before the query).
        let now = at(9) + chrono::Duration::days(1);
        let recency = (7.0 - 0.75) / 7.0 * 0.2;
        let expected = 0.4 + 0.3 * 50.0 / 60.0 + recency;
        let c = prefetcher().confidence("/lunch-menu", record, now);
        assert!((c - expected).abs() < 1e-9);
        assert!(c > 0.3);
    }

    #[test]
    fn test_critical_asset_bonus() {
        let p = prefetcher();
        assert!(p.is_critical_asset("/static/site.css"));
        assert!(p.is_critical_asset("/static/app.JS?v=3"));
        assert!(p.is_critical_asset("/fonts/inter.woff2#x"));
        assert!(!p.is_critical_asset("/images/logo.png"));
    }

    #[test]
    fn test_future_access_does_not_inflate_recency() {
        let mut recorder = AccessRecorder::new(30);
        recorder.record("/x", AccessType::View, at(12));
        let record = recorder.get("/x").unwrap();
        let c = prefetcher().confidence("/x", record, at(9));
        // 0.01 frequency, no access at hour 9, recency capped at 0.2.
        assert!((c - 0.21).abs() < 1e-9);
    }

    #[test]
    fn test_priority_buckets() {
        assert_eq!(Prefetcher::priority_for(0.71), Priority::High);
        assert_eq!(Prefetcher::priority_for(0.7), Priority::Medium);
        assert_eq!(Prefetcher::priority_for(0.41), Priority::Medium);
        assert_eq!(Prefetcher::priority_for(0.4), Priority::Low);
    }

    #[test]
    fn test_rank_applies_threshold_cap_and_exclusion() {
        let mut recorder = AccessRecorder::new(30);
        for (i, key) in ["/a", "/b", "/c", "/d", "/e", "/f", "/g"].iter().enumerate() {
            for _ in 0..(10 * (i + 1)) {
                recorder.record(key, AccessType::View, at(9));
            }
        }
        // Seen once, long ago, at another hour: below threshold.
        recorder.record("/stale", AccessType::View, at(3) - chrono::Duration::days(20));

        let ranked = prefetcher().rank(recorder.iter(), Some("/g"), at(9));
        assert_eq!(ranked.len(), 5);
        assert!(ranked.iter().all(|c| c.resource_key != "/g"));
        assert!(ranked.iter().all(|c| c.resource_key != "/stale"));
        assert!(ranked.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_constrained_mode_limits_to_critical_assets() {
        let mut recorder = AccessRecorder::new(30);
        for key in ["/site.css", "/app.js", "/theme.css", "/page.html"] {
            for _ in 0..40 {
                recorder.record(key, AccessType::Fetch, at(9));
            }
        }
        let mut p = prefetcher();
        assert!(p.adapt(&NetworkConditions {
            effective_type: Some(ConnectionType::TwoG),
            ..Default::default()
        }));

        let ranked = p.rank(recorder.iter(), None, at(9));
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|c| p.is_critical_asset(&c.resource_key)));

        assert!(p.adapt(&NetworkConditions::default()));
        assert_eq!(p.candidate_cap(), 5);
    }
}
