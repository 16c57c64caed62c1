//! Access analytics: per-resource counters and hour-of-day histograms.
//!
//! This is derived state for the prefetcher only. Losing it lowers
//! prefetch quality but never changes what `get` returns.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Kind of observed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    View,
    Click,
    Fetch,
    Navigate,
    Hover,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AccessType::View => "view",
            AccessType::Click => "click",
            AccessType::Fetch => "fetch",
            AccessType::Navigate => "navigate",
            AccessType::Hover => "hover",
        };
        f.write_str(label)
    }
}

/// Accumulated statistics for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub count: u64,
    pub first_access: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub access_types: BTreeMap<AccessType, u64>,
    /// Index = hour of day (UTC).
    pub hour_histogram: [u64; 24],
}

impl AccessRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_access: now,
            last_access: now,
            access_types: BTreeMap::new(),
            hour_histogram: [0; 24],
        }
    }

    fn observe(&mut self, access_type: AccessType, now: DateTime<Utc>) {
        self.count += 1;
        *self.access_types.entry(access_type).or_insert(0) += 1;
        self.hour_histogram[now.hour() as usize] += 1;
        self.last_access = now;
    }

    /// Accesses recorded during `hour`.
    pub fn hourly(&self, hour: u32) -> u64 {
        self.hour_histogram.get(hour as usize).copied().unwrap_or(0)
    }

    /// Sum over the hour histogram.
    pub fn total_hourly(&self) -> u64 {
        self.hour_histogram.iter().sum()
    }
}

/// Serializable copy of all records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub records: BTreeMap<String, AccessRecord>,
}

#[derive(Debug)]
pub struct AccessRecorder {
    records: HashMap<String, AccessRecord>,
    retention: chrono::Duration,
}

impl AccessRecorder {
    pub fn new(retention_days: u64) -> Self {
        Self {
            records: HashMap::new(),
            retention: chrono::Duration::days(retention_days as i64),
        }
    }

    /// Record one access to `key`.
    pub fn record(&mut self, key: &str, access_type: AccessType, now: DateTime<Utc>) -> &AccessRecord {
        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| AccessRecord::new(now));
        record.observe(access_type, now);
        record
    }

    pub fn get(&self, key: &str) -> Option<&AccessRecord> {
        self.records.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AccessRecord)> {
        self.records.iter().map(|(k, r)| (k.as_str(), r))
    }

    /// Drop records whose last access is older than the retention window.
    pub fn purge_stale(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        let retention = self.retention;
        self.records.retain(|_, r| now - r.last_access <= retention);
        let purged = before - self.records.len();
        if purged > 0 {
            debug!(purged, remaining = self.records.len(), "Purged stale access records");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            records: self
                .records
                .iter()
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect(),
        }
    }

    /// Merge a snapshot in; records already present keep the live copy.
    pub fn restore(&mut self, snapshot: AnalyticsSnapshot) -> usize {
        let mut restored = 0;
        for (key, record) in snapshot.records {
            if let std::collections::hash_map::Entry::Vacant(slot) = self.records.entry(key) {
                slot.insert(record);
                restored += 1;
            }
        }
        restored
    }
}
