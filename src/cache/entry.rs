//! Cache entry types and tier definitions.
//!
//! A cache entry is the unit of storage. Entries live in exactly one tier
//! per write; the same key may exist independently in several tiers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies which storage tier an entry resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 0: in-process memory, lost when the process exits.
    Ephemeral,
    /// Tier 1: durable key-value strings scoped to the page origin.
    DurablePageScoped,
    /// Tier 2: durable key-value strings scoped to the session.
    DurableSessionScoped,
    /// Tier 3: indexed binary records with an expiry index.
    TransactionalIndexed,
}

impl Tier {
    /// All tiers, fastest first.
    pub const ALL: [Tier; 4] = [
        Tier::Ephemeral,
        Tier::DurablePageScoped,
        Tier::DurableSessionScoped,
        Tier::TransactionalIndexed,
    ];

    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            Tier::Ephemeral => 0,
            Tier::DurablePageScoped => 1,
            Tier::DurableSessionScoped => 2,
            Tier::TransactionalIndexed => 3,
        }
    }

    /// Whether entries in this tier outlive the process.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Tier::Ephemeral)
    }

    /// The default read order: fastest tier first.
    pub fn default_fallback_order() -> Vec<Tier> {
        Self::ALL.to_vec()
    }

    /// Tiers after this one in the default order, used when a write
    /// degrades past an unavailable backend.
    pub fn slower(&self) -> impl Iterator<Item = Tier> {
        let level = self.level();
        Self::ALL.into_iter().filter(move |t| t.level() > level)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Ephemeral => write!(f, "ephemeral"),
            Tier::DurablePageScoped => write!(f, "page"),
            Tier::DurableSessionScoped => write!(f, "session"),
            Tier::TransactionalIndexed => write!(f, "indexed"),
        }
    }
}

/// Retention priority of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// A network response captured for later replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub headers: BTreeMap<String, String>,
    #[serde(with = "hex::serde")]
    pub body: Vec<u8>,
}

/// The stored value of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Arbitrary structured data.
    Json(serde_json::Value),
    /// Raw bytes.
    Bytes(#[serde(with = "hex::serde")] Vec<u8>),
    /// A fetched network response.
    Response(CachedResponse),
}

impl Payload {
    /// Serialized size in bytes; this is what quota accounting charges.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    /// Borrow the structured value, if this is a JSON payload.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value.to_vec())
    }
}

impl From<CachedResponse> for Payload {
    fn from(value: CachedResponse) -> Self {
        Payload::Response(value)
    }
}

/// Global monotonic insertion counter, used to break retention-score ties.
static NEXT_ENTRY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Allocate the next insertion sequence number.
pub fn next_sequence() -> u64 {
    NEXT_ENTRY_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// A single cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key, unique within a tier.
    pub key: String,

    /// Stored value.
    pub payload: Payload,

    /// Write time.
    pub created_at: DateTime<Utc>,

    /// Expiry time; always later than `created_at`.
    pub expires_at: DateTime<Utc>,

    /// Tier the entry was written to.
    pub tier: Tier,

    /// Serialized payload size, computed at write time.
    pub size_bytes: u64,

    /// Retention priority.
    #[serde(default)]
    pub priority: Priority,

    /// Tags for bulk invalidation.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Number of successful reads.
    #[serde(default)]
    pub access_count: u64,

    /// Insertion order, for deterministic tie-breaking.
    #[serde(default)]
    pub sequence: u64,
}

impl CacheEntry {
    /// Build an entry written at `now`. Returns `None` when the TTL is zero
    /// or does not fit in the timestamp range.
    pub fn new(
        key: impl Into<String>,
        payload: Payload,
        tier: Tier,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<Self> {
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        if ttl <= chrono::Duration::zero() {
            return None;
        }
        let expires_at = now.checked_add_signed(ttl)?;
        let size_bytes = payload.serialized_len() as u64;
        Some(Self {
            key: key.into(),
            payload,
            created_at: now,
            expires_at,
            tier,
            size_bytes,
            priority: Priority::default(),
            tags: BTreeSet::new(),
            access_count: 0,
            sequence: next_sequence(),
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Record a successful read.
    pub fn touch(&mut self) {
        self.access_count += 1;
    }

    /// Whether the entry is stale at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Options recognised by `set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Target tier (default: [`Tier::Ephemeral`]).
    pub tier: Option<Tier>,
    /// Time-to-live (default: `expiry.default_ttl_secs`).
    pub ttl: Option<Duration>,
    /// Retention priority (default: [`Priority::Medium`]).
    pub priority: Option<Priority>,
    /// Tags for bulk invalidation (default: none).
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Options recognised by `get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Tiers to try, in order (default: [`Tier::default_fallback_order`]).
    pub tier_fallback_order: Option<Vec<Tier>>,
}

impl GetOptions {
    pub fn order(tiers: impl Into<Vec<Tier>>) -> Self {
        Self {
            tier_fallback_order: Some(tiers.into()),
        }
    }

    pub fn only(tier: Tier) -> Self {
        Self::order(vec![tier])
    }

    pub(crate) fn resolved_order(&self) -> Vec<Tier> {
        self.tier_fallback_order
            .clone()
            .unwrap_or_else(Tier::default_fallback_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_tier_ordering() {
        assert_eq!(Tier::Ephemeral.level(), 0);
        assert_eq!(Tier::TransactionalIndexed.level(), 3);
        assert!(!Tier::Ephemeral.is_persistent());
        assert!(Tier::DurablePageScoped.is_persistent());
    }

    #[test]
    fn test_slower_tiers() {
        let slower: Vec<_> = Tier::DurablePageScoped.slower().collect();
        assert_eq!(
            slower,
            vec![Tier::DurableSessionScoped, Tier::TransactionalIndexed]
        );
        assert_eq!(Tier::TransactionalIndexed.slower().count(), 0);
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = CacheEntry::new(
            "x",
            serde_json::json!({"v": 1}).into(),
            Tier::Ephemeral,
            t0(),
            Duration::from_millis(1000),
        )
        .unwrap();
        assert!(entry.expires_at > entry.created_at);
        assert!(!entry.is_expired_at(t0() + chrono::Duration::milliseconds(1000)));
        assert!(entry.is_expired_at(t0() + chrono::Duration::milliseconds(1001)));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let entry = CacheEntry::new("x", vec![1u8].into(), Tier::Ephemeral, t0(), Duration::ZERO);
        assert!(entry.is_none());
    }

    #[test]
    fn test_size_matches_serialized_payload() {
        let payload: Payload = serde_json::json!({"name": "timetable"}).into();
        let expected = serde_json::to_vec(&payload).unwrap().len() as u64;
        let entry = CacheEntry::new("k", payload, Tier::Ephemeral, t0(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(entry.size_bytes, expected);
    }

    #[test]
    fn test_bytes_payload_serializes_as_hex() {
        let payload = Payload::Bytes(vec![0xde, 0xad]);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"kind":"bytes","data":"dead"}"#);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }
}
