//! Runtime configuration for smart-cache-tier.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All engine knobs (tier capacities, TTLs, eviction weights, prefetch limits) live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "smart-cache-tier",
    about = "Maintenance daemon for a multi-tier predictive cache"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Directory holding the durable tiers (overrides the config file).
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Run a single maintenance pass and exit.
    #[arg(long)]
    pub once: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tier capacities and namespaces.
    pub tiers: TierConfig,

    /// TTL defaults and sweep cadence.
    pub expiry: ExpiryConfig,

    /// Retention scoring and quota guard tuning.
    pub eviction: EvictionConfig,

    /// Access analytics retention.
    pub analytics: AnalyticsConfig,

    /// Predictive prefetch settings.
    pub prefetch: PrefetchConfig,

    /// Compression settings for the indexed tier.
    pub compression: CompressionConfig,
}

/// Tier capacity and namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Maximum number of entries held by the ephemeral tier.
    pub ephemeral_max_entries: usize,

    /// Byte budget of the ephemeral tier.
    pub ephemeral_max_bytes: u64,

    /// Byte quota of the page-scoped durable storage.
    pub page_quota_bytes: u64,

    /// Byte quota of the session-scoped durable storage.
    pub session_quota_bytes: u64,

    /// Byte quota of the indexed tier.
    pub indexed_quota_bytes: u64,

    /// Directory for file-backed durable tiers (used by the binary).
    pub data_dir: PathBuf,

    /// Key prefix for the page-scoped tier.
    pub page_prefix: String,

    /// Key prefix for the session-scoped tier.
    pub session_prefix: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            ephemeral_max_entries: 100,
            ephemeral_max_bytes: 10 * 1024 * 1024,  // 10 MB
            page_quota_bytes: 5 * 1024 * 1024,      // 5 MB
            session_quota_bytes: 5 * 1024 * 1024,   // 5 MB
            indexed_quota_bytes: 50 * 1024 * 1024,  // 50 MB
            data_dir: PathBuf::from("/tmp/smart-cache"),
            page_prefix: "sc_page_".to_string(),
            session_prefix: "sc_session_".to_string(),
        }
    }
}

/// Time-to-live defaults and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// TTL applied when `set` is called without one.
    pub default_ttl_secs: u64,

    /// TTL applied to named network responses.
    pub response_ttl_secs: u64,

    /// Interval between scheduled expiry sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60 * 60,
            response_ttl_secs: 5 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

/// Retention scoring and quota guard weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Fraction of a tier's entries removed per eviction round.
    pub evict_fraction: f64,

    /// Age after which the retention score starts decaying.
    pub max_age_days: u64,

    /// Utilization ratio at which the quota guard evicts before a write.
    pub cleanup_threshold: f64,

    /// Retention multiplier for high-priority entries.
    pub high_priority_factor: f64,

    /// Retention multiplier for medium-priority entries.
    pub medium_priority_factor: f64,

    /// Retention multiplier for low-priority entries.
    pub low_priority_factor: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            evict_fraction: 0.25,
            max_age_days: 7,
            cleanup_threshold: 0.85,
            high_priority_factor: 2.0,
            medium_priority_factor: 1.0,
            low_priority_factor: 0.5,
        }
    }
}

/// Access analytics retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Records whose last access is older than this are purged.
    pub retention_days: u64,

    /// Interval between analytics cleanup passes.
    pub cleanup_interval_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            cleanup_interval_secs: 60 * 60,
        }
    }
}

/// Predictive prefetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Master switch for predictive prefetch.
    pub enabled: bool,

    /// Candidates at or below this confidence are never prefetched.
    pub min_confidence: f64,

    /// Candidate cap per trigger under normal conditions.
    pub max_candidates: usize,

    /// Candidate cap per trigger on constrained networks or devices.
    pub constrained_max_candidates: usize,

    /// Interval between scheduled prefetch cycles.
    pub interval_secs: u64,

    /// Resource suffixes that earn the critical-asset bonus.
    pub critical_extensions: Vec<String>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.3,
            max_candidates: 5,
            constrained_max_candidates: 2,
            interval_secs: 5 * 60,
            critical_extensions: [".css", ".js", ".mjs", ".woff", ".woff2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Compression settings for indexed-tier records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Apply zstd compression to indexed-tier records.
    pub enabled: bool,

    /// Records smaller than this are stored uncompressed.
    pub min_bytes: usize,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_bytes: 1024,
            zstd_level: 3,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Default TTL for `set` without an explicit one.
    pub fn default_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expiry.default_ttl_secs)
    }

    /// Default TTL for named network responses.
    pub fn response_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expiry.response_ttl_secs)
    }

    /// Total byte capacity across all tiers.
    pub fn total_capacity_bytes(&self) -> u64 {
        self.tiers.ephemeral_max_bytes
            + self.tiers.page_quota_bytes
            + self.tiers.session_quota_bytes
            + self.tiers.indexed_quota_bytes
    }
}
