//! smart-cache-tier maintenance daemon.
//!
//! Opens the file-backed durable tiers, restores access analytics, and
//! runs sweeps, analytics cleanup and prefetch cycles until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use smart_cache_tier::cache::clock::SystemClock;
use smart_cache_tier::cache::compressor::Compressor;
use smart_cache_tier::cache::engine::CacheEngine;
use smart_cache_tier::cache::events::spawn_change_logger;
use smart_cache_tier::cache::scheduler::spawn_maintenance;
use smart_cache_tier::config::{Cli, Config};
use smart_cache_tier::storage::durable::DurableStore;
use smart_cache_tier::storage::ephemeral::EphemeralStore;
use smart_cache_tier::storage::file_storage::FileStringStorage;
use smart_cache_tier::storage::indexed::IndexedStore;

/// How often the maintenance loop checks for due tasks.
const MAINTENANCE_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "smart_cache_tier=debug"
    } else {
        "smart_cache_tier=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("smart-cache-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.tiers.data_dir = data_dir;
    }

    info!(
        data_dir = %config.tiers.data_dir.display(),
        ephemeral_entries = config.tiers.ephemeral_max_entries,
        page = config.tiers.page_quota_bytes,
        session = config.tiers.session_quota_bytes,
        indexed = config.tiers.indexed_quota_bytes,
        total = config.total_capacity_bytes(),
        "Tier capacities"
    );

    // Open the durable tiers.
    let tiers = config.tiers.clone();
    let page = FileStringStorage::open(tiers.data_dir.join("page"), tiers.page_quota_bytes).await?;
    let session =
        FileStringStorage::open(tiers.data_dir.join("session"), tiers.session_quota_bytes).await?;
    let compressor = Compressor::new(config.compression.clone());

    let engine = Arc::new(
        CacheEngine::new(config, Arc::new(SystemClock))
            .with_store(Arc::new(EphemeralStore::new(
                tiers.ephemeral_max_entries,
                tiers.ephemeral_max_bytes,
            )))
            .with_store(Arc::new(DurableStore::page(tiers.page_prefix, Arc::new(page))))
            .with_store(Arc::new(DurableStore::session(
                tiers.session_prefix,
                Arc::new(session),
            )))
            .with_store(Arc::new(IndexedStore::new(
                tiers.indexed_quota_bytes,
                compressor,
            ))),
    );

    let _changes = spawn_change_logger(engine.subscribe(), engine.origin());
    engine.restore_analytics().await;

    if cli.once {
        let report = engine.sweep_expired().await;
        let purged = engine.purge_stale_analytics().await;
        info!(
            removed = report.total_removed(),
            purged,
            "Single maintenance pass complete"
        );
    } else {
        let maintenance = spawn_maintenance(engine.clone(), MAINTENANCE_TICK);
        info!("Maintenance loop running; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        maintenance.shutdown().await;
    }

    engine.shutdown();
    engine.persist_analytics().await;

    let stats = engine.get_stats().await;
    for (tier, tier_stats) in &stats.per_tier {
        info!(
            tier = %tier,
            entries = tier_stats.entry_count,
            used = tier_stats.used_bytes,
            "Tier usage"
        );
    }
    info!(
        usage = stats.estimated_usage_bytes,
        capacity = stats.estimated_capacity_bytes,
        hit_rate = stats.hit_rate(),
        expirations = stats.counters.expirations,
        "Final statistics"
    );

    Ok(())
}
