//! FundPro Engine - estimate and attribution service for A-share funds.
//!
//! Opens the local holdings database, syncs disclosed holdings, warms the
//! attribution cache, and runs the scheduled refresh until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use fundpro_common::config::Config;
use fundpro_common::logging::init_logging;
use fundpro_engine::data::{
    EastmoneyHoldingsSource, EastmoneyQuoteSource, LocalStorage, StaticSectorTable,
    TencentNetValueSource,
};
use fundpro_engine::{
    AshareCalendar, AttributionRefreshScheduler, Collaborators, FundService, HoldingsSync,
};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load_and_validate()?;
    init_logging(&config.observability);

    tracing::info!("FundPro Engine v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config.db_path();
    let storage = Arc::new(
        LocalStorage::new(&db_path)
            .with_context(|| format!("Failed to open {}", db_path.display()))?,
    );

    let collaborators = Collaborators {
        holdings: storage.clone(),
        quotes: Arc::new(EastmoneyQuoteSource::new(Duration::from_secs(
            config.service.quote_timeout_secs,
        ))),
        market: Arc::new(AshareCalendar::from_config(&config.market)),
        sectors: Arc::new(StaticSectorTable::from_config(&config.sectors)),
        net_values: Arc::new(TencentNetValueSource::new(Duration::from_secs(
            config.service.collaborator_timeout_secs,
        ))),
    };

    let service =
        Arc::new(FundService::new(collaborators, &config).with_attribution_store(storage.clone()));

    if let Err(e) = service.warm_cache().await {
        tracing::warn!(error = %e, "Starting with a cold attribution cache");
    }

    let mut scheduler = AttributionRefreshScheduler::new(Arc::clone(&service), &config.refresh)?;
    if config.sync.enabled {
        let source = Arc::new(EastmoneyHoldingsSource::new(Duration::from_secs(
            config.service.quote_timeout_secs,
        )));
        let sync = Arc::new(HoldingsSync::from_config(source, storage.clone(), &config.sync));
        scheduler = scheduler.with_holdings_sync(Arc::clone(&sync));

        let funds = scheduler.resolve_funds().await;
        let report = sync.sync_funds(&funds).await;
        if !report.is_success() {
            tracing::warn!(
                failures = report.failures.len(),
                "Some funds have no fresh holdings"
            );
        }
    }
    let scheduler = Arc::new(scheduler);

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        cached = service.cache_stats().total_entries,
        "Service initialized in {:?}",
        startup_duration
    );

    let runner = Arc::clone(&scheduler);
    let handle = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!(error = %e, "Attribution refresh scheduler failed");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    scheduler.stop().await;
    handle.abort();

    Ok(())
}
