//! Service facade over the estimate and attribution pipelines.
//!
//! [`FundService`] is the only place that awaits collaborators. It fetches
//! inputs under bounded timeouts, hands them to the synchronous engines, and
//! owns the attribution cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use fundpro_common::config::Config;

use crate::attribution::{SectorAttribution, SectorAttributionEngine};
use crate::cache::{AttributionCache, CacheStats};
use crate::data::{
    AttributionStore, HoldingsStore, MarketStatus, NetValueSource, ProviderError, QuoteSource,
    SectorLookup,
};
use crate::error::{FundError, Result};
use crate::estimate::{FundEstimate, RealtimeEstimateEngine};

/// External collaborators the service reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub holdings: Arc<dyn HoldingsStore>,
    pub quotes: Arc<dyn QuoteSource>,
    pub market: Arc<dyn MarketStatus>,
    pub sectors: Arc<dyn SectorLookup>,
    pub net_values: Arc<dyn NetValueSource>,
}

/// Time budgets and freshness policy.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Budget for each holdings, net value, and store call
    pub collaborator_timeout: Duration,
    /// Budget for the quote fetch
    pub quote_timeout: Duration,
    /// Caller-side wait on an attribution recomputation
    pub attribution_timeout: Duration,
    /// Age after which a cached attribution is recomputed
    pub attribution_ttl: chrono::Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(config.service.collaborator_timeout_secs),
            quote_timeout: Duration::from_secs(config.service.quote_timeout_secs),
            attribution_timeout: Duration::from_secs(config.attribution.refresh_timeout_secs),
            attribution_ttl: chrono::Duration::try_days(config.attribution.ttl_days)
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// An attribution together with whether it is a last-known-good fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAttribution {
    #[serde(flatten)]
    pub attribution: SectorAttribution,
    /// True when served from cache after a failed or timed out refresh
    pub stale: bool,
}

/// Await a collaborator call within `limit`.
async fn bounded<T, F>(
    limit: Duration,
    what: &str,
    call: F,
) -> std::result::Result<T, ProviderError>
where
    F: Future<Output = std::result::Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(ProviderError::Timeout(format!("{} exceeded {:?}", what, limit))))
}

/// Fund estimate and attribution service
pub struct FundService {
    collaborators: Collaborators,
    attribution_store: Option<Arc<dyn AttributionStore>>,
    estimate_engine: RealtimeEstimateEngine,
    attribution_engine: SectorAttributionEngine,
    cache: Arc<AttributionCache>,
    settings: ServiceSettings,
}

impl FundService {
    /// Create a service with engines and budgets taken from `config`.
    pub fn new(collaborators: Collaborators, config: &Config) -> Self {
        Self {
            collaborators,
            attribution_store: None,
            estimate_engine: RealtimeEstimateEngine::from_config(&config.estimate),
            attribution_engine: SectorAttributionEngine::from_config(&config.attribution),
            cache: Arc::new(AttributionCache::new()),
            settings: ServiceSettings::from_config(config),
        }
    }

    /// Persist every recomputed attribution to `store`.
    pub fn with_attribution_store(mut self, store: Arc<dyn AttributionStore>) -> Self {
        self.attribution_store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<AttributionCache> {
        &self.cache
    }

    // ========================================================================
    // Estimate
    // ========================================================================

    /// Estimate a fund's current value from live quotes of its top holdings.
    ///
    /// Missing upstream values (no snapshot, no net value, quote feed down)
    /// fail with `DataUnavailable`; individual missing quotes only degrade
    /// the estimate.
    pub async fn get_estimate(&self, fund_code: &str) -> Result<FundEstimate> {
        let limit = self.settings.collaborator_timeout;
        let snapshot = bounded(
            limit,
            "holdings snapshot",
            self.collaborators.holdings.get_snapshot(fund_code),
        )
        .await
        .map_err(|e| unavailable(fund_code, "holdings", e))?;

        let stock_codes = snapshot.stock_codes(self.estimate_engine.top_n());
        let (net_value, quotes) = tokio::join!(
            bounded(
                limit,
                "net value",
                self.collaborators.net_values.get_last_net_value(fund_code),
            ),
            bounded(
                self.settings.quote_timeout,
                "quotes",
                self.collaborators.quotes.get_quotes(&stock_codes),
            ),
        );
        let net_value = net_value.map_err(|e| unavailable(fund_code, "net value", e))?;
        let quotes =
            quotes.map_err(|e| unavailable(fund_code, self.collaborators.quotes.name(), e))?;

        let now = Utc::now();
        let market_open = self.collaborators.market.is_open(now);
        self.estimate_engine
            .estimate(fund_code, &snapshot, &quotes, &net_value, market_open, now)
    }

    // ========================================================================
    // Attribution
    // ========================================================================

    /// Get the fund's sector attribution, recomputing it when forced, older
    /// than the TTL, or older than the fund's last holdings sync.
    ///
    /// Concurrent calls for the same fund share one recomputation. The wait
    /// is bounded; on expiry this fails with `Timeout` while the
    /// recomputation keeps running and still lands in the cache.
    pub async fn get_attribution(
        &self,
        fund_code: &str,
        force_refresh: bool,
    ) -> Result<SectorAttribution> {
        let last_sync = if force_refresh {
            None
        } else {
            self.last_sync_time(fund_code).await
        };

        let now = Utc::now();
        let ttl = self.settings.attribution_ttl;
        let is_fresh = |cached: &SectorAttribution| {
            !force_refresh
                && !self.cache.is_stale(fund_code, now, ttl)
                && last_sync.map_or(true, |synced| synced <= cached.computed_at)
        };

        let flight = self
            .cache
            .join_or_start(fund_code, is_fresh, || self.recompute(fund_code));
        if flight.is_cached() {
            debug!(fund_code, "Attribution served from cache");
            return flight.wait().await;
        }

        let limit = self.settings.attribution_timeout;
        match tokio::time::timeout(limit, flight.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(fund_code, timeout = ?limit, "Attribution refresh wait timed out");
                Err(FundError::Timeout(format!(
                    "attribution for fund {} not ready within {:?}",
                    fund_code, limit
                )))
            }
        }
    }

    /// Like [`get_attribution`](Self::get_attribution), but falls back to the
    /// last cached attribution, marked stale, when the refresh times out or
    /// upstream data is unavailable.
    pub async fn get_attribution_or_stale(&self, fund_code: &str) -> Result<CachedAttribution> {
        match self.get_attribution(fund_code, false).await {
            Ok(attribution) => Ok(CachedAttribution {
                attribution,
                stale: false,
            }),
            Err(err) if err.is_retryable() => match self.cache.get(fund_code) {
                Some(attribution) => {
                    warn!(fund_code, error = %err, "Serving stale attribution");
                    Ok(CachedAttribution {
                        attribution,
                        stale: true,
                    })
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Drop the cached attribution so the next request recomputes it.
    pub fn invalidate_attribution(&self, fund_code: &str) {
        self.cache.invalidate(fund_code);
    }

    /// Load persisted attributions into the cache. Returns how many were loaded.
    pub async fn warm_cache(&self) -> Result<usize> {
        let Some(store) = &self.attribution_store else {
            return Ok(0);
        };

        let attributions = bounded(
            self.settings.collaborator_timeout,
            "attribution store",
            store.load_attributions(),
        )
        .await?;
        let loaded = self.cache.warm(attributions);
        info!(loaded, "Attribution cache warmed");
        Ok(loaded)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats(Utc::now(), self.settings.attribution_ttl)
    }

    async fn last_sync_time(&self, fund_code: &str) -> Option<DateTime<Utc>> {
        let result = bounded(
            self.settings.collaborator_timeout,
            "holdings sync time",
            self.collaborators.holdings.get_last_sync_time(fund_code),
        )
        .await;

        result.unwrap_or_else(|e| {
            warn!(fund_code, error = %e, "Could not read holdings sync time");
            None
        })
    }

    /// Recomputation future, detached from `self` so it can outlive the caller.
    fn recompute(
        &self,
        fund_code: &str,
    ) -> impl Future<Output = Result<SectorAttribution>> + Send + 'static {
        let holdings = Arc::clone(&self.collaborators.holdings);
        let sectors = Arc::clone(&self.collaborators.sectors);
        let store = self.attribution_store.clone();
        let engine = self.attribution_engine.clone();
        let limit = self.settings.collaborator_timeout;
        let fund_code = fund_code.to_string();

        async move {
            // Stamped before the read so a sync landing mid-read still
            // compares as newer than the attribution.
            let read_at = Utc::now();
            let snapshot = bounded(limit, "holdings snapshot", holdings.get_snapshot(&fund_code))
                .await
                .map_err(|e| match e {
                    ProviderError::NotFound(msg) => FundError::InsufficientData(msg),
                    other => FundError::from(other),
                })?;

            let attribution = engine.attribute(&fund_code, &snapshot, sectors.as_ref(), read_at)?;
            info!(
                fund_code = %fund_code,
                sector = %attribution.sector_code,
                confidence = attribution.confidence,
                coverage = attribution.coverage,
                degraded = attribution.degraded,
                "Sector attribution computed"
            );

            if let Some(store) = store {
                let saved = bounded(
                    limit,
                    "attribution store",
                    store.save_attribution(&attribution),
                )
                .await;
                if let Err(e) = saved {
                    warn!(fund_code = %fund_code, error = %e, "Failed to persist attribution");
                }
            }

            Ok(attribution)
        }
    }
}

fn unavailable(fund_code: &str, what: &str, err: ProviderError) -> FundError {
    FundError::DataUnavailable(format!("{} for fund {}: {}", what, fund_code, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.attribution_ttl, chrono::Duration::days(30));
        assert_eq!(settings.attribution_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_oversized_ttl_saturates() {
        let mut config = Config::default();
        config.attribution.ttl_days = i64::MAX;

        let settings = ServiceSettings::from_config(&config);
        assert_eq!(settings.attribution_ttl, chrono::Duration::MAX);
    }
}
