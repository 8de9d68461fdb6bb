//! Attribution cache with per-fund single-flight recomputation.
//!
//! Entries are whole [`SectorAttribution`] records replaced on every write, so
//! readers never see a partially updated value. At most one recomputation per
//! fund code runs at a time; callers arriving while it runs join the same
//! shared future instead of starting another.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::attribution::SectorAttribution;
use crate::error::{FundError, Result};

/// A recomputation result shared by every waiter.
pub type SharedAttribution = Shared<BoxFuture<'static, Result<SectorAttribution>>>;

/// Outcome of [`AttributionCache::join_or_start`].
pub enum Flight {
    /// The cached entry satisfied the freshness check.
    Cached(SectorAttribution),
    /// Another caller's recomputation was already running.
    Joined(SharedAttribution),
    /// This caller started the recomputation.
    Started(SharedAttribution),
}

impl Flight {
    /// Resolve to the attribution, waiting on the recomputation if needed.
    pub async fn wait(self) -> Result<SectorAttribution> {
        match self {
            Self::Cached(attribution) => Ok(attribution),
            Self::Joined(shared) | Self::Started(shared) => shared.await,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Attribution cache keyed by fund code.
pub struct AttributionCache {
    entries: RwLock<HashMap<String, SectorAttribution>>,
    in_flight: Mutex<HashMap<String, SharedAttribution>>,
}

impl AttributionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached attribution, stale or not.
    pub fn get(&self, fund_code: &str) -> Option<SectorAttribution> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(fund_code).cloned()
    }

    /// Replace the cached attribution for a fund.
    pub fn put(&self, fund_code: &str, attribution: SectorAttribution) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(fund_code.to_string(), attribution);
    }

    /// True when absent, or when older than `ttl` at `now`.
    pub fn is_stale(&self, fund_code: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.get(fund_code)
            .map_or(true, |attribution| now - attribution.computed_at > ttl)
    }

    /// Drop the cached attribution for a fund
    pub fn invalidate(&self, fund_code: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(fund_code);
    }

    /// Clear all cached attributions
    pub fn clear_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Whether a recomputation for the fund is running.
    pub fn is_in_flight(&self, fund_code: &str) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.contains_key(fund_code)
    }

    /// Return the cached entry if `is_fresh` accepts it; otherwise join the
    /// running recomputation for the fund, or start one with `compute`.
    ///
    /// The computation runs on its own task and writes its result through to
    /// the cache before it is unregistered, so a waiter giving up early never
    /// cancels it. Failures are shared with the waiters but not cached.
    /// Must be called from within a Tokio runtime.
    pub fn join_or_start<P, F, Fut>(
        self: &Arc<Self>,
        fund_code: &str,
        is_fresh: P,
        compute: F,
    ) -> Flight
    where
        P: FnOnce(&SectorAttribution) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SectorAttribution>> + Send + 'static,
    {
        // Held until the marker is registered; the task's completion takes
        // the same lock, so it cannot unregister before registration.
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(shared) = in_flight.get(fund_code) {
            debug!(fund_code, "Joining in-flight attribution");
            return Flight::Joined(shared.clone());
        }

        if let Some(cached) = self.get(fund_code) {
            if is_fresh(&cached) {
                return Flight::Cached(cached);
            }
        }

        debug!(fund_code, "Starting attribution recomputation");
        let cache = Arc::clone(self);
        let key = fund_code.to_string();
        let work = compute();
        let handle = tokio::spawn(async move {
            let result = work.await;
            cache.complete(&key, &result);
            result
        });

        let shared = async move {
            handle.await.unwrap_or_else(|e| {
                Err(FundError::Internal(format!("attribution task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(fund_code.to_string(), shared.clone());
        Flight::Started(shared)
    }

    fn complete(&self, fund_code: &str, result: &Result<SectorAttribution>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(attribution) => self.put(fund_code, attribution.clone()),
            Err(e) => warn!(fund_code, error = %e, "Attribution recomputation failed"),
        }
        in_flight.remove(fund_code);
    }

    /// Seed the cache with previously persisted attributions.
    pub fn warm(&self, attributions: Vec<SectorAttribution>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let count = attributions.len();
        for attribution in attributions {
            entries.insert(attribution.fund_code.clone(), attribution);
        }
        count
    }

    /// Get cache statistics
    pub fn stats(&self, now: DateTime<Utc>, ttl: Duration) -> CacheStats {
        let (total, stale) = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let stale = entries
                .values()
                .filter(|a| now - a.computed_at > ttl)
                .count();
            (entries.len(), stale)
        };
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len();

        CacheStats {
            total_entries: total,
            stale_entries: stale,
            in_flight,
        }
    }
}

impl Default for AttributionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub stale_entries: usize,
    pub in_flight: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    fn make_attribution(
        fund_code: &str,
        sector_code: &str,
        computed_at: DateTime<Utc>,
    ) -> SectorAttribution {
        SectorAttribution {
            fund_code: fund_code.to_string(),
            sector_code: sector_code.to_string(),
            sector_name: "食品饮料".to_string(),
            confidence: 0.9,
            coverage: 1.0,
            degraded: false,
            derived_from: format!("{}@2025Q4", fund_code),
            justification: "test".to_string(),
            sector_weights: Vec::new(),
            computed_at,
        }
    }

    #[test]
    fn test_put_get_overwrite() {
        let cache = AttributionCache::new();
        assert!(cache.get("161725").is_none());

        cache.put("161725", make_attribution("161725", "BK0438", Utc::now()));
        cache.put("161725", make_attribution("161725", "BK0736", Utc::now()));

        let cached = cache.get("161725").unwrap();
        assert_eq!(cached.sector_code, "BK0736");
    }

    #[test]
    fn test_is_stale() {
        let cache = AttributionCache::new();
        let now = Utc::now();
        let ttl = Duration::days(30);

        assert!(cache.is_stale("161725", now, ttl));

        cache.put("161725", make_attribution("161725", "BK0438", now - Duration::days(30)));
        assert!(!cache.is_stale("161725", now, ttl));

        cache.put("161725", make_attribution("161725", "BK0438", now - Duration::days(31)));
        assert!(cache.is_stale("161725", now, ttl));
    }

    #[test]
    fn test_invalidate_and_stats() {
        let cache = AttributionCache::new();
        let now = Utc::now();
        cache.put("161725", make_attribution("161725", "BK0438", now));
        cache.put("110022", make_attribution("110022", "BK0438", now - Duration::days(60)));

        let stats = cache.stats(now, Duration::days(30));
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.stale_entries, 1);
        assert_eq!(stats.in_flight, 0);

        cache.invalidate("161725");
        assert!(cache.get("161725").is_none());
        cache.clear_all();
        assert!(cache.get("110022").is_none());
    }

    #[tokio::test]
    async fn test_fresh_entry_served_from_cache() {
        let cache = Arc::new(AttributionCache::new());
        cache.put("161725", make_attribution("161725", "BK0438", Utc::now()));

        let flight = cache.join_or_start("161725", |_| true, || async {
            Err(FundError::Internal("must not run".into()))
        });
        assert!(flight.is_cached());
        assert_eq!(flight.wait().await.unwrap().sector_code, "BK0438");
    }

    #[tokio::test]
    async fn test_single_flight_dedup() {
        let cache = Arc::new(AttributionCache::new());
        let runs = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());

        let mut flights = Vec::new();
        for _ in 0..8 {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            flights.push(cache.join_or_start("161725", |_| false, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(make_attribution("161725", "BK0438", Utc::now()))
            }));
        }

        assert!(cache.is_in_flight("161725"));
        assert_eq!(flights.iter().filter(|f| matches!(f, Flight::Started(_))).count(), 1);

        gate.notify_one();
        for flight in flights {
            assert_eq!(flight.wait().await.unwrap().sector_code, "BK0438");
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!cache.is_in_flight("161725"));
        assert!(cache.get("161725").is_some());
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let cache = Arc::new(AttributionCache::new());
        let flight = cache.join_or_start("161725", |_| false, || async {
            Err(FundError::InsufficientData("empty".into()))
        });

        let err = flight.wait().await.unwrap_err();
        assert!(matches!(err, FundError::InsufficientData(_)));
        assert!(cache.get("161725").is_none());
        assert!(!cache.is_in_flight("161725"));
    }

    #[tokio::test]
    async fn test_warm() {
        let cache = AttributionCache::new();
        let loaded = cache.warm(vec![
            make_attribution("161725", "BK0438", Utc::now()),
            make_attribution("000001", "BK0736", Utc::now()),
        ]);
        assert_eq!(loaded, 2);
        assert_eq!(cache.get("000001").unwrap().sector_code, "BK0736");
    }
}
