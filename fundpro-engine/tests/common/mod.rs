//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use fundpro_common::config::Config;
use fundpro_engine::data::{
    AttributionStore, HoldingsStore, MarketStatus, NetValueSource, ProviderError, QuoteSource,
    SectorLookup,
};
use fundpro_engine::data::{HoldingsSnapshot, LiveQuote, NetValue, QuoteMap, Sector, StockHolding};
use fundpro_engine::{Collaborators, FundService, SectorAttribution};

// ============================================================================
// Holdings
// ============================================================================

/// In-memory holdings store with an optional artificial delay
#[derive(Default)]
pub struct MockHoldings {
    snapshots: Mutex<HashMap<String, HoldingsSnapshot>>,
    synced_at: Mutex<HashMap<String, DateTime<Utc>>>,
    delay: Mutex<Option<Duration>>,
    pub snapshot_calls: AtomicU32,
}

impl MockHoldings {
    pub fn with_snapshot(snapshot: HoldingsSnapshot) -> Self {
        let holdings = Self::default();
        holdings.store(snapshot);
        holdings
    }

    /// Store a snapshot and record the sync time as now.
    pub fn store(&self, snapshot: HoldingsSnapshot) {
        let fund_code = snapshot.fund_code.clone();
        self.snapshots.lock().unwrap().insert(fund_code.clone(), snapshot);
        self.synced_at.lock().unwrap().insert(fund_code, Utc::now());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Forget the recorded sync time, leaving only the TTL to expire entries.
    pub fn clear_sync_time(&self, fund_code: &str) {
        self.synced_at.lock().unwrap().remove(fund_code);
    }

    pub fn calls(&self) -> u32 {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HoldingsStore for MockHoldings {
    async fn get_snapshot(&self, fund_code: &str) -> Result<HoldingsSnapshot, ProviderError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        // Read first, then delay: a store during the delay lands after the read.
        let snapshot = self.snapshots.lock().unwrap().get(fund_code).cloned();
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        snapshot.ok_or_else(|| ProviderError::NotFound(fund_code.to_string()))
    }

    async fn get_last_sync_time(
        &self,
        fund_code: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(self.synced_at.lock().unwrap().get(fund_code).copied())
    }
}

// ============================================================================
// Quotes
// ============================================================================

/// Quote source serving fixed percent changes
pub struct MockQuotes {
    changes: HashMap<String, f64>,
    fail: bool,
    delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl MockQuotes {
    pub fn new(changes: &[(&str, f64)]) -> Self {
        Self {
            changes: changes.iter().map(|(c, p)| (c.to_string(), *p)).collect(),
            fail: false,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(&[])
        }
    }
}

#[async_trait]
impl QuoteSource for MockQuotes {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_quotes(&self, stock_codes: &HashSet<String>) -> Result<QuoteMap, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ProviderError::Network("mock quote feed down".into()));
        }

        Ok(stock_codes
            .iter()
            .filter_map(|code| {
                self.changes.get(code).map(|change| {
                    (
                        code.clone(),
                        LiveQuote {
                            stock_code: code.clone(),
                            name: String::new(),
                            price: 10.0,
                            change_percent: *change,
                            timestamp: Utc::now(),
                        },
                    )
                })
            })
            .collect())
    }
}

// ============================================================================
// Market, sectors, net values
// ============================================================================

pub struct FixedMarket(pub bool);

impl MarketStatus for FixedMarket {
    fn is_open(&self, _now: DateTime<Utc>) -> bool {
        self.0
    }
}

/// Sector lookup that counts every resolution
#[derive(Default)]
pub struct CountingSectors {
    table: HashMap<String, Sector>,
    pub calls: AtomicU32,
}

impl CountingSectors {
    pub fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(stock, code, name)| (stock.to_string(), Sector::new(*code, *name)))
                .collect(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SectorLookup for CountingSectors {
    fn resolve_sector(&self, stock_code: &str) -> Option<Sector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table.get(stock_code).cloned()
    }
}

pub struct MockNetValues(pub Option<f64>);

#[async_trait]
impl NetValueSource for MockNetValues {
    async fn get_last_net_value(&self, fund_code: &str) -> Result<NetValue, ProviderError> {
        match self.0 {
            Some(value) => Ok(NetValue {
                value,
                as_of: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            }),
            None => Err(ProviderError::NotFound(fund_code.to_string())),
        }
    }
}

/// Attribution store keeping every save in memory
#[derive(Default)]
pub struct MemoryAttributionStore {
    pub saved: Mutex<Vec<SectorAttribution>>,
}

#[async_trait]
impl AttributionStore for MemoryAttributionStore {
    async fn save_attribution(&self, attribution: &SectorAttribution) -> Result<(), ProviderError> {
        self.saved.lock().unwrap().push(attribution.clone());
        Ok(())
    }

    async fn load_attributions(&self) -> Result<Vec<SectorAttribution>, ProviderError> {
        Ok(self.saved.lock().unwrap().clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// The A/B/C reference snapshot: 30%, 20%, 10%.
pub fn abc_snapshot(fund_code: &str) -> HoldingsSnapshot {
    HoldingsSnapshot::new(
        fund_code,
        "2025Q4",
        vec![
            StockHolding::new("A", "Alpha", 30.0, 1),
            StockHolding::new("B", "Beta", 20.0, 2),
            StockHolding::new("C", "Gamma", 10.0, 3),
        ],
    )
}

/// A liquor fund: 80% in liquor names, 20% in an unmapped name.
pub fn liquor_snapshot(fund_code: &str) -> HoldingsSnapshot {
    HoldingsSnapshot::new(
        fund_code,
        "2025Q4",
        vec![
            StockHolding::new("600519", "贵州茅台", 30.0, 1),
            StockHolding::new("000858", "五粮液", 25.0, 2),
            StockHolding::new("600809", "山西汾酒", 25.0, 3),
            StockHolding::new("999999", "未知", 20.0, 4),
        ],
    )
}

pub fn liquor_sectors() -> CountingSectors {
    CountingSectors::new(&[
        ("600519", "BK0477", "酿酒行业"),
        ("000858", "BK0477", "酿酒行业"),
        ("600809", "BK0477", "酿酒行业"),
    ])
}

/// Wired service plus handles on the mocks it was built from.
pub struct Harness {
    pub service: Arc<FundService>,
    pub holdings: Arc<MockHoldings>,
    pub quotes: Arc<MockQuotes>,
    pub sectors: Arc<CountingSectors>,
    pub store: Arc<MemoryAttributionStore>,
}

pub fn harness_with(
    holdings: MockHoldings,
    quotes: MockQuotes,
    sectors: CountingSectors,
    net_value: Option<f64>,
    market_open: bool,
    config: &Config,
) -> Harness {
    let holdings = Arc::new(holdings);
    let quotes = Arc::new(quotes);
    let sectors = Arc::new(sectors);
    let store = Arc::new(MemoryAttributionStore::default());

    let collaborators = Collaborators {
        holdings: holdings.clone(),
        quotes: quotes.clone(),
        market: Arc::new(FixedMarket(market_open)),
        sectors: sectors.clone(),
        net_values: Arc::new(MockNetValues(net_value)),
    };
    let service = FundService::new(collaborators, config).with_attribution_store(store.clone());

    Harness {
        service: Arc::new(service),
        holdings,
        quotes,
        sectors,
        store,
    }
}

pub fn liquor_harness() -> Harness {
    harness_with(
        MockHoldings::with_snapshot(liquor_snapshot("161725")),
        MockQuotes::new(&[]),
        liquor_sectors(),
        Some(1.0),
        true,
        &Config::default(),
    )
}
