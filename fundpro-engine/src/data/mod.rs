//! Fund data inputs and the collaborators that supply them.
//!
//! The engines never fetch anything themselves; they receive the types in this
//! module already populated by the collaborators declared in [`provider`].
//!
//! # Data Sources
//! - **Eastmoney** (quotes): batch real-time quotes for the disclosed holdings
//! - **Eastmoney F10** (holdings): quarterly disclosed top holdings
//! - **Tencent** (net value): last published per-share net value
//! - **LocalStorage** (SQLite): holdings snapshots and persisted attributions
//! - **StaticSectorTable**: stock code → sector board mapping

mod eastmoney;
mod fund_portfolio;
pub mod local_storage;
mod provider;
mod sector_table;
mod tencent;

pub use eastmoney::EastmoneyQuoteSource;
pub use fund_portfolio::EastmoneyHoldingsSource;
pub use local_storage::LocalStorage;
pub use provider::{
    AttributionStore, HoldingsSource, HoldingsStore, MarketStatus, NetValueSource, ProviderError,
    QuoteSource, SectorLookup,
};
pub use sector_table::StaticSectorTable;
pub use tencent::TencentNetValueSource;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Upper bound on the sum of disclosed weights, with room for float noise.
const MAX_TOTAL_WEIGHT: f64 = 100.0 + 1e-6;

// ============================================================================
// Holdings
// ============================================================================

/// A single disclosed stock position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockHolding {
    /// 6-digit stock code (e.g. "600519")
    pub stock_code: String,
    /// Stock display name
    pub stock_name: String,
    /// Weight as a percent of fund net value
    pub weight: f64,
    /// 1-based rank within the snapshot
    pub rank: u32,
}

impl StockHolding {
    pub fn new(
        stock_code: impl Into<String>,
        stock_name: impl Into<String>,
        weight: f64,
        rank: u32,
    ) -> Self {
        Self {
            stock_code: stock_code.into(),
            stock_name: stock_name.into(),
            weight,
            rank,
        }
    }
}

/// A fund's disclosed top holdings for one reporting period.
///
/// Immutable once stored for a given (fund code, quarter). Holdings are kept
/// ordered by rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsSnapshot {
    /// Fund code
    pub fund_code: String,
    /// Disclosure period label (e.g. "2025年4季度股票投资明细")
    pub quarter: String,
    /// Holdings ordered by rank
    pub holdings: Vec<StockHolding>,
}

impl HoldingsSnapshot {
    /// Build a snapshot, ordering holdings by rank.
    pub fn new(
        fund_code: impl Into<String>,
        quarter: impl Into<String>,
        mut holdings: Vec<StockHolding>,
    ) -> Self {
        holdings.sort_by_key(|h| h.rank);
        Self {
            fund_code: fund_code.into(),
            quarter: quarter.into(),
            holdings,
        }
    }

    /// Identifier referenced by attributions derived from this snapshot.
    pub fn id(&self) -> String {
        format!("{}@{}", self.fund_code, self.quarter)
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    /// Sum of all disclosed weights.
    pub fn total_weight(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).sum()
    }

    /// The first `n` holdings by rank.
    pub fn top(&self, n: usize) -> &[StockHolding] {
        &self.holdings[..n.min(self.holdings.len())]
    }

    /// Stock codes of the first `n` holdings by rank.
    pub fn stock_codes(&self, n: usize) -> HashSet<String> {
        self.top(n).iter().map(|h| h.stock_code.clone()).collect()
    }

    /// Check the structural invariants: non-negative weights summing to at
    /// most 100, and unique 1-based ranks.
    pub fn validate(&self) -> Result<(), String> {
        let mut ranks = HashSet::new();
        for holding in &self.holdings {
            if !holding.weight.is_finite() || holding.weight < 0.0 {
                return Err(format!(
                    "holding {} has invalid weight {}",
                    holding.stock_code, holding.weight
                ));
            }
            if holding.rank == 0 {
                return Err(format!("holding {} has rank 0", holding.stock_code));
            }
            if !ranks.insert(holding.rank) {
                return Err(format!("duplicate rank {}", holding.rank));
            }
        }

        let total = self.total_weight();
        if total > MAX_TOTAL_WEIGHT {
            return Err(format!("weights sum to {:.4}, above 100", total));
        }

        Ok(())
    }
}

// ============================================================================
// Quotes & net value
// ============================================================================

/// Live quote for one stock. Fetched immediately before an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveQuote {
    /// 6-digit stock code
    pub stock_code: String,
    /// Stock display name
    #[serde(default)]
    pub name: String,
    /// Current price
    pub price: f64,
    /// Percent change versus prior close (1.5 means +1.5%)
    pub change_percent: f64,
    /// Quote time
    pub timestamp: DateTime<Utc>,
}

/// Quotes keyed by stock code. Entries may be missing.
pub type QuoteMap = HashMap<String, LiveQuote>;

/// A fund's last officially published per-share value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetValue {
    pub value: f64,
    pub as_of: NaiveDate,
}

// ============================================================================
// Sectors
// ============================================================================

/// A market sector board.
///
/// Ordering is by code then name, which gives the deterministic final
/// tie-break in attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sector {
    /// Board code (e.g. "BK0438")
    pub code: String,
    /// Board name (e.g. "食品饮料")
    pub name: String,
}

impl Sector {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

// ============================================================================
// Tests
// ============================================================================
