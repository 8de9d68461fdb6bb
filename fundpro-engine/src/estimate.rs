//! Real-time fund value estimate.
//!
//! Approximates a fund's intraday move from the live moves of its disclosed
//! top holdings:
//!
//! ```text
//! base_change   = Σ(weight × stock_change%) / 100      (quoted holdings only)
//! change%       = base_change × correction_factor
//! estimate      = last_net_value × (1 + change% / 100)
//! ```
//!
//! The top-N holdings typically cover 60-80% of a fund, so the correction
//! factor projects the undisclosed remainder as moving with the disclosed part.
//! Holdings without a quote contribute zero change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fundpro_common::config::EstimateConfig;

use crate::data::{HoldingsSnapshot, NetValue, QuoteMap};
use crate::error::{FundError, Result};

/// Decimal places kept in the estimated value and change amount.
const DISPLAY_DECIMALS: i32 = 4;

/// Guard against values like 1.51619999999 truncating one unit low.
const TRUNCATION_EPSILON: f64 = 1e-9;

/// Truncate toward zero to [`DISPLAY_DECIMALS`] places.
pub fn truncate_decimals(value: f64) -> f64 {
    let scale = 10f64.powi(DISPLAY_DECIMALS);
    let scaled = value.abs() * scale + TRUNCATION_EPSILON * scale;
    scaled.trunc().copysign(value) / scale
}

/// One quoted holding's share of the estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingContribution {
    pub stock_code: String,
    pub stock_name: String,
    /// Percent of net value
    pub weight: f64,
    /// Stock percent change
    pub change_percent: f64,
    /// weight × change / 100, before correction
    pub contribution: f64,
}

/// Estimated current fund value. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundEstimate {
    pub fund_code: String,
    /// Estimated per-share value, truncated to 4 decimals
    pub estimated_value: f64,
    /// estimated_value - last_net_value, truncated to 4 decimals
    pub change_amount: f64,
    /// Corrected percent change versus last net value (unrounded)
    pub change_percent: f64,
    /// Weighted change of the disclosed holdings before correction
    pub base_change_percent: f64,
    pub correction_factor: f64,
    pub last_net_value: f64,
    pub net_value_date: NaiveDate,
    /// Holdings considered (top-N)
    pub holdings_count: usize,
    /// Holdings that had a quote
    pub quoted_count: usize,
    /// Sum of weights of the quoted holdings
    pub quoted_weight: f64,
    /// Per-holding detail, rank order
    pub contributions: Vec<HoldingContribution>,
    pub computed_at: DateTime<Utc>,
    pub market_open: bool,
}

impl FundEstimate {
    /// Percent change for display. `None` while the market is closed, since
    /// the number then reflects the last session rather than live trading.
    pub fn display_change_percent(&self) -> Option<f64> {
        self.market_open.then_some(self.change_percent)
    }

    /// Whether any holding was missing a quote.
    pub fn is_partial(&self) -> bool {
        self.quoted_count < self.holdings_count
    }
}

/// Stateless estimate calculator.
#[derive(Debug, Clone)]
pub struct RealtimeEstimateEngine {
    correction_factor: f64,
    top_n: usize,
}

impl RealtimeEstimateEngine {
    pub fn new(correction_factor: f64, top_n: usize) -> Self {
        Self {
            correction_factor,
            top_n: top_n.max(1),
        }
    }

    pub fn from_config(config: &EstimateConfig) -> Self {
        Self::new(config.correction_factor, config.top_n)
    }

    pub fn correction_factor(&self) -> f64 {
        self.correction_factor
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Estimate a fund's current value.
    ///
    /// Fails with `InsufficientData` for an empty snapshot and with
    /// `DataUnavailable` when the last net value is not a positive number.
    pub fn estimate(
        &self,
        fund_code: &str,
        snapshot: &HoldingsSnapshot,
        quotes: &QuoteMap,
        last_net_value: &NetValue,
        market_open: bool,
        now: DateTime<Utc>,
    ) -> Result<FundEstimate> {
        if snapshot.is_empty() {
            return Err(FundError::InsufficientData(format!(
                "no disclosed holdings for fund {}",
                fund_code
            )));
        }

        let nav = last_net_value.value;
        if !nav.is_finite() || nav <= 0.0 {
            return Err(FundError::DataUnavailable(format!(
                "no usable last net value for fund {} (got {})",
                fund_code, nav
            )));
        }

        let holdings = snapshot.top(self.top_n);
        let mut contributions = Vec::with_capacity(holdings.len());
        let mut weighted_sum = 0.0;
        let mut quoted_weight = 0.0;

        for holding in holdings {
            let Some(quote) = quotes.get(&holding.stock_code) else {
                continue;
            };
            let product = holding.weight * quote.change_percent;
            weighted_sum += product;
            quoted_weight += holding.weight;
            contributions.push(HoldingContribution {
                stock_code: holding.stock_code.clone(),
                stock_name: holding.stock_name.clone(),
                weight: holding.weight,
                change_percent: quote.change_percent,
                contribution: product / 100.0,
            });
        }

        let base_change_percent = weighted_sum / 100.0;
        let change_percent = base_change_percent * self.correction_factor;
        let raw_value = nav * (1.0 + change_percent / 100.0);
        let estimated_value = truncate_decimals(raw_value);

        debug!(
            fund_code,
            quoted = contributions.len(),
            holdings = holdings.len(),
            base_change_percent,
            change_percent,
            market_open,
            "Fund estimate computed"
        );

        Ok(FundEstimate {
            fund_code: fund_code.to_string(),
            estimated_value,
            change_amount: truncate_decimals(raw_value - nav),
            change_percent,
            base_change_percent,
            correction_factor: self.correction_factor,
            last_net_value: nav,
            net_value_date: last_net_value.as_of,
            holdings_count: holdings.len(),
            quoted_count: contributions.len(),
            quoted_weight,
            contributions,
            computed_at: now,
            market_open,
        })
    }
}

impl Default for RealtimeEstimateEngine {
    fn default() -> Self {
        Self::from_config(&EstimateConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
