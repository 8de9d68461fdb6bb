//! Holdings-derived sector attribution.
//!
//! Infers which sector board a fund belongs to from its disclosed holdings:
//! holdings are grouped by resolved sector, weights summed per sector, and the
//! heaviest sector wins. Confidence is the winner's share of the resolvable
//! weight; when too little of the snapshot resolves, the result is flagged as
//! degraded and confidence is capped at the coverage ratio.
//!
//! # Tie-break
//!
//! Equal aggregate weights are decided by the sector holding the single
//! heaviest position, then by the lexicographically smaller sector code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

use fundpro_common::config::AttributionConfig;

use crate::data::{HoldingsSnapshot, Sector, SectorLookup, StockHolding};
use crate::error::{FundError, Result};

/// Tolerance for treating two weight sums as equal.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Aggregate weight of one sector within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorWeight {
    pub sector_code: String,
    pub sector_name: String,
    /// Summed percent-of-net-value weight
    pub weight: f64,
    /// Number of holdings mapped to the sector
    pub holdings: usize,
}

/// Inferred sector of a fund. Superseded as a whole on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorAttribution {
    pub fund_code: String,
    pub sector_code: String,
    pub sector_name: String,
    /// Share of resolvable weight in the dominant sector, in [0, 1]
    pub confidence: f64,
    /// Share of disclosed weight that resolved to a known sector, in [0, 1]
    pub coverage: f64,
    /// Coverage fell below the configured minimum
    pub degraded: bool,
    /// Identifier of the holdings snapshot this was computed from
    pub derived_from: String,
    pub justification: String,
    /// Resolved sectors, heaviest first
    pub sector_weights: Vec<SectorWeight>,
    /// Time the source snapshot was read
    pub computed_at: DateTime<Utc>,
}

impl SectorAttribution {
    pub fn sector(&self) -> Sector {
        Sector::new(&self.sector_code, &self.sector_name)
    }
}

/// Holdings grouped under one sector.
struct SectorGroup<'a> {
    weight: f64,
    holdings: Vec<&'a StockHolding>,
}

impl SectorGroup<'_> {
    fn heaviest_holding(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).fold(0.0, f64::max)
    }
}

/// Stateless sector attribution calculator.
#[derive(Debug, Clone)]
pub struct SectorAttributionEngine {
    min_coverage: f64,
    justification_holdings: usize,
}

impl SectorAttributionEngine {
    pub fn new(min_coverage: f64, justification_holdings: usize) -> Self {
        Self {
            min_coverage: min_coverage.clamp(0.0, 1.0),
            justification_holdings: justification_holdings.max(1),
        }
    }

    pub fn from_config(config: &AttributionConfig) -> Self {
        Self::new(config.min_coverage, config.justification_holdings)
    }

    pub fn min_coverage(&self) -> f64 {
        self.min_coverage
    }

    /// Attribute a fund to its dominant sector.
    ///
    /// Calls `lookup` exactly once per holding. Fails with `InsufficientData`
    /// when the snapshot is empty, carries no weight, or has no holding with a
    /// known sector.
    pub fn attribute(
        &self,
        fund_code: &str,
        snapshot: &HoldingsSnapshot,
        lookup: &dyn SectorLookup,
        now: DateTime<Utc>,
    ) -> Result<SectorAttribution> {
        if snapshot.is_empty() {
            return Err(FundError::InsufficientData(format!(
                "empty holdings snapshot for fund {}",
                fund_code
            )));
        }

        let total_weight = snapshot.total_weight();
        if total_weight.is_nan() || total_weight <= 0.0 {
            return Err(FundError::InsufficientData(format!(
                "holdings snapshot {} carries no weight",
                snapshot.id()
            )));
        }

        let mut groups: BTreeMap<Sector, SectorGroup<'_>> = BTreeMap::new();
        let mut resolved_count = 0usize;
        for holding in &snapshot.holdings {
            if let Some(sector) = lookup.resolve_sector(&holding.stock_code) {
                resolved_count += 1;
                let group = groups.entry(sector).or_insert_with(|| SectorGroup {
                    weight: 0.0,
                    holdings: Vec::new(),
                });
                group.weight += holding.weight;
                group.holdings.push(holding);
            }
        }

        let resolved_weight: f64 = groups.values().map(|g| g.weight).sum();
        let Some((dominant, group)) = pick_dominant(&groups).filter(|_| resolved_weight > 0.0)
        else {
            return Err(FundError::InsufficientData(format!(
                "no holding in snapshot {} resolves to a known sector",
                snapshot.id()
            )));
        };

        let share = (group.weight / resolved_weight).clamp(0.0, 1.0);
        let coverage = (resolved_weight / total_weight).clamp(0.0, 1.0);
        let degraded = coverage < self.min_coverage;
        let confidence = if degraded { share.min(coverage) } else { share };

        let justification = self.justify(
            dominant,
            group,
            share,
            confidence,
            coverage,
            degraded,
            resolved_count,
            snapshot.len(),
        );

        let mut sector_weights: Vec<SectorWeight> = groups
            .iter()
            .map(|(sector, g)| SectorWeight {
                sector_code: sector.code.clone(),
                sector_name: sector.name.clone(),
                weight: g.weight,
                holdings: g.holdings.len(),
            })
            .collect();
        sector_weights.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.sector_code.cmp(&b.sector_code))
        });

        debug!(
            fund_code,
            sector = %dominant,
            confidence,
            coverage,
            degraded,
            "Sector attribution computed"
        );

        Ok(SectorAttribution {
            fund_code: fund_code.to_string(),
            sector_code: dominant.code.clone(),
            sector_name: dominant.name.clone(),
            confidence,
            coverage,
            degraded,
            derived_from: snapshot.id(),
            justification,
            sector_weights,
            computed_at: now,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn justify(
        &self,
        sector: &Sector,
        group: &SectorGroup<'_>,
        share: f64,
        confidence: f64,
        coverage: f64,
        degraded: bool,
        resolved_count: usize,
        holdings_count: usize,
    ) -> String {
        let mut drivers = group.holdings.clone();
        drivers.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.rank.cmp(&b.rank)));

        let names: Vec<String> = drivers
            .iter()
            .take(self.justification_holdings)
            .map(|h| format!("{} {:.2}%", h.stock_name, h.weight))
            .collect();

        let mut text = format!(
            "{} holds {:.2}% of resolved weight ({} holdings, {:.2}% of net value). Top holdings: {}. Coverage: {:.1}% of disclosed weight resolved ({} of {} holdings).",
            sector,
            share * 100.0,
            group.holdings.len(),
            group.weight,
            names.join(", "),
            coverage * 100.0,
            resolved_count,
            holdings_count,
        );

        if degraded {
            let _ = write!(
                text,
                " Degraded coverage: below the {:.1}% minimum, confidence capped at {:.4}.",
                self.min_coverage * 100.0,
                confidence,
            );
        }

        text
    }
}

impl Default for SectorAttributionEngine {
    fn default() -> Self {
        Self::from_config(&AttributionConfig::default())
    }
}

/// Heaviest sector, with the documented tie-break. `groups` iterates in
/// sector order, so the first of equal candidates has the smaller code.
fn pick_dominant<'m, 'a>(
    groups: &'m BTreeMap<Sector, SectorGroup<'a>>,
) -> Option<(&'m Sector, &'m SectorGroup<'a>)> {
    groups.iter().fold(None, |best, candidate| match best {
        None => Some(candidate),
        Some(current) => {
            if outranks(candidate.1, current.1) {
                Some(candidate)
            } else {
                Some(current)
            }
        }
    })
}

fn outranks(candidate: &SectorGroup<'_>, current: &SectorGroup<'_>) -> bool {
    let diff = candidate.weight - current.weight;
    if diff.abs() > WEIGHT_EPSILON {
        return diff > 0.0;
    }
    candidate.heaviest_holding() > current.heaviest_holding() + WEIGHT_EPSILON
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLookup(HashMap<&'static str, Sector>);

    impl SectorLookup for MapLookup {
        fn resolve_sector(&self, stock_code: &str) -> Option<Sector> {
            self.0.get(stock_code).cloned()
        }
    }

    fn liquor() -> Sector {
        Sector::new("BK0438", "食品饮料")
    }

    fn banks() -> Sector {
        Sector::new("BK0736", "银行")
    }

    fn brokers() -> Sector {
        Sector::new("BK0737", "证券")
    }

    fn snapshot(holdings: &[(&str, f64)]) -> HoldingsSnapshot {
        HoldingsSnapshot::new(
            "161725",
            "2025Q4",
            holdings
                .iter()
                .enumerate()
                .map(|(i, (code, weight))| {
                    StockHolding::new(*code, format!("Stock{}", code), *weight, i as u32 + 1)
                })
                .collect(),
        )
    }

    #[test]
    fn test_single_sector_with_unknown_remainder() {
        let lookup = MapLookup(HashMap::from([
            ("600519", liquor()),
            ("000858", liquor()),
            ("600809", liquor()),
        ]));
        let snap = snapshot(&[
            ("600519", 40.0),
            ("000858", 25.0),
            ("600809", 15.0),
            ("999999", 20.0),
        ]);

        let result = SectorAttributionEngine::default()
            .attribute("161725", &snap, &lookup, Utc::now())
            .unwrap();

        assert_eq!(result.sector_code, "BK0438");
        assert_eq!(result.confidence, 1.0);
        assert!((result.coverage - 0.8).abs() < 1e-12);
        assert!(!result.degraded);
        assert!(result.justification.contains("80.0% of disclosed weight resolved"));
        assert_eq!(result.derived_from, "161725@2025Q4");
    }

    #[test]
    fn test_confidence_is_dominant_share() {
        let lookup = MapLookup(HashMap::from([
            ("600519", liquor()),
            ("600036", banks()),
            ("601166", banks()),
        ]));
        let snap = snapshot(&[("600519", 30.0), ("600036", 20.0), ("601166", 10.0)]);

        let result = SectorAttributionEngine::default()
            .attribute("161725", &snap, &lookup, Utc::now())
            .unwrap();

        assert_eq!(result.sector_code, "BK0438");
        assert!((result.confidence - 0.5).abs() < 1e-12);
        assert_eq!(result.sector_weights.len(), 2);
        assert_eq!(result.sector_weights[0].sector_code, "BK0438");
        assert_eq!(result.sector_weights[1].holdings, 2);
    }

    #[test]
    fn test_tie_break_by_heaviest_holding() {
        let lookup = MapLookup(HashMap::from([
            ("600036", banks()),
            ("601166", banks()),
            ("600030", brokers()),
            ("601688", brokers()),
        ]));
        // Both sectors sum to 20; brokers hold the single heaviest position.
        let snap = snapshot(&[
            ("600030", 15.0),
            ("600036", 10.0),
            ("601166", 10.0),
            ("601688", 5.0),
        ]);

        let result = SectorAttributionEngine::default()
            .attribute("000001", &snap, &lookup, Utc::now())
            .unwrap();

        assert_eq!(result.sector_code, "BK0737");
    }

    #[test]
    fn test_tie_break_by_sector_code() {
        let lookup = MapLookup(HashMap::from([("600030", brokers()), ("600036", banks())]));
        let snap = snapshot(&[("600030", 10.0), ("600036", 10.0)]);

        let result = SectorAttributionEngine::default()
            .attribute("000001", &snap, &lookup, Utc::now())
            .unwrap();

        assert_eq!(result.sector_code, "BK0736");
    }

    #[test]
    fn test_degraded_coverage_caps_confidence() {
        let lookup = MapLookup(HashMap::from([("600519", liquor())]));
        let snap = snapshot(&[("600519", 20.0), ("111111", 30.0), ("222222", 30.0)]);

        let result = SectorAttributionEngine::default()
            .attribute("161725", &snap, &lookup, Utc::now())
            .unwrap();

        assert!(result.degraded);
        assert!((result.coverage - 0.25).abs() < 1e-12);
        assert!((result.confidence - 0.25).abs() < 1e-12);
        assert!(result.justification.contains("Degraded coverage"));
    }

    #[test]
    fn test_empty_snapshot_is_insufficient() {
        let lookup = MapLookup(HashMap::new());
        let snap = snapshot(&[]);
        let err = SectorAttributionEngine::default()
            .attribute("161725", &snap, &lookup, Utc::now())
            .unwrap_err();
        assert!(matches!(err, FundError::InsufficientData(_)));
    }

    #[test]
    fn test_nothing_resolves_is_insufficient() {
        let lookup = MapLookup(HashMap::new());
        let snap = snapshot(&[("600519", 20.0)]);
        let err = SectorAttributionEngine::default()
            .attribute("161725", &snap, &lookup, Utc::now())
            .unwrap_err();
        assert!(matches!(err, FundError::InsufficientData(_)));
    }

    #[test]
    fn test_justification_names_top_drivers() {
        let lookup = MapLookup(HashMap::from([
            ("600519", liquor()),
            ("000858", liquor()),
            ("600809", liquor()),
            ("000568", liquor()),
        ]));
        let snap = snapshot(&[
            ("000568", 5.0),
            ("600519", 15.0),
            ("000858", 12.0),
            ("600809", 9.0),
        ]);

        let result = SectorAttributionEngine::new(0.5, 2)
            .attribute("161725", &snap, &lookup, Utc::now())
            .unwrap();

        assert!(result
            .justification
            .contains("Top holdings: Stock600519 15.00%, Stock000858 12.00%."));
        assert!(!result.justification.contains("Stock000568"));
    }

    #[test]
    fn test_deterministic() {
        let lookup = MapLookup(HashMap::from([
            ("600519", liquor()),
            ("600036", banks()),
            ("600030", brokers()),
        ]));
        let snap = snapshot(&[("600519", 12.0), ("600036", 12.0), ("600030", 7.5)]);
        let engine = SectorAttributionEngine::default();
        let now = Utc::now();

        let first = engine.attribute("161725", &snap, &lookup, now).unwrap();
        for _ in 0..5 {
            let again = engine.attribute("161725", &snap, &lookup, now).unwrap();
            assert_eq!(again.justification, first.justification);
            assert_eq!(again.sector_code, first.sector_code);
            assert_eq!(again.confidence, first.confidence);
        }
    }
}
