//! Property tests for the estimate and attribution engines.

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use std::collections::HashMap;

use fundpro_engine::data::{
    HoldingsSnapshot, LiveQuote, NetValue, QuoteMap, Sector, SectorLookup, StockHolding,
};
use fundpro_engine::{RealtimeEstimateEngine, SectorAttributionEngine};

struct MapLookup(HashMap<String, Sector>);

impl SectorLookup for MapLookup {
    fn resolve_sector(&self, stock_code: &str) -> Option<Sector> {
        self.0.get(stock_code).cloned()
    }
}

/// Up to 10 holdings, weights summing to at most 100, with a change each.
fn holdings_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.1f64..10.0, -10.0f64..10.0), 1..=10)
}

fn holding(i: usize, weight: f64) -> StockHolding {
    StockHolding::new(format!("S{:02}", i), format!("Stock {}", i), weight, i as u32 + 1)
}

fn build(rows: &[(f64, f64)]) -> (HoldingsSnapshot, QuoteMap) {
    let holdings = rows
        .iter()
        .enumerate()
        .map(|(i, (weight, _))| holding(i, *weight))
        .collect();
    let quotes = rows
        .iter()
        .enumerate()
        .map(|(i, (_, change))| {
            let code = format!("S{:02}", i);
            (
                code.clone(),
                LiveQuote {
                    stock_code: code,
                    name: String::new(),
                    price: 10.0,
                    change_percent: *change,
                    timestamp: Utc::now(),
                },
            )
        })
        .collect();
    (HoldingsSnapshot::new("000001", "2025Q4", holdings), quotes)
}

fn nav() -> NetValue {
    NetValue {
        value: 1.2345,
        as_of: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
    }
}

/// Sectors cycle over three boards by index; `unknown` extra holdings have none.
fn sector_lookup(count: usize) -> MapLookup {
    let boards = [("BK0001", "Alpha"), ("BK0002", "Beta"), ("BK0003", "Gamma")];
    MapLookup(
        (0..count)
            .map(|i| {
                let (code, name) = boards[i % boards.len()];
                (format!("S{:02}", i), Sector::new(code, name))
            })
            .collect(),
    )
}

proptest! {
    #[test]
    fn estimate_matches_weighted_formula(rows in holdings_strategy(), factor in 1.01f64..2.0) {
        let (snapshot, quotes) = build(&rows);
        let engine = RealtimeEstimateEngine::new(factor, 10);
        let estimate = engine
            .estimate("000001", &snapshot, &quotes, &nav(), true, Utc::now())
            .unwrap();

        let expected = rows.iter().map(|(w, c)| w * c).sum::<f64>() / 100.0 * factor;
        prop_assert!((estimate.change_percent - expected).abs() < 1e-9);
        prop_assert_eq!(estimate.quoted_count, rows.len());
    }

    #[test]
    fn missing_quote_removes_only_its_contribution(
        rows in holdings_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        let (snapshot, mut quotes) = build(&rows);
        let engine = RealtimeEstimateEngine::new(1.2, 10);
        let full = engine
            .estimate("000001", &snapshot, &quotes, &nav(), true, Utc::now())
            .unwrap();

        let i = pick.index(rows.len());
        quotes.remove(&format!("S{:02}", i));
        let partial = engine
            .estimate("000001", &snapshot, &quotes, &nav(), true, Utc::now())
            .unwrap();

        let removed = rows[i].0 * rows[i].1 / 100.0 * 1.2;
        prop_assert!((full.change_percent - partial.change_percent - removed).abs() < 1e-9);
        prop_assert_eq!(partial.quoted_count, rows.len() - 1);
    }

    #[test]
    fn confidence_bounded_and_monotonic_in_unknown_weight(
        rows in holdings_strategy(),
        unknown in prop::collection::vec(0.1f64..10.0, 0..6),
    ) {
        let engine = SectorAttributionEngine::new(0.5, 3);
        let lookup = sector_lookup(rows.len());

        let mut previous = f64::INFINITY;
        for extra in 0..=unknown.len() {
            let mut holdings: Vec<StockHolding> = rows
                .iter()
                .enumerate()
                .map(|(i, (w, _))| holding(i, *w))
                .collect();
            for (j, w) in unknown.iter().take(extra).enumerate() {
                let rank = (rows.len() + j) as u32 + 1;
                holdings.push(StockHolding::new(format!("U{:02}", j), "Unmapped", *w, rank));
            }
            let snapshot = HoldingsSnapshot::new("000001", "2025Q4", holdings);

            let attribution = engine.attribute("000001", &snapshot, &lookup, Utc::now()).unwrap();
            prop_assert!((0.0..=1.0).contains(&attribution.confidence));
            prop_assert!(attribution.confidence <= previous + 1e-12);
            previous = attribution.confidence;
        }
    }

    #[test]
    fn attribution_is_deterministic(rows in holdings_strategy()) {
        let (snapshot, _) = build(&rows);
        let engine = SectorAttributionEngine::default();
        let lookup = sector_lookup(rows.len());
        let now = Utc::now();

        let first = engine.attribute("000001", &snapshot, &lookup, now).unwrap();
        let second = engine.attribute("000001", &snapshot, &lookup, now).unwrap();
        prop_assert_eq!(&first.justification, &second.justification);
        prop_assert_eq!(&first.sector_code, &second.sector_code);
        prop_assert_eq!(first.confidence, second.confidence);
    }
}
