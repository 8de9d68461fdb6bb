//! FundPro Engine
//!
//! Real-time fund value estimates and holdings-derived sector attribution
//! for A-share mutual funds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          FundService                                 │
//! │   get_estimate            get_attribution / get_attribution_or_stale │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌─────────────────────┐  ┌─────────────────┐  │
//! │  │ RealtimeEstimate │  │ SectorAttribution   │  │ AttributionCache│  │
//! │  │ Engine           │  │ Engine              │  │ (single-flight) │  │
//! │  └──────────────────┘  └─────────────────────┘  └─────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  HoldingsStore  QuoteSource  NetValueSource  SectorLookup  Market    │
//! │  (SQLite)       (Eastmoney)  (Tencent)       (static)      Calendar  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Real-time estimate
//! - Weighted percent change of the disclosed top holdings
//! - Scaled by a correction factor (default 1.2) for the undisclosed remainder
//! - Applied to the last published net value
//!
//! ## Sector attribution
//! - Holdings grouped by sector board, dominant sector by aggregate weight
//! - Confidence = dominant share of the resolved weight, capped when coverage
//!   is poor
//! - Cached per fund, recomputed when stale or when holdings resync
//!
//! ## Holdings sync
//! - Latest disclosed quarter fetched into SQLite, skipped while recent
//! - Runs at startup and ahead of every scheduled attribution refresh

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod attribution;
pub mod cache;
pub mod calendar;
pub mod data;
pub mod error;
pub mod estimate;
pub mod scheduler;
pub mod service;
pub mod sync;

pub use attribution::{SectorAttribution, SectorAttributionEngine, SectorWeight};
pub use cache::{AttributionCache, CacheStats};
pub use calendar::{AshareCalendar, MarketStatusReport};
pub use error::{FundError, Result};
pub use estimate::{FundEstimate, HoldingContribution, RealtimeEstimateEngine};
pub use scheduler::{AttributionRefreshScheduler, RefreshReport, SchedulerState};
pub use service::{CachedAttribution, Collaborators, FundService, ServiceSettings};
pub use sync::{HoldingsSync, SyncOutcome, SyncReport};
