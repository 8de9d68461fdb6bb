//! Holdings synchronization.
//!
//! Pulls each fund's latest disclosed holdings from a [`HoldingsSource`] into
//! local storage. Disclosures change quarterly, so a fund whose stored
//! snapshot was synced within the configured interval (default 30 days) is
//! skipped without a remote call.
//!
//! Every successful write bumps the fund's sync time, which the service
//! compares against cached attributions to trigger recomputation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use fundpro_common::config::SyncConfig;

use crate::data::{HoldingsSource, HoldingsStore, LocalStorage};

/// What happened to one fund during a sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Stored snapshot is recent enough
    Skipped { last_synced: DateTime<Utc> },
    /// A snapshot was fetched and stored
    Synced { quarter: String, holdings: usize },
}

/// A fund whose sync failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub fund_code: String,
    pub error: String,
}

/// Outcome of syncing a fund list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keeps stored holdings in step with the disclosure source
pub struct HoldingsSync {
    source: Arc<dyn HoldingsSource>,
    storage: Arc<LocalStorage>,
    interval: chrono::Duration,
    request_delay: Duration,
}

impl HoldingsSync {
    pub fn new(
        source: Arc<dyn HoldingsSource>,
        storage: Arc<LocalStorage>,
        interval: chrono::Duration,
        request_delay: Duration,
    ) -> Self {
        Self {
            source,
            storage,
            interval,
            request_delay,
        }
    }

    pub fn from_config(
        source: Arc<dyn HoldingsSource>,
        storage: Arc<LocalStorage>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(
            source,
            storage,
            chrono::Duration::try_days(config.interval_days).unwrap_or(chrono::Duration::MAX),
            Duration::from_millis(config.request_delay_ms),
        )
    }

    /// Funds with a stored snapshot, read fresh on every call.
    pub async fn stored_funds(&self) -> Result<Vec<String>> {
        self.storage.list_funds().await
    }

    /// Sync one fund, skipping the remote call when its stored snapshot is
    /// younger than the sync interval.
    pub async fn sync_fund(&self, fund_code: &str) -> Result<SyncOutcome> {
        let now = Utc::now();
        let last_synced = self
            .storage
            .get_last_sync_time(fund_code)
            .await
            .with_context(|| format!("Failed to read sync time for fund {}", fund_code))?;

        if let Some(last_synced) = last_synced {
            if now - last_synced < self.interval {
                debug!(fund_code, %last_synced, "Holdings recent, skipping sync");
                return Ok(SyncOutcome::Skipped { last_synced });
            }
        }

        let source = self.source.name();
        let snapshot = self
            .source
            .fetch_latest_snapshot(fund_code)
            .await
            .with_context(|| {
                format!("Failed to fetch holdings for {} from {}", fund_code, source)
            })?;

        let holdings = self.storage.save_snapshot(&snapshot).await?;
        info!(
            fund_code,
            quarter = %snapshot.quarter,
            holdings,
            "Holdings synced"
        );

        Ok(SyncOutcome::Synced {
            quarter: snapshot.quarter,
            holdings,
        })
    }

    /// Sync every fund in turn, pausing between remote fetches.
    pub async fn sync_funds(&self, fund_codes: &[String]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut fetched_any = false;

        for fund_code in fund_codes {
            if fetched_any && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.sync_fund(fund_code).await {
                Ok(SyncOutcome::Skipped { .. }) => report.skipped.push(fund_code.clone()),
                Ok(SyncOutcome::Synced { .. }) => {
                    fetched_any = true;
                    report.synced.push(fund_code.clone());
                }
                Err(e) => {
                    fetched_any = true;
                    warn!(fund_code = %fund_code, error = %e, "Holdings sync failed");
                    report.failures.push(SyncFailure {
                        fund_code: fund_code.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            synced = report.synced.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "Holdings sync completed"
        );
        report
    }
}
