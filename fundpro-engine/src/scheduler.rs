//! Scheduled attribution refresh.
//!
//! Recomputes the sector attribution of a fund list on a cron schedule, so
//! the cache follows the quarterly holdings resync instead of waiting for the
//! first stale read. When a [`HoldingsSync`] is attached, each run syncs the
//! funds' holdings first.
//!
//! An empty configured fund list means every fund with stored holdings,
//! resolved again on each run.
//!
//! # Schedule (Beijing Time)
//!
//! - Default `"0 0 2 * * *"`: every day at 02:00
//!
//! # Configuration
//!
//! ```json
//! {
//!   "refresh": {
//!     "enabled": true,
//!     "schedule": "0 0 2 * * *",
//!     "funds": ["161725", "005827"]
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use fundpro_common::config::RefreshConfig;

use crate::calendar::beijing_timezone;
use crate::service::FundService;
use crate::sync::{HoldingsSync, SyncReport};

/// How far back a missed fire time still counts as due.
const DUE_WINDOW_SECS: i64 = 120;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Scheduler not started
    Stopped,
    /// Scheduler running
    Running,
    /// Scheduler paused
    Paused,
}

/// What started a refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Scheduled,
    Manual,
}

/// A fund whose refresh failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub fund_code: String,
    pub error: String,
}

/// Outcome of one refresh run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub trigger: RefreshTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Holdings sync ahead of the refresh, when a sync is attached
    pub holdings: Option<SyncReport>,
    /// Funds whose attribution was recomputed
    pub refreshed: Vec<String>,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.holdings.as_ref().map_or(true, SyncReport::is_success)
    }
}

/// Whether a fire time of `schedule` fell within the due window before `now`
/// and has not been executed yet.
fn is_due(
    schedule: &Schedule,
    last_execution: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: &FixedOffset,
) -> bool {
    let after = last_execution.unwrap_or_else(|| now - chrono::Duration::hours(1));

    for scheduled in schedule.after(&after.with_timezone(tz)).take(10) {
        let scheduled = scheduled.with_timezone(&Utc);
        if scheduled > now {
            break;
        }
        if now.signed_duration_since(scheduled) < chrono::Duration::seconds(DUE_WINDOW_SECS)
            && last_execution.map_or(true, |last| last < scheduled)
        {
            return true;
        }
    }

    false
}

/// Cron-driven attribution refresher
pub struct AttributionRefreshScheduler {
    service: Arc<FundService>,
    holdings_sync: Option<Arc<HoldingsSync>>,
    enabled: bool,
    expression: String,
    schedule: Schedule,
    tz: FixedOffset,
    funds: Arc<RwLock<Vec<String>>>,
    state: Arc<RwLock<SchedulerState>>,
    last_execution: Arc<RwLock<Option<DateTime<Utc>>>>,
    reports: Arc<RwLock<Vec<RefreshReport>>>,
    max_reports: usize,
}

impl AttributionRefreshScheduler {
    /// Create a scheduler for the funds listed in `config`.
    pub fn new(service: Arc<FundService>, config: &RefreshConfig) -> Result<Self> {
        let schedule = Schedule::from_str(&config.schedule)
            .with_context(|| format!("Invalid refresh schedule cron: {}", config.schedule))?;

        info!(
            schedule = %config.schedule,
            funds = config.funds.len(),
            enabled = config.enabled,
            "Attribution refresh scheduler configured"
        );

        Ok(Self {
            service,
            holdings_sync: None,
            enabled: config.enabled,
            expression: config.schedule.clone(),
            schedule,
            tz: beijing_timezone(),
            funds: Arc::new(RwLock::new(config.funds.clone())),
            state: Arc::new(RwLock::new(SchedulerState::Stopped)),
            last_execution: Arc::new(RwLock::new(None)),
            reports: Arc::new(RwLock::new(Vec::new())),
            max_reports: 100,
        })
    }

    /// Sync holdings ahead of every refresh run.
    pub fn with_holdings_sync(mut self, sync: Arc<HoldingsSync>) -> Self {
        self.holdings_sync = Some(sync);
        self
    }

    /// Cron expression in use
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Replace the fund list refreshed by each run.
    pub async fn set_funds(&self, funds: Vec<String>) {
        let mut current = self.funds.write().await;
        *current = funds;
    }

    /// Configured fund list; empty means every stored fund.
    pub async fn funds(&self) -> Vec<String> {
        self.funds.read().await.clone()
    }

    /// Funds the next run will cover: the configured list, or every fund
    /// with stored holdings when the list is empty.
    pub async fn resolve_funds(&self) -> Vec<String> {
        let configured = self.funds().await;
        if !configured.is_empty() {
            return configured;
        }

        let Some(sync) = &self.holdings_sync else {
            return configured;
        };
        match sync.stored_funds().await {
            Ok(funds) => funds,
            Err(e) => {
                error!(error = %e, "Failed to list stored funds");
                Vec::new()
            }
        }
    }

    /// Get current scheduler state
    pub async fn get_state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        *self.state.write().await = SchedulerState::Stopped;
        info!("Attribution refresh scheduler stopped");
    }

    /// Pause the scheduler
    pub async fn pause(&self) {
        *self.state.write().await = SchedulerState::Paused;
        info!("Attribution refresh scheduler paused");
    }

    /// Resume the scheduler
    pub async fn resume(&self) {
        *self.state.write().await = SchedulerState::Running;
        info!("Attribution refresh scheduler resumed");
    }

    /// Run the scheduler loop until stopped.
    pub async fn run(&self) -> Result<()> {
        if !self.enabled {
            info!("Attribution refresh disabled, not starting scheduler");
            return Ok(());
        }

        *self.state.write().await = SchedulerState::Running;
        info!(next_run = ?self.next_run(), "Attribution refresh scheduler started");

        let mut check_interval = interval(Duration::from_secs(30));

        loop {
            check_interval.tick().await;

            let current_state = *self.state.read().await;
            match current_state {
                SchedulerState::Stopped => break,
                SchedulerState::Paused => continue,
                SchedulerState::Running => {
                    let now = Utc::now();
                    if self.should_execute(now).await {
                        self.execute(RefreshTrigger::Scheduled).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn should_execute(&self, now: DateTime<Utc>) -> bool {
        let last = *self.last_execution.read().await;
        is_due(&self.schedule, last, now, &self.tz)
    }

    /// Manually run a refresh now, outside the schedule.
    pub async fn trigger(&self) -> RefreshReport {
        info!("Manually triggering attribution refresh");
        self.execute(RefreshTrigger::Manual).await
    }

    async fn execute(&self, trigger: RefreshTrigger) -> RefreshReport {
        let started_at = Utc::now();
        if trigger == RefreshTrigger::Scheduled {
            *self.last_execution.write().await = Some(started_at);
        }

        let funds = self.resolve_funds().await;
        if funds.is_empty() {
            warn!("No funds to refresh");
        }

        let holdings = match &self.holdings_sync {
            Some(sync) => Some(sync.sync_funds(&funds).await),
            None => None,
        };

        let mut refreshed = Vec::new();
        let mut failures = Vec::new();
        for fund_code in funds {
            match self.service.get_attribution(&fund_code, true).await {
                Ok(_) => refreshed.push(fund_code),
                Err(e) => {
                    error!(fund_code = %fund_code, error = %e, "Attribution refresh failed");
                    failures.push(RefreshFailure {
                        fund_code,
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = RefreshReport {
            trigger,
            started_at,
            finished_at: Utc::now(),
            holdings,
            refreshed,
            failures,
        };

        info!(
            trigger = ?report.trigger,
            refreshed = report.refreshed.len(),
            failures = report.failures.len(),
            "Attribution refresh completed"
        );

        let mut reports = self.reports.write().await;
        reports.push(report.clone());
        if reports.len() > self.max_reports {
            reports.remove(0);
        }

        report
    }

    /// Next scheduled fire time
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.schedule
            .upcoming(self.tz)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// Get recent refresh reports, newest first
    pub async fn get_reports(&self, limit: usize) -> Vec<RefreshReport> {
        let reports = self.reports.read().await;
        reports.iter().rev().take(limit).cloned().collect()
    }
}
