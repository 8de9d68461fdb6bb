//! A-share trading calendar.
//!
//! Trading days are Monday to Friday minus configured public holidays
//! (make-up working weekends stay closed). Sessions run 09:30-11:30 and
//! 13:00-15:00 Beijing time, both ends inclusive at minute resolution.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use fundpro_common::config::MarketConfig;

use crate::data::MarketStatus;

/// Trading sessions as inclusive (start, end) minutes of the day.
const SESSIONS: [(u32, u32); 2] = [(9 * 60 + 30, 11 * 60 + 30), (13 * 60, 15 * 60)];

const TRADING_HOURS: &str = "09:30-11:30, 13:00-15:00";

/// Get Beijing timezone (UTC+8).
///
/// SAFETY: 8 hours = 28800 seconds is always within valid FixedOffset range
pub fn beijing_timezone() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid timezone offset")
}

/// Why the market is closed, or `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    Open,
    Weekend,
    Holiday,
    OutsideTradingHours,
}

/// Market status detail for a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatusReport {
    pub is_open: bool,
    pub is_trading_day: bool,
    pub reason: ClosedReason,
    /// Beijing wall-clock time of the check
    pub current_time: String,
    pub trading_hours: String,
    /// Set on non-trading days
    pub last_trading_day: Option<NaiveDate>,
    /// Set on non-trading days
    pub next_trading_day: Option<NaiveDate>,
}

/// A-share calendar with a configurable holiday list.
#[derive(Debug, Clone, Default)]
pub struct AshareCalendar {
    holidays: HashSet<NaiveDate>,
}

impl AshareCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn from_config(config: &MarketConfig) -> Self {
        Self::new(config.holidays.iter().copied())
    }

    fn day_reason(&self, date: NaiveDate) -> ClosedReason {
        if self.holidays.contains(&date) {
            ClosedReason::Holiday
        } else if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            ClosedReason::Weekend
        } else {
            ClosedReason::Open
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.day_reason(date) == ClosedReason::Open
    }

    /// Whether `now` falls inside a trading session.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&beijing_timezone());
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let minute = local.hour() * 60 + local.minute();
        SESSIONS
            .iter()
            .any(|&(start, end)| (start..=end).contains(&minute))
    }

    /// The closest trading day strictly before `date`.
    pub fn last_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date - Duration::days(1);
        while !self.is_trading_day(day) {
            day -= Duration::days(1);
        }
        day
    }

    /// The closest trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date + Duration::days(1);
        while !self.is_trading_day(day) {
            day += Duration::days(1);
        }
        day
    }

    pub fn market_status(&self, now: DateTime<Utc>) -> MarketStatusReport {
        let local = now.with_timezone(&beijing_timezone());
        let today = local.date_naive();
        let day_reason = self.day_reason(today);
        let is_trading_day = day_reason == ClosedReason::Open;
        let is_open = self.is_open(now);

        let reason = if !is_trading_day {
            day_reason
        } else if !is_open {
            ClosedReason::OutsideTradingHours
        } else {
            ClosedReason::Open
        };

        MarketStatusReport {
            is_open,
            is_trading_day,
            reason,
            current_time: local.format("%Y-%m-%d %H:%M:%S").to_string(),
            trading_hours: TRADING_HOURS.to_string(),
            last_trading_day: (!is_trading_day).then(|| self.last_trading_day(today)),
            next_trading_day: (!is_trading_day).then(|| self.next_trading_day(today)),
        }
    }
}

impl MarketStatus for AshareCalendar {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        AshareCalendar::is_open(self, now)
    }
}
