//! Collaborator interfaces consumed by the engine.
//!
//! Every source of external data (holdings store and source, quote feed,
//! market calendar, sector table, net value feed) sits behind one of these traits so
//! the service can be wired with real adapters in production and with
//! counting mocks in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;

use super::{HoldingsSnapshot, NetValue, QuoteMap, Sector};
use crate::attribution::SectorAttribution;

// ============================================================================
// Provider Error
// ============================================================================

/// Errors reported by collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Network error (connection failed, HTTP status)
    Network(String),
    /// Nothing stored or published for the requested key
    NotFound(String),
    /// Response could not be parsed
    InvalidResponse(String),
    /// Local storage failure
    Storage(String),
    /// Call exceeded its time budget
    Timeout(String),
    /// Internal collaborator error
    Internal(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Timeout(msg) => write!(f, "Timed out: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Check if the error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<rusqlite::Error> for ProviderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Read access to persisted holdings snapshots.
#[async_trait]
pub trait HoldingsStore: Send + Sync {
    /// Latest snapshot for a fund.
    async fn get_snapshot(&self, fund_code: &str) -> Result<HoldingsSnapshot, ProviderError>;

    /// When the fund's holdings were last synced, if ever.
    async fn get_last_sync_time(
        &self,
        fund_code: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;
}

/// Remote source of disclosed holdings, feeding the holdings sync.
#[async_trait]
pub trait HoldingsSource: Send + Sync {
    /// Get the provider name (e.g., "eastmoney")
    fn name(&self) -> &'static str;

    /// Most recently disclosed snapshot; `NotFound` when nothing is disclosed.
    async fn fetch_latest_snapshot(
        &self,
        fund_code: &str,
    ) -> Result<HoldingsSnapshot, ProviderError>;
}

/// Live quote feed. Partial results are allowed.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Get the provider name (e.g., "eastmoney")
    fn name(&self) -> &'static str;

    /// Quotes for the requested codes; codes without a quote are simply absent.
    async fn get_quotes(&self, stock_codes: &HashSet<String>) -> Result<QuoteMap, ProviderError>;
}

/// Whether the exchange is currently trading.
pub trait MarketStatus: Send + Sync {
    fn is_open(&self, now: DateTime<Utc>) -> bool;
}

/// Stock code → sector mapping. `None` means the sector is unknown.
pub trait SectorLookup: Send + Sync {
    fn resolve_sector(&self, stock_code: &str) -> Option<Sector>;
}

/// Last published fund net value.
#[async_trait]
pub trait NetValueSource: Send + Sync {
    async fn get_last_net_value(&self, fund_code: &str) -> Result<NetValue, ProviderError>;
}

/// Durable home for computed attributions, used to warm the cache on startup.
#[async_trait]
pub trait AttributionStore: Send + Sync {
    /// Replace the stored attribution for its fund.
    async fn save_attribution(&self, attribution: &SectorAttribution) -> Result<(), ProviderError>;

    /// All stored attributions.
    async fn load_attributions(&self) -> Result<Vec<SectorAttribution>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::NotFound("161725".into());
        assert_eq!(err.to_string(), "Not found: 161725");

        let err = ProviderError::Network("HTTP 502".into());
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[test]
    fn test_provider_error_recoverable() {
        assert!(ProviderError::Network("reset".into()).is_recoverable());
        assert!(ProviderError::Timeout("slow".into()).is_recoverable());
        assert!(!ProviderError::NotFound("x".into()).is_recoverable());
        assert!(!ProviderError::InvalidResponse("x".into()).is_recoverable());
    }
}
