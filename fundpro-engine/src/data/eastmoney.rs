//! Eastmoney batch quote adapter.
//!
//! Fetches real-time quotes for a set of A-share codes in one request.
//!
//! # Data Source
//! - Batch quotes: push2.eastmoney.com `ulist.np/get`
//!   - `f12` code, `f14` name, `f2` price, `f3` percent change
//!   - suspended stocks report `"-"` instead of numbers and are skipped

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{ProviderError, QuoteSource};
use super::{LiveQuote, QuoteMap};

/// Eastmoney batch quote API
const EASTMONEY_ULIST_URL: &str = "https://push2.eastmoney.com/api/qt/ulist.np/get";

/// Eastmoney secid for a 6-digit code: Shanghai ("6...") is market 1,
/// everything else is market 0.
fn to_secid(stock_code: &str) -> String {
    let market = if stock_code.starts_with('6') { "1" } else { "0" };
    format!("{}.{}", market, stock_code)
}

#[derive(Debug, Deserialize)]
struct UlistResponse {
    rc: i32,
    data: Option<UlistData>,
}

#[derive(Debug, Deserialize)]
struct UlistData {
    #[serde(default)]
    diff: Vec<UlistItem>,
}

#[derive(Debug, Deserialize)]
struct UlistItem {
    #[serde(default)]
    f2: serde_json::Value,
    #[serde(default)]
    f3: serde_json::Value,
    #[serde(default)]
    f12: String,
    #[serde(default)]
    f14: String,
}

/// Quote source backed by Eastmoney.
pub struct EastmoneyQuoteSource {
    client: reqwest::Client,
}

impl EastmoneyQuoteSource {
    /// Create an adapter whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    fn parse_response(body: UlistResponse) -> Result<QuoteMap, ProviderError> {
        if body.rc != 0 {
            return Err(ProviderError::InvalidResponse(format!(
                "Eastmoney API error: rc={}",
                body.rc
            )));
        }

        let now = Utc::now();
        let mut quotes = QuoteMap::new();
        for item in body.data.map(|d| d.diff).unwrap_or_default() {
            let (Some(price), Some(change)) = (item.f2.as_f64(), item.f3.as_f64()) else {
                debug!(code = %item.f12, "Skipping quote without numeric fields");
                continue;
            };
            if item.f12.is_empty() {
                continue;
            }
            quotes.insert(
                item.f12.clone(),
                LiveQuote {
                    stock_code: item.f12,
                    name: item.f14,
                    price,
                    change_percent: change,
                    timestamp: now,
                },
            );
        }

        Ok(quotes)
    }
}

impl Default for EastmoneyQuoteSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl QuoteSource for EastmoneyQuoteSource {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    async fn get_quotes(&self, stock_codes: &HashSet<String>) -> Result<QuoteMap, ProviderError> {
        if stock_codes.is_empty() {
            return Ok(QuoteMap::new());
        }

        let mut codes: Vec<&String> = stock_codes.iter().collect();
        codes.sort();
        let secids = codes
            .iter()
            .map(|code| to_secid(code))
            .collect::<Vec<_>>()
            .join(",");

        debug!(count = codes.len(), "Fetching quotes from eastmoney");

        let response = self
            .client
            .get(EASTMONEY_ULIST_URL)
            .query(&[
                ("fltt", "2"),
                ("invt", "2"),
                ("fields", "f12,f14,f2,f3"),
                ("secids", secids.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Network(format!("HTTP {}", response.status())));
        }

        let body: UlistResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        let quotes = Self::parse_response(body)?;
        if quotes.len() < stock_codes.len() {
            warn!(
                requested = stock_codes.len(),
                received = quotes.len(),
                "Partial quote response"
            );
        }

        Ok(quotes)
    }
}
