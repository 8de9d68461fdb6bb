//! Eastmoney F10 disclosed holdings adapter.
//!
//! # Data Source
//! - Fund archives: fundf10.eastmoney.com `FundArchivesDatas.aspx?type=jjcc`
//!   - answers with a JS assignment whose `content` field is an HTML fragment
//!   - one `<div class='box'>` per disclosed quarter, latest first
//!   - columns located by header text: 股票代码, 股票名称, 占净值比例
//!
//! ```text
//! var apidata={ content:"<div class='box'>...2025年4季度股票投资明细...<table>...",
//!               arryear:[2025,2024],curyear:2025};
//! ```

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use super::provider::{HoldingsSource, ProviderError};
use super::{HoldingsSnapshot, StockHolding};
use crate::calendar::beijing_timezone;

const FUND_ARCHIVES_URL: &str = "https://fundf10.eastmoney.com/FundArchivesDatas.aspx";

/// Rows requested per quarter
const TOPLINE: &str = "10";

struct Patterns {
    content: Regex,
    box_start: Regex,
    quarter: Regex,
    header: Regex,
    row: Regex,
    cell: Regex,
    tag: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        content: Regex::new(r#"(?s)content:\s*"(.*?)"\s*,\s*arryear"#).expect("valid regex"),
        box_start: Regex::new(r#"<div class=['"]box['"]>"#).expect("valid regex"),
        quarter: Regex::new(r"\d{4}年\d季度股票投资明细").expect("valid regex"),
        header: Regex::new(r"(?s)<th(?:\s[^>]*)?>(.*?)</th>").expect("valid regex"),
        row: Regex::new(r"(?s)<tr[^>]*>(.*?)</tr>").expect("valid regex"),
        cell: Regex::new(r"(?s)<td[^>]*>(.*?)</td>").expect("valid regex"),
        tag: Regex::new(r"<[^>]+>").expect("valid regex"),
    })
}

fn strip_tags(html: &str) -> String {
    patterns()
        .tag
        .replace_all(html, "")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// "15.08%" → 15.08; placeholders such as "---" are rejected.
fn parse_weight(text: &str) -> Option<f64> {
    text.trim_end_matches('%')
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w >= 0.0)
}

/// Parse the latest quarter out of an archives response.
///
/// Returns `Ok(None)` when the year has no disclosed quarter yet.
fn parse_archives(
    fund_code: &str,
    body: &str,
) -> Result<Option<HoldingsSnapshot>, ProviderError> {
    let p = patterns();
    let content = p
        .content
        .captures(body)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("no archives content for fund {}", fund_code))
        })?
        .as_str();

    let Some(latest) = p.box_start.split(content).nth(1) else {
        return Ok(None);
    };

    let quarter = p
        .quarter
        .find(latest)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("no quarter label for fund {}", fund_code))
        })?;

    let headers: Vec<String> = p
        .header
        .captures_iter(latest)
        .map(|caps| strip_tags(&caps[1]))
        .collect();
    let column = |label: &str| {
        headers.iter().position(|h| h.contains(label)).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("missing column {} in {}", label, quarter))
        })
    };
    let code_col = column("股票代码")?;
    let name_col = column("股票名称")?;
    let weight_col = column("占净值")?;

    let mut seen = HashSet::new();
    let mut holdings = Vec::new();
    for row in p.row.captures_iter(latest) {
        let cells: Vec<String> = p
            .cell
            .captures_iter(&row[1])
            .map(|caps| strip_tags(&caps[1]))
            .collect();
        let (Some(code), Some(name), Some(weight)) =
            (cells.get(code_col), cells.get(name_col), cells.get(weight_col))
        else {
            continue;
        };
        let Some(weight) = parse_weight(weight) else {
            debug!(fund_code, stock_code = %code, "Skipping holding without weight");
            continue;
        };

        let stock_code = format!("{:0>6}", code);
        if !seen.insert(stock_code.clone()) {
            continue;
        }
        let rank = holdings.len() as u32 + 1;
        holdings.push(StockHolding::new(stock_code, name.as_str(), weight, rank));
    }

    if holdings.is_empty() {
        return Ok(None);
    }

    Ok(Some(HoldingsSnapshot::new(fund_code, quarter, holdings)))
}

/// Holdings source backed by Eastmoney fund archives.
pub struct EastmoneyHoldingsSource {
    client: reqwest::Client,
}

impl EastmoneyHoldingsSource {
    /// Create an adapter whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    async fn fetch_year(&self, fund_code: &str, year: i32) -> Result<String, ProviderError> {
        let year = year.to_string();
        let response = self
            .client
            .get(FUND_ARCHIVES_URL)
            .query(&[
                ("type", "jjcc"),
                ("code", fund_code),
                ("topline", TOPLINE),
                ("year", year.as_str()),
                ("month", ""),
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

        response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }
}

impl Default for EastmoneyHoldingsSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl HoldingsSource for EastmoneyHoldingsSource {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    async fn fetch_latest_snapshot(
        &self,
        fund_code: &str,
    ) -> Result<HoldingsSnapshot, ProviderError> {
        // Early in the year the current year has no disclosure yet.
        let this_year = Utc::now().with_timezone(&beijing_timezone()).year();
        for year in [this_year, this_year - 1] {
            debug!(fund_code, year, "Fetching disclosed holdings from eastmoney");
            let body = self.fetch_year(fund_code, year).await?;
            if let Some(snapshot) = parse_archives(fund_code, &body)? {
                return Ok(snapshot);
            }
        }

        Err(ProviderError::NotFound(format!(
            "no holdings disclosed for fund {}",
            fund_code
        )))
    }
}
