//! Tencent fund quote adapter for last published net values.
//!
//! `http://qt.gtimg.cn/q=f_{code}` answers with a GBK JS assignment:
//!
//! ```text
//! v_f_161725="1~招商中证白酒指数~161725~1.0893~1.0821~...~2026-10-15~...";
//! ```
//!
//! Field 3 is the latest published net value and field 4 the one before it.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::provider::{NetValueSource, ProviderError};
use super::NetValue;
use crate::calendar::beijing_timezone;

const TENCENT_QUOTE_URL: &str = "http://qt.gtimg.cn/q=";

fn payload_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"v_f_\d+="([^"]+)""#).expect("valid regex"))
}

fn parse_value(field: Option<&&str>) -> Option<f64> {
    field
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Parse a Tencent fund payload.
///
/// Uses the latest value, falling back to the previous one when the latest is
/// blank. The date is the first `YYYY-MM-DD` field, else `fallback_date`.
fn parse_payload(
    fund_code: &str,
    text: &str,
    fallback_date: NaiveDate,
) -> Result<NetValue, ProviderError> {
    let payload = payload_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            ProviderError::NotFound(format!("no net value published for {}", fund_code))
        })?
        .as_str();

    let fields: Vec<&str> = payload.split('~').collect();
    if fields.len() < 5 {
        return Err(ProviderError::InvalidResponse(format!(
            "expected at least 5 fields for {}, got {}",
            fund_code,
            fields.len()
        )));
    }

    let value = parse_value(fields.get(3))
        .or_else(|| parse_value(fields.get(4)))
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("no usable net value for {}", fund_code))
        })?;

    let as_of = fields
        .iter()
        .skip(5)
        .find_map(|f| NaiveDate::parse_from_str(f.trim(), "%Y-%m-%d").ok())
        .unwrap_or(fallback_date);

    Ok(NetValue { value, as_of })
}

/// Net value source backed by Tencent finance.
pub struct TencentNetValueSource {
    client: reqwest::Client,
}

impl TencentNetValueSource {
    pub fn new(timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }
}

impl Default for TencentNetValueSource {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(10))
    }
}

#[async_trait]
impl NetValueSource for TencentNetValueSource {
    async fn get_last_net_value(&self, fund_code: &str) -> Result<NetValue, ProviderError> {
        let url = format!("{}f_{}", TENCENT_QUOTE_URL, fund_code);
        debug!(fund_code, "Fetching net value from tencent");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ProviderError::Network(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        // Only ASCII fields are read; lossy decoding of the GBK name is fine.
        let text = String::from_utf8_lossy(&bytes);

        let yesterday =
            (Utc::now().with_timezone(&beijing_timezone()) - Duration::days(1)).date_naive();

        parse_payload(fund_code, &text, yesterday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    #[test]
    fn test_parse_payload_with_date() {
        let text = r#"v_f_161725="1~招商中证白酒~161725~1.0893~1.0821~0~2026-10-14~";"#;
        let nav = parse_payload("161725", text, fallback()).unwrap();
        assert_eq!(nav.value, 1.0893);
        assert_eq!(nav.as_of, NaiveDate::from_ymd_opt(2026, 10, 14).unwrap());
    }

    #[test]
    fn test_parse_payload_fallbacks() {
        let text = r#"v_f_161725="1~name~161725~~1.0821";"#;
        let nav = parse_payload("161725", text, fallback()).unwrap();
        assert_eq!(nav.value, 1.0821);
        assert_eq!(nav.as_of, fallback());
    }

    #[test]
    fn test_parse_payload_missing() {
        let err = parse_payload("999999", r#"v_pv_none_match="1";"#, fallback()).unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err =
            parse_payload("161725", r#"v_f_161725="1~name~161725";"#, fallback()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));

        let err = parse_payload("161725", r#"v_f_161725="1~name~161725~0~~";"#, fallback())
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
