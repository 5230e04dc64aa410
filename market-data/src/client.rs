// Historical Price Client
// Fetches OHLCV history over HTTP with linear backoff on rate limits

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use common::PriceBar;

const DEFAULT_BASE_URL: &str = "https://api.financialdatasets.ai";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Seam for the main monitoring pass so tests can inject canned history.
#[async_trait::async_trait]
pub trait PriceHistorySource: Send + Sync {
    /// Ordered (non-decreasing timestamp) bars for the ticker and window.
    async fn get_prices(
        &self,
        ticker: &str,
        start_date: &str,
        end_date: &str,
        interval: &str,
        interval_multiplier: u32,
    ) -> Result<Vec<PriceBar>>;
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    time: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[allow(dead_code)]
    ticker: String,
    prices: Vec<RawPrice>,
}

/// HTTP client for the historical price API
pub struct PriceDataClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl PriceDataClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: 3,
        })
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let mut request = self.http.get(url);
            if let Some(key) = &self.api_key {
                request = request.header("X-API-KEY", key);
            }
            let response = request.send().await?;

            if response.status().as_u16() == 429 && attempt < self.max_retries {
                // Linear backoff: 60s, 90s, 120s, ...
                let delay = Duration::from_secs(60 + 30 * attempt as u64);
                info!(
                    "Rate limited (429). Attempt {}/{}. Waiting {}s before retrying",
                    attempt + 1,
                    self.max_retries + 1,
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Ok(response);
        }
    }
}

#[async_trait::async_trait]
impl PriceHistorySource for PriceDataClient {
    async fn get_prices(
        &self,
        ticker: &str,
        start_date: &str,
        end_date: &str,
        interval: &str,
        interval_multiplier: u32,
    ) -> Result<Vec<PriceBar>> {
        let url = format!(
            "{}/prices/?ticker={}&interval={}&interval_multiplier={}&start_date={}&end_date={}",
            self.base_url, ticker, interval, interval_multiplier, start_date, end_date
        );
        let response = self.fetch(&url).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Error fetching prices for {}: {} - {}",
                ticker,
                status,
                body
            ));
        }

        let parsed: PriceResponse = response.json().await?;
        let mut bars: Vec<PriceBar> = parsed
            .prices
            .into_iter()
            .map(|raw| PriceBar {
                open: raw.open,
                high: raw.high,
                low: raw.low,
                close: raw.close,
                volume: raw.volume,
                timestamp: parse_price_time(&raw.time),
            })
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars)
    }
}

/// Parse the API's timestamp field, which may be RFC 3339 (with or without a
/// trailing Z), a bare date, or a space-separated datetime.
pub fn parse_price_time(value: &str) -> DateTime<Utc> {
    let sanitized = value.replace('Z', "+00:00");
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&sanitized) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Utc.from_utc_datetime(&parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&parsed);
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = parsed.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&midnight);
        }
    }
    warn!("Unable to parse price timestamp: {}", value);
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_rfc3339_with_zulu() {
        let parsed = parse_price_time("2025-06-02T14:30:00Z");
        assert_eq!(parsed.hour(), 14);
        assert_eq!(parsed.minute(), 30);
    }

    #[test]
    fn parses_bare_date() {
        let parsed = parse_price_time("2025-06-02");
        assert_eq!(parsed.date_naive().to_string(), "2025-06-02");
        assert_eq!(parsed.hour(), 0);
    }

    #[test]
    fn parses_space_separated_datetime() {
        let parsed = parse_price_time("2025-06-02 09:30:00");
        assert_eq!(parsed.hour(), 9);
    }
}
