// Real-Time Intraday Client
// Multi-provider quotes and intraday bars with ordered fallback

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use common::PriceBar;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time quote snapshot
#[derive(Debug, Clone)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
}

/// One real-time data provider. Providers return `None`/empty rather than
/// erroring when they cannot serve a request, so the fallback chain keeps
/// moving.
#[async_trait::async_trait]
pub trait IntradaySource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_quote(&self, ticker: &str) -> Option<Quote>;

    async fn get_intraday_bars(
        &self,
        ticker: &str,
        interval_minutes: u32,
        limit: usize,
    ) -> Vec<PriceBar>;
}

/// Finnhub: fast quotes, no intraday bars on the free tier
pub struct FinnhubSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FinnhubSource {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url("https://finnhub.io/api/v1", api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    /// Current price
    #[serde(default)]
    c: f64,
    /// Quote timestamp, unix seconds
    #[serde(default)]
    t: i64,
}

#[async_trait::async_trait]
impl IntradaySource for FinnhubSource {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        let url = format!(
            "{}/quote?symbol={}&token={}",
            self.base_url, ticker, self.api_key
        );
        let response = match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("Finnhub quote failed for {}: {}", ticker, response.status());
                return None;
            }
            Err(err) => {
                warn!("Finnhub error for {}: {}", ticker, err);
                return None;
            }
        };
        let quote: FinnhubQuote = match response.json().await {
            Ok(quote) => quote,
            Err(err) => {
                warn!("Finnhub payload error for {}: {}", ticker, err);
                return None;
            }
        };
        let timestamp = Utc
            .timestamp_opt(quote.t, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Some(Quote {
            ticker: ticker.to_string(),
            price: quote.c,
            timestamp,
            source: self.name(),
        })
    }

    async fn get_intraday_bars(&self, _ticker: &str, _interval: u32, _limit: usize) -> Vec<PriceBar> {
        Vec::new()
    }
}

/// Polygon: aggregate bars, quote derived from the latest bar close
pub struct PolygonSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PolygonSource {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url("https://api.polygon.io/v2", api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PolygonBar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    /// Bar start, unix milliseconds
    t: i64,
}

#[derive(Debug, Deserialize)]
struct PolygonAggregates {
    #[serde(default)]
    results: Vec<PolygonBar>,
}

#[async_trait::async_trait]
impl IntradaySource for PolygonSource {
    fn name(&self) -> &'static str {
        "polygon"
    }

    async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        let bars = self.get_intraday_bars(ticker, 1, 1).await;
        let bar = bars.last()?;
        Some(Quote {
            ticker: ticker.to_string(),
            price: bar.close,
            timestamp: bar.timestamp,
            source: self.name(),
        })
    }

    async fn get_intraday_bars(
        &self,
        ticker: &str,
        interval_minutes: u32,
        limit: usize,
    ) -> Vec<PriceBar> {
        let to = Utc::now().date_naive();
        let from = to - chrono::Duration::days(1);
        let url = format!(
            "{}/aggs/ticker/{}/range/{}/minute/{}/{}?adjusted=true&sort=asc&limit={}&apiKey={}",
            self.base_url, ticker, interval_minutes, from, to, limit, self.api_key
        );
        let response = match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(
                    "Polygon aggregates failed for {}: {}",
                    ticker,
                    response.status()
                );
                return Vec::new();
            }
            Err(err) => {
                warn!("Polygon error for {}: {}", ticker, err);
                return Vec::new();
            }
        };
        let payload: PolygonAggregates = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Polygon payload error for {}: {}", ticker, err);
                return Vec::new();
            }
        };
        let mut bars: Vec<PriceBar> = payload
            .results
            .into_iter()
            .filter_map(|bar| {
                let timestamp = Utc.timestamp_millis_opt(bar.t).single()?;
                Some(PriceBar {
                    open: bar.o,
                    high: bar.h,
                    low: bar.l,
                    close: bar.c,
                    volume: bar.v as u64,
                    timestamp,
                })
            })
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);
        if bars.len() > limit {
            bars.split_off(bars.len() - limit)
        } else {
            bars
        }
    }
}

/// Unified client that tries each configured provider in order
pub struct MultiSourceClient {
    sources: Vec<Box<dyn IntradaySource>>,
}

impl MultiSourceClient {
    pub fn new(sources: Vec<Box<dyn IntradaySource>>) -> Self {
        Self { sources }
    }

    /// Build from environment keys; providers without credentials are
    /// skipped.
    pub fn from_env() -> Result<Self> {
        let mut sources: Vec<Box<dyn IntradaySource>> = Vec::new();
        if let Ok(key) = std::env::var("FINNHUB_API_KEY") {
            if !key.is_empty() {
                sources.push(Box::new(FinnhubSource::new(key)?));
            }
        }
        if let Ok(key) = std::env::var("POLYGON_API_KEY") {
            if !key.is_empty() {
                sources.push(Box::new(PolygonSource::new(key)?));
            }
        }
        Ok(Self::new(sources))
    }
}

#[async_trait::async_trait]
impl IntradaySource for MultiSourceClient {
    fn name(&self) -> &'static str {
        "multi"
    }

    async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        for source in &self.sources {
            if let Some(quote) = source.get_quote(ticker).await {
                if quote.price > 0.0 {
                    return Some(quote);
                }
            }
        }
        warn!("Failed to get quote for {} from all sources", ticker);
        None
    }

    async fn get_intraday_bars(
        &self,
        ticker: &str,
        interval_minutes: u32,
        limit: usize,
    ) -> Vec<PriceBar> {
        for source in &self.sources {
            let bars = source
                .get_intraday_bars(ticker, interval_minutes, limit)
                .await;
            if !bars.is_empty() {
                return bars;
            }
        }
        warn!("Failed to get intraday bars for {}", ticker);
        Vec::new()
    }
}
