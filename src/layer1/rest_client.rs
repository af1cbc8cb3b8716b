// REST Client for Binance Spot Public API
// Throttled HTTP client with sticky endpoint failover across candidate base URLs

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::config::ApiConfig;
use crate::core::types::{Candle, Timeframe};
use crate::layer1::source::{DataSourceError, MarketDataSource};

pub const MAX_KLINE_LIMIT: u32 = 1000;

// ============================================================================
// Request Throttle
// ============================================================================

/// Minimum spacing between consecutive requests of one client.
/// A leaky bucket holding a single token: callers queue on the mutex.
pub struct RequestThrottle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the interval since the previous request has elapsed
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Counters {
    requests_sent: u64,
    requests_succeeded: u64,
    requests_failed: u64,
    endpoint_switches: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub endpoint_switches: u64,
    pub active_endpoint: String,
    pub success_rate: f64,
}

impl fmt::Display for RestClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RestClientStats(sent={}, ok={}, fail={}, switches={}, endpoint={}, rate={:.2}%)",
            self.requests_sent, self.requests_succeeded, self.requests_failed,
            self.endpoint_switches, self.active_endpoint, self.success_rate * 100.0
        )
    }
}

// ============================================================================
// 24hr Ticker
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Ticker24hr {
    pub symbol: String,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub last_price: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

// ============================================================================
// Binance REST Client
// ============================================================================

/// Public market data client for Binance Spot
///
/// Every request tries the sticky endpoint first, then the other candidates
/// in list order. The first candidate that answers becomes the new sticky one.
pub struct BinanceRestClient {
    base_urls: Vec<String>,
    active: Arc<RwLock<usize>>,

    client: Client,
    throttle: RequestThrottle,

    counters: Arc<RwLock<Counters>>,
}

impl BinanceRestClient {
    pub fn new(
        base_urls: Vec<String>,
        timeout: Duration,
        min_request_interval: Duration,
    ) -> Result<Self, DataSourceError> {
        if base_urls.is_empty() {
            return Err(DataSourceError::InvalidRequest(
                "at least one base URL is required".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_urls: base_urls
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            active: Arc::new(RwLock::new(0)),
            client,
            throttle: RequestThrottle::new(min_request_interval),
            counters: Arc::new(RwLock::new(Counters::default())),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, DataSourceError> {
        Self::new(
            config.base_urls.clone(),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_millis(config.min_request_interval_ms),
        )
    }

    pub fn active_endpoint(&self) -> &str {
        &self.base_urls[*self.active.read()]
    }

    /// Sticky endpoint first, then the rest in list order
    fn endpoint_order(&self) -> Vec<usize> {
        let active = *self.active.read();
        std::iter::once(active)
            .chain((0..self.base_urls.len()).filter(move |&i| i != active))
            .collect()
    }

    async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Value, DataSourceError> {
        self.throttle.acquire().await;

        let mut last_error = None;

        for index in self.endpoint_order() {
            let url = format!("{}{}", self.base_urls[index], endpoint);
            self.counters.write().requests_sent += 1;
            debug!(url = %url, "Sending request");

            match self.send(&url, params).await {
                Ok(data) => {
                    let mut counters = self.counters.write();
                    counters.requests_succeeded += 1;

                    let mut active = self.active.write();
                    if *active != index {
                        *active = index;
                        counters.endpoint_switches += 1;
                        info!(endpoint = %self.base_urls[index], "Switched API endpoint");
                    }
                    return Ok(data);
                }
                Err(e) => {
                    self.counters.write().requests_failed += 1;
                    warn!(endpoint = %self.base_urls[index], error = %e, "API endpoint request failed");
                    last_error = Some(e);
                }
            }
        }

        warn!(endpoint = endpoint, "All API endpoints failed");
        Err(last_error.unwrap_or_else(|| {
            DataSourceError::DataUnavailable("no endpoint attempted".to_string())
        }))
    }

    async fn send(&self, url: &str, params: &[(&str, String)]) -> Result<Value, DataSourceError> {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("msg").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(body);
            return Err(DataSourceError::Api { status: status.as_u16(), message });
        }

        Ok(response.json().await?)
    }

    // ========================================================================
    // Market Data Endpoints
    // ========================================================================

    /// Get candlestick/kline data
    pub async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, DataSourceError> {
        if limit == 0 || limit > MAX_KLINE_LIMIT {
            return Err(DataSourceError::InvalidRequest(format!(
                "limit must be between 1 and {} (got {})",
                MAX_KLINE_LIMIT, limit
            )));
        }

        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(st) = start_time {
            params.push(("startTime", st.to_string()));
        }
        if let Some(et) = end_time {
            params.push(("endTime", et.to_string()));
        }

        let data = self.request("/api/v3/klines", &params).await?;
        let candles = parse_klines(&data)?;

        debug!(symbol = symbol, timeframe = %timeframe, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    /// Get latest price
    pub async fn get_ticker_price(&self, symbol: &str) -> Result<f64, DataSourceError> {
        let data = self
            .request("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        field_f64(&data, "price")
    }

    /// Get 24hr rolling window statistics
    pub async fn get_ticker_24hr(&self, symbol: &str) -> Result<Ticker24hr, DataSourceError> {
        let data = self
            .request("/api/v3/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;

        Ok(Ticker24hr {
            symbol: data
                .get("symbol")
                .and_then(|s| s.as_str())
                .unwrap_or(symbol)
                .to_string(),
            price_change: field_f64(&data, "priceChange")?,
            price_change_percent: field_f64(&data, "priceChangePercent")?,
            last_price: field_f64(&data, "lastPrice")?,
            open_price: field_f64(&data, "openPrice")?,
            high_price: field_f64(&data, "highPrice")?,
            low_price: field_f64(&data, "lowPrice")?,
            volume: field_f64(&data, "volume")?,
            quote_volume: field_f64(&data, "quoteVolume")?,
        })
    }

    /// Test connectivity; any 2xx answer counts, whatever the body
    pub async fn ping(&self) -> bool {
        self.throttle.acquire().await;

        for index in self.endpoint_order() {
            let url = format!("{}/api/v3/ping", self.base_urls[index]);
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    debug!(url = %url, status = response.status().as_u16(), "Ping rejected")
                }
                Err(e) => debug!(url = %url, error = %e, "Ping failed"),
            }
        }
        false
    }

    pub fn get_stats(&self) -> RestClientStats {
        let counters = self.counters.read();
        RestClientStats {
            requests_sent: counters.requests_sent,
            requests_succeeded: counters.requests_succeeded,
            requests_failed: counters.requests_failed,
            endpoint_switches: counters.endpoint_switches,
            active_endpoint: self.active_endpoint().to_string(),
            success_rate: if counters.requests_sent > 0 {
                counters.requests_succeeded as f64 / counters.requests_sent as f64
            } else {
                0.0
            },
        }
    }
}

#[async_trait]
impl MarketDataSource for BinanceRestClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError> {
        self.get_klines(symbol, timeframe, limit, None, None).await
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, DataSourceError> {
        self.get_ticker_price(symbol).await
    }

    async fn probe(&self) -> BTreeMap<String, bool> {
        let mut result = BTreeMap::new();
        result.insert("binance".to_string(), self.ping().await);
        result
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Numeric field that may arrive as a JSON string or number
fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn field_f64(data: &Value, field: &str) -> Result<f64, DataSourceError> {
    data.get(field)
        .and_then(value_f64)
        .ok_or_else(|| DataSourceError::Parse(format!("missing or invalid field '{}'", field)))
}

/// Parse `[[open_time, "open", "high", "low", "close", "volume", close_time, ...], ...]`
pub fn parse_klines(data: &Value) -> Result<Vec<Candle>, DataSourceError> {
    let rows = data
        .as_array()
        .ok_or_else(|| DataSourceError::Parse("kline response is not an array".to_string()))?;

    let mut candles = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let fields = row
            .as_array()
            .filter(|f| f.len() >= 7)
            .ok_or_else(|| DataSourceError::Parse(format!("kline row {} is malformed", i)))?;

        let number = |idx: usize| {
            value_f64(&fields[idx])
                .ok_or_else(|| DataSourceError::Parse(format!("kline row {} field {} is not numeric", i, idx)))
        };
        let timestamp = |idx: usize| {
            fields[idx]
                .as_i64()
                .ok_or_else(|| DataSourceError::Parse(format!("kline row {} field {} is not a timestamp", i, idx)))
        };

        candles.push(Candle {
            open_time: timestamp(0)?,
            open: number(1)?,
            high: number(2)?,
            low: number(3)?,
            close: number(4)?,
            volume: number(5)?,
            close_time: timestamp(6)?,
        });
    }

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(urls: &[&str]) -> BinanceRestClient {
        BinanceRestClient::new(
            urls.iter().map(|u| u.to_string()).collect(),
            Duration::from_secs(5),
            Duration::from_millis(0),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_klines() {
        let data = json!([
            [1700000060000i64, "101.0", "102.5", "100.5", "102.0", "12.5", 1700000119999i64, "0", 10, "0", "0", "0"],
            [1700000000000i64, "100.0", "101.0", "99.0", "101.0", "10.0", 1700000059999i64, "0", 8, "0", "0", "0"]
        ]);

        let candles = parse_klines(&data).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1700000000000);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].high, 102.5);
        assert_eq!(candles[1].close_time, 1700000119999);
    }

    #[test]
    fn test_parse_klines_rejects_malformed() {
        assert!(matches!(parse_klines(&json!({"code": -1})), Err(DataSourceError::Parse(_))));
        assert!(matches!(parse_klines(&json!([[1, "a"]])), Err(DataSourceError::Parse(_))));
        assert!(matches!(
            parse_klines(&json!([[1, "x", "1", "1", "1", "1", 2]])),
            Err(DataSourceError::Parse(_))
        ));
    }

    #[test]
    fn test_endpoint_order_starts_with_sticky() {
        let client = client(&["http://a", "http://b", "http://c"]);
        assert_eq!(client.endpoint_order(), vec![0, 1, 2]);

        *client.active.write() = 2;
        assert_eq!(client.endpoint_order(), vec![2, 0, 1]);
        assert_eq!(client.active_endpoint(), "http://c");
    }

    #[test]
    fn test_empty_base_urls_rejected() {
        let result = BinanceRestClient::new(Vec::new(), Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(result, Err(DataSourceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_limit_bounds_rejected_before_network() {
        let client = client(&["http://127.0.0.1:9"]);
        for limit in [0, 1001] {
            let result = client.get_klines("BTCUSDT", Timeframe::H1, limit, None, None).await;
            assert!(matches!(result, Err(DataSourceError::InvalidRequest(_))));
        }
        assert_eq!(client.get_stats().requests_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_requests() {
        let throttle = RequestThrottle::new(Duration::from_millis(100));
        let start = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_stats_initial() {
        let stats = client(&["http://a"]).get_stats();
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.active_endpoint, "http://a");
    }
}
