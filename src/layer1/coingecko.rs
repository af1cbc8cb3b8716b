// CoinGecko Fallback Client
// Approximate candles from market_chart price points when the exchange is unreachable

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::config::ApiConfig;
use crate::core::types::{Candle, Timeframe};
use crate::layer1::rest_client::RequestThrottle;
use crate::layer1::source::{DataSourceError, MarketDataSource};

const HOUR_MS: i64 = 3_600_000;

/// Exchange symbol → CoinGecko coin id
const SYMBOL_MAPPING: [(&str, &str); 8] = [
    ("BTCUSDT", "bitcoin"),
    ("ETHUSDT", "ethereum"),
    ("BNBUSDT", "binancecoin"),
    ("ADAUSDT", "cardano"),
    ("DOTUSDT", "polkadot"),
    ("LINKUSDT", "chainlink"),
    ("LTCUSDT", "litecoin"),
    ("XRPUSDT", "ripple"),
];

pub fn coin_id(symbol: &str) -> Option<&'static str> {
    SYMBOL_MAPPING
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, id)| *id)
}

pub fn supported_symbols() -> Vec<&'static str> {
    SYMBOL_MAPPING.iter().map(|(s, _)| *s).collect()
}

/// History span requested for a timeframe, in days
pub fn history_days(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::M1 => 0.1,
        Timeframe::M5 => 0.2,
        Timeframe::M15 => 0.5,
        Timeframe::H1 => 1.0,
        Timeframe::H4 => 2.0,
        Timeframe::D1 => 7.0,
        _ => 1.0,
    }
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: Vec<(f64, f64)>,
    #[serde(default)]
    total_volumes: Vec<(f64, f64)>,
}

/// Turn parallel price/volume point arrays into candles, keeping the last `limit`.
/// There is no OHLC here: open = close = price, high/low are ±1%.
fn chart_to_candles(chart: MarketChart, limit: usize) -> Vec<Candle> {
    let mut candles: Vec<Candle> = chart
        .prices
        .iter()
        .enumerate()
        .map(|(i, &(timestamp, price))| {
            let open_time = timestamp as i64;
            Candle {
                open_time,
                open: price,
                high: price * 1.01,
                low: price * 0.99,
                close: price,
                volume: chart.total_volumes.get(i).map(|&(_, v)| v).unwrap_or(0.0),
                close_time: open_time + HOUR_MS,
            }
        })
        .collect();

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);

    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}

// ============================================================================
// CoinGecko Client
// ============================================================================

pub struct CoinGeckoClient {
    base_url: String,
    probe_url: String,
    client: Client,
    throttle: RequestThrottle,
}

impl CoinGeckoClient {
    pub fn new(
        base_url: &str,
        probe_url: &str,
        timeout: Duration,
        min_request_interval: Duration,
    ) -> Result<Self, DataSourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            probe_url: probe_url.trim_end_matches('/').to_string(),
            client,
            throttle: RequestThrottle::new(min_request_interval),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, DataSourceError> {
        Self::new(
            &config.fallback_base_url,
            &config.fallback_probe_url,
            Duration::from_secs(config.fallback_timeout_secs),
            Duration::from_millis(config.fallback_min_request_interval_ms),
        )
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, DataSourceError> {
        self.throttle.acquire().await;

        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DataSourceError::Api { status: status.as_u16(), message });
        }
        Ok(response.json().await?)
    }

    fn resolve(symbol: &str) -> Result<&'static str, DataSourceError> {
        coin_id(symbol).ok_or_else(|| DataSourceError::UnsupportedSymbol(symbol.to_string()))
    }

    /// Approximate klines for an exchange symbol
    pub async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError> {
        let id = Self::resolve(symbol)?;
        let days = history_days(timeframe);
        let interval = if days <= 1.0 { "hourly" } else { "daily" };

        let url = format!("{}/coins/{}/market_chart", self.base_url, id);
        let chart: MarketChart = self
            .get(
                &url,
                &[
                    ("vs_currency", "usd".to_string()),
                    ("days", days.to_string()),
                    ("interval", interval.to_string()),
                ],
            )
            .await?;

        let candles = chart_to_candles(chart, limit as usize);
        if candles.is_empty() {
            return Err(DataSourceError::DataUnavailable(format!(
                "no price history for {}",
                symbol
            )));
        }

        info!(symbol = symbol, timeframe = %timeframe, count = candles.len(), "Fallback history fetched");
        Ok(candles)
    }

    pub async fn get_price(&self, symbol: &str) -> Result<f64, DataSourceError> {
        let id = Self::resolve(symbol)?;
        let url = format!("{}/simple/price", self.base_url);
        let data: HashMap<String, HashMap<String, Value>> = self
            .get(&url, &[("ids", id.to_string()), ("vs_currencies", "usd".to_string())])
            .await?;

        let price = data
            .get(id)
            .and_then(|quotes| quotes.get("usd"))
            .and_then(Value::as_f64)
            .ok_or_else(|| DataSourceError::Parse(format!("no usd price for {}", id)))?;

        debug!(symbol = symbol, price = price, "Fallback price fetched");
        Ok(price)
    }

    async fn reachable(&self, url: &str, params: &[(&str, &str)]) -> bool {
        match self.client.get(url).query(params).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = url, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError> {
        self.get_klines(symbol, timeframe, limit).await
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, DataSourceError> {
        self.get_price(symbol).await
    }

    async fn probe(&self) -> BTreeMap<String, bool> {
        let coingecko_url = format!("{}/ping", self.base_url);
        let cryptocompare_url = format!("{}/price", self.probe_url);

        let mut results = BTreeMap::new();
        results.insert("coingecko".to_string(), self.reachable(&coingecko_url, &[]).await);
        results.insert(
            "cryptocompare".to_string(),
            self.reachable(&cryptocompare_url, &[("fsym", "BTC"), ("tsyms", "USD")]).await,
        );

        info!(results = ?results, "Fallback connectivity checked");
        results
    }
}
