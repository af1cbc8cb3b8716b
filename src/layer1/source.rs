// Market Data Source Abstraction
// Uniform async interface over the primary exchange, the fallback and the hybrid

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::types::{Candle, Timeframe};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unsupported symbol: {0}")]
    UnsupportedSymbol(String),
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),
}

// ============================================================================
// Trait
// ============================================================================

/// Abstract interface for fetching market data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Candles in ascending `open_time` order, at most `limit` of them
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError>;

    async fn spot_price(&self, symbol: &str) -> Result<f64, DataSourceError>;

    /// Reachability per named endpoint. Never fails.
    async fn probe(&self) -> BTreeMap<String, bool>;

    /// `Some(true)` once a failover layer has switched away from its primary
    fn is_degraded(&self) -> Option<bool> {
        None
    }
}
