// Hybrid Data Source
// Primary with one-way failover to a fallback; Degraded is sticky for the process lifetime

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::types::{Candle, Timeframe};
use crate::layer1::source::{DataSourceError, MarketDataSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataSourceMode {
    Primary,
    Degraded,
}

impl fmt::Display for DataSourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub struct HybridDataSource {
    primary: Arc<dyn MarketDataSource>,
    fallback: Arc<dyn MarketDataSource>,
    mode: Arc<RwLock<DataSourceMode>>,
}

impl HybridDataSource {
    pub fn new(primary: Arc<dyn MarketDataSource>, fallback: Arc<dyn MarketDataSource>) -> Self {
        Self {
            primary,
            fallback,
            mode: Arc::new(RwLock::new(DataSourceMode::Primary)),
        }
    }

    pub fn mode(&self) -> DataSourceMode {
        *self.mode.read()
    }

    /// Flip to Degraded. Returns true only for the caller that made the transition.
    fn degrade(&self, reason: &str) -> bool {
        let mut mode = self.mode.write();
        if *mode == DataSourceMode::Degraded {
            return false;
        }
        *mode = DataSourceMode::Degraded;
        warn!(
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            reason = reason,
            "Primary data source failed, switching to fallback"
        );
        true
    }

    fn fallback_error(e: DataSourceError) -> DataSourceError {
        match e {
            DataSourceError::UnsupportedSymbol(symbol) => DataSourceError::UnsupportedSymbol(symbol),
            other => DataSourceError::DataUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl MarketDataSource for HybridDataSource {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError> {
        if self.mode() == DataSourceMode::Primary {
            match self.primary.fetch_candles(symbol, timeframe, limit).await {
                Ok(candles) if !candles.is_empty() => return Ok(candles),
                Ok(_) => {
                    self.degrade("empty candle series");
                }
                Err(e) => {
                    self.degrade(&e.to_string());
                }
            }
        }

        info!(symbol = symbol, timeframe = %timeframe, "Using fallback data source");
        let candles = self
            .fallback
            .fetch_candles(symbol, timeframe, limit)
            .await
            .map_err(Self::fallback_error)?;

        if candles.is_empty() {
            return Err(DataSourceError::DataUnavailable(format!(
                "no candles for {}@{}",
                symbol, timeframe
            )));
        }
        Ok(candles)
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64, DataSourceError> {
        if self.mode() == DataSourceMode::Primary {
            match self.primary.spot_price(symbol).await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    self.degrade(&e.to_string());
                }
            }
        }

        self.fallback
            .spot_price(symbol)
            .await
            .map_err(Self::fallback_error)
    }

    async fn probe(&self) -> BTreeMap<String, bool> {
        let mut results = self.primary.probe().await;
        results.extend(self.fallback.probe().await);
        results
    }

    fn is_degraded(&self) -> Option<bool> {
        Some(self.mode() == DataSourceMode::Degraded)
    }
}
