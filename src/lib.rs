// Trend Monitor
// Periodic crypto trend classification with alerting on regime changes

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;
pub mod monitor;

use std::sync::Arc;

use crate::core::config::ApiConfig;
use crate::layer1::{BinanceRestClient, CoinGeckoClient, DataSourceError, HybridDataSource};

/// Binance primary with CoinGecko fallback, as configured
pub fn build_data_source(config: &ApiConfig) -> Result<Arc<HybridDataSource>, DataSourceError> {
    let primary = Arc::new(BinanceRestClient::from_config(config)?);
    let fallback = Arc::new(CoinGeckoClient::from_config(config)?);
    Ok(Arc::new(HybridDataSource::new(primary, fallback)))
}
