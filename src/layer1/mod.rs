// Layer 1 - Market data connectors
// Binance public REST, CoinGecko fallback and the failover layer over both

pub mod source;
pub mod rest_client;
pub mod coingecko;
pub mod hybrid;

// Re-export commonly used items for convenience
pub use source::{DataSourceError, MarketDataSource};
pub use rest_client::{BinanceRestClient, RequestThrottle, RestClientStats, Ticker24hr};
pub use coingecko::CoinGeckoClient;
pub use hybrid::{DataSourceMode, HybridDataSource};
