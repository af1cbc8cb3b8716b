// Core Type Definitions for Trend Monitor
// Candles, timeframes, trend categories and monitor keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Candle
// ============================================================================

/// One OHLCV sample for a fixed time bucket. Timestamps are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Candle {
    /// Price range as a percentage of the close, `None` when close is zero
    pub fn range_pct(&self) -> Option<f64> {
        if self.close == 0.0 {
            return None;
        }
        Some((self.high - self.low) / self.close * 100.0)
    }
}

// ============================================================================
// Timeframe
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Timeframe::M1, Timeframe::M3, Timeframe::M5, Timeframe::M15, Timeframe::M30,
        Timeframe::H1, Timeframe::H2, Timeframe::H4, Timeframe::H6, Timeframe::H8,
        Timeframe::H12, Timeframe::D1, Timeframe::D3, Timeframe::W1, Timeframe::Mo1,
    ];

    /// Binance interval string
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    // Case-sensitive: "1m" is one minute, "1M" is one month
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| format!("Invalid timeframe: '{}'", s))
    }
}

// ============================================================================
// Trend Type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendType {
    /// Initial / insufficient-data value, never produced by rule evaluation
    Unknown,
    Sideways,
    Uptrend,
    Downtrend,
}

impl Default for TrendType {
    fn default() -> Self {
        TrendType::Unknown
    }
}

impl fmt::Display for TrendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Monitor Key
// ============================================================================

/// A monitored (symbol, timeframe) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl MonitorKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self { symbol: symbol.into(), timeframe }
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

// ============================================================================
// Time helpers
// ============================================================================

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_roundtrip_strings() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn test_timeframe_case_sensitive() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert_eq!("1M".parse::<Timeframe>().unwrap(), Timeframe::Mo1);
        assert!("2m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_serde_uses_interval_string() {
        let json = serde_json::to_string(&Timeframe::H4).unwrap();
        assert_eq!(json, "\"4h\"");
        let tf: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(tf, Timeframe::M15);
    }

    #[test]
    fn test_trend_default_unknown() {
        assert_eq!(TrendType::default(), TrendType::Unknown);
        assert_eq!(TrendType::Uptrend.to_string(), "Uptrend");
    }

    #[test]
    fn test_monitor_key_display() {
        let key = MonitorKey::new("BTCUSDT", Timeframe::H1);
        assert_eq!(key.to_string(), "BTCUSDT@1h");
    }

    #[test]
    fn test_candle_range_pct() {
        let candle = Candle {
            open_time: 0, open: 100.0, high: 102.0, low: 98.0,
            close: 100.0, volume: 1.0, close_time: 59_999,
        };
        assert_eq!(candle.range_pct(), Some(4.0));

        let zero = Candle { close: 0.0, ..candle };
        assert_eq!(zero.range_pct(), None);
    }
}
