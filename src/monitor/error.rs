// Monitor Error Taxonomy

use thiserror::Error;

use crate::layer1::source::DataSourceError;
use crate::monitor::alerts::DispatchError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Data unavailable for {key}: {source}")]
    DataUnavailable {
        key: String,
        #[source]
        source: DataSourceError,
    },
    #[error("Insufficient history for {key}: need {required} candles, got {actual}")]
    InsufficientHistory {
        key: String,
        required: usize,
        actual: usize,
    },
    #[error("Unsupported symbol: {0}")]
    UnsupportedSymbol(String),
    #[error("Alert dispatch failed: {0}")]
    DispatchFailure(#[from] DispatchError),
    #[error("Round failed: {0}")]
    TransientRoundError(String),
    #[error("No data source reachable")]
    NoSourceReachable,
    #[error("Invalid settings: {}", .0.join("; "))]
    InvalidSettings(Vec<String>),
}

impl MonitorError {
    /// Classify a data source failure for one pair
    pub fn from_source(key: &str, error: DataSourceError) -> Self {
        match error {
            DataSourceError::UnsupportedSymbol(symbol) => MonitorError::UnsupportedSymbol(symbol),
            source => MonitorError::DataUnavailable { key: key.to_string(), source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_source_classification() {
        let err = MonitorError::from_source(
            "DOGEUSDT@1h",
            DataSourceError::UnsupportedSymbol("DOGEUSDT".to_string()),
        );
        assert!(matches!(err, MonitorError::UnsupportedSymbol(ref s) if s == "DOGEUSDT"));

        let err = MonitorError::from_source("BTCUSDT@1h", DataSourceError::Parse("bad".to_string()));
        assert!(err.to_string().starts_with("Data unavailable for BTCUSDT@1h"));
    }

    #[test]
    fn test_insufficient_history_message() {
        let err = MonitorError::InsufficientHistory {
            key: "BTCUSDT@1d".to_string(),
            required: 30,
            actual: 7,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient history for BTCUSDT@1d: need 30 candles, got 7"
        );
    }

    #[test]
    fn test_dispatch_error_wraps_as_dispatch_failure() {
        let err = MonitorError::from(DispatchError::Rejected { status: 502 });
        assert!(matches!(err, MonitorError::DispatchFailure(DispatchError::Rejected { status: 502 })));
        assert_eq!(err.to_string(), "Alert dispatch failed: Alert rejected with status 502");
    }
}
