// Configuration Management for Trend Monitor
// JSON file + environment overrides, validated before the scheduler is built

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::Timeframe;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerConfig {
    pub period: usize,
    pub std_dev: f64,
}

impl Default for BollingerConfig {
    fn default() -> Self {
        Self { period: 20, std_dev: 2.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self { period: 14, overbought: 70.0, oversold: 30.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingAverageConfig {
    pub short_period: usize,
    pub long_period: usize,
}

impl Default for MovingAverageConfig {
    fn default() -> Self {
        Self { short_period: 10, long_period: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub bollinger_bands: BollingerConfig,
    pub rsi: RsiConfig,
    pub moving_averages: MovingAverageConfig,
    pub sideways_threshold: f64,
    pub trend_confirmation_periods: usize,
    pub volatility_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bollinger_bands: BollingerConfig::default(),
            rsi: RsiConfig::default(),
            moving_averages: MovingAverageConfig::default(),
            sideways_threshold: 0.02,
            trend_confirmation_periods: 3,
            volatility_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub console_output: bool,
    pub webhook_url: Option<String>,
    /// JSON-lines alert log, appended to on every alert
    pub log_file: Option<String>,
    pub dispatch_timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            console_output: true,
            webhook_url: None,
            log_file: None,
            dispatch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Primary candidate base URLs, tried in order
    pub base_urls: Vec<String>,
    pub request_timeout_secs: u64,
    pub min_request_interval_ms: u64,

    // Fallback source
    pub fallback_base_url: String,
    pub fallback_probe_url: String,
    pub fallback_timeout_secs: u64,
    pub fallback_min_request_interval_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_urls: vec![
                "https://data-api.binance.vision".to_string(),
                "https://api.binance.com".to_string(),
            ],
            request_timeout_secs: 15,
            min_request_interval_ms: 100,
            fallback_base_url: "https://api.coingecko.com/api/v3".to_string(),
            fallback_probe_url: "https://min-api.cryptocompare.com/data".to_string(),
            fallback_timeout_secs: 15,
            fallback_min_request_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub monitoring_interval_secs: u64,
    pub kline_limit: u32,
    pub max_workers: usize,
    pub stop_timeout_secs: u64,
    pub error_backoff_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_secs: 60,
            kline_limit: 100,
            max_workers: 10,
            stop_timeout_secs: 5,
            error_backoff_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "INFO".to_string(), json_format: false }
    }
}

/// Full monitor configuration. Every section falls back to its defaults
/// when missing from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub analysis: AnalysisConfig,
    pub alerts: AlertsConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            timeframes: vec![
                Timeframe::M1, Timeframe::M5, Timeframe::M15,
                Timeframe::H1, Timeframe::H4, Timeframe::D1,
            ],
            analysis: AnalysisConfig::default(),
            alerts: AlertsConfig::default(),
            api: ApiConfig::default(),
            monitoring: MonitoringConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Check every constraint and report all violations at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.symbols.is_empty() {
            errors.push("symbols must be a non-empty list".to_string());
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            errors.push("symbols must not contain empty entries".to_string());
        }
        if self.timeframes.is_empty() {
            errors.push("timeframes must be a non-empty list".to_string());
        }

        let a = &self.analysis;
        check_range(&mut errors, "analysis.bollinger_bands.period", a.bollinger_bands.period as f64, 1.0, 100.0);
        check_range(&mut errors, "analysis.bollinger_bands.std_dev", a.bollinger_bands.std_dev, 0.1, 5.0);
        check_range(&mut errors, "analysis.rsi.period", a.rsi.period as f64, 1.0, 50.0);
        check_range(&mut errors, "analysis.rsi.overbought", a.rsi.overbought, 50.0, 100.0);
        check_range(&mut errors, "analysis.rsi.oversold", a.rsi.oversold, 0.0, 50.0);
        check_range(&mut errors, "analysis.moving_averages.short_period", a.moving_averages.short_period as f64, 1.0, 50.0);
        check_range(&mut errors, "analysis.moving_averages.long_period", a.moving_averages.long_period as f64, 1.0, 200.0);
        check_range(&mut errors, "analysis.sideways_threshold", a.sideways_threshold, 0.001, 0.1);
        check_range(&mut errors, "analysis.trend_confirmation_periods", a.trend_confirmation_periods as f64, 1.0, 10.0);
        check_range(&mut errors, "analysis.volatility_window", a.volatility_window as f64, 2.0, 200.0);
        check_range(&mut errors, "monitoring.monitoring_interval_secs", self.monitoring.monitoring_interval_secs as f64, 1.0, 3600.0);
        check_range(&mut errors, "monitoring.kline_limit", self.monitoring.kline_limit as f64, 1.0, 1000.0);
        check_range(&mut errors, "monitoring.max_workers", self.monitoring.max_workers as f64, 1.0, 64.0);

        if a.moving_averages.short_period >= a.moving_averages.long_period {
            errors.push("moving_averages.short_period must be less than long_period".to_string());
        }
        if a.rsi.oversold >= a.rsi.overbought {
            errors.push("rsi.oversold must be less than rsi.overbought".to_string());
        }
        if self.api.base_urls.is_empty() {
            errors.push("api.base_urls must contain at least one endpoint".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            Err(ConfigError::Validation(errors))
        }
    }
}

fn check_range(errors: &mut Vec<String>, name: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        errors.push(format!("{} must be between {} and {} (got {})", name, min, max, value));
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub bb_period: usize,
    pub rsi_period: usize,
    pub ma_short_period: usize,
    pub ma_long_period: usize,
    pub sideways_threshold_pct: f64,
    pub monitoring_interval_secs: u64,
    pub webhook_enabled: bool,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    config: Arc<RwLock<MonitorConfig>>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let manager = Self {
            config: Arc::new(RwLock::new(MonitorConfig::default())),
            path: config_path.map(PathBuf::from),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration from JSON file. A missing file keeps the defaults.
    pub fn load_from_file(&self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found, using defaults");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let loaded: MonitorConfig = serde_json::from_str(&content)?;
        *self.config.write() = loaded;

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Apply environment overrides
    pub fn load_from_env(&self) {
        let mut config = self.config.write();

        if let Ok(symbols) = std::env::var("TREND_MONITOR_SYMBOLS") {
            let parsed: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.symbols = parsed;
            }
        }
        if let Ok(interval) = std::env::var("TREND_MONITOR_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => config.monitoring.monitoring_interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid TREND_MONITOR_INTERVAL_SECS"),
            }
        }
        if let Ok(url) = std::env::var("TREND_MONITOR_WEBHOOK_URL") {
            config.alerts.webhook_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Ok(level) = std::env::var("TREND_MONITOR_LOG_LEVEL") {
            config.logging.level = level;
        }
    }

    /// Save configuration to JSON file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        if let Some(parent) = Path::new(config_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&*self.config.read())?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.read().validate()?;
        info!("Configuration validated successfully");
        Ok(())
    }

    /// Apply a change; rolls back if the result does not validate
    pub fn update<F>(&self, apply: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut MonitorConfig),
    {
        let mut config = self.config.write();
        let backup = config.clone();
        apply(&mut config);

        if let Err(e) = config.validate() {
            *config = backup;
            warn!(error = %e, "Configuration update rejected");
            return Err(e);
        }

        info!("Configuration updated");
        Ok(())
    }

    pub fn summary(&self) -> ConfigSummary {
        let config = self.config.read();
        ConfigSummary {
            symbols: config.symbols.clone(),
            timeframes: config.timeframes.clone(),
            bb_period: config.analysis.bollinger_bands.period,
            rsi_period: config.analysis.rsi.period,
            ma_short_period: config.analysis.moving_averages.short_period,
            ma_long_period: config.analysis.moving_averages.long_period,
            sideways_threshold_pct: config.analysis.sideways_threshold * 100.0,
            monitoring_interval_secs: config.monitoring.monitoring_interval_secs,
            webhook_enabled: config.alerts.webhook_url.is_some(),
            log_level: config.logging.level.clone(),
        }
    }

    /// Static snapshot of the current configuration
    pub fn config(&self) -> MonitorConfig {
        self.config.read().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("trend_monitor_{}_{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.timeframes.len(), 6);
        assert_eq!(config.analysis.bollinger_bands.period, 20);
        assert_eq!(config.monitoring.monitoring_interval_secs, 60);
    }

    #[test]
    fn test_ma_periods_must_be_ordered() {
        let mut config = MonitorConfig::default();
        config.analysis.moving_averages.short_period = 30;
        config.analysis.moving_averages.long_period = 30;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("short_period must be less")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rsi_bounds_must_be_ordered() {
        let mut config = MonitorConfig::default();
        config.analysis.rsi.oversold = 50.0;
        config.analysis.rsi.overbought = 50.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = MonitorConfig::default();
        config.symbols.clear();
        config.timeframes.clear();
        config.analysis.sideways_threshold = 0.5;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = temp_path("partial");
        fs::write(&path, r#"{"symbols": ["SOLUSDT"], "timeframes": ["1h", "4h"]}"#).unwrap();

        let manager = ConfigManager::new(path.to_str()).unwrap();
        let config = manager.config();
        assert_eq!(config.symbols, vec!["SOLUSDT"]);
        assert_eq!(config.timeframes, vec![Timeframe::H1, Timeframe::H4]);
        assert_eq!(config.analysis.rsi.period, 14);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_invalid_timeframe_in_file_is_rejected() {
        let path = temp_path("bad_tf");
        fs::write(&path, r#"{"timeframes": ["7m"]}"#).unwrap();

        let result = ConfigManager::new(path.to_str());
        assert!(matches!(result, Err(ConfigError::Json(_))));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = temp_path("missing");
        let manager = ConfigManager::new(path.to_str()).unwrap();
        assert_eq!(manager.config().symbols.len(), 2);
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_path("save");
        let manager = ConfigManager::new(None).unwrap();
        manager
            .update(|c| c.symbols.push("ADAUSDT".to_string()))
            .unwrap();
        manager.save_to_file(path.to_str().unwrap()).unwrap();

        let reloaded = ConfigManager::new(path.to_str()).unwrap();
        assert!(reloaded.config().symbols.contains(&"ADAUSDT".to_string()));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_update_rolls_back_on_invalid() {
        let manager = ConfigManager::new(None).unwrap();
        let result = manager.update(|c| c.analysis.moving_averages.short_period = 100);
        assert!(result.is_err());
        assert_eq!(manager.config().analysis.moving_averages.short_period, 10);
    }

    #[test]
    fn test_summary() {
        let manager = ConfigManager::new(None).unwrap();
        let summary = manager.summary();
        assert_eq!(summary.bb_period, 20);
        assert!((summary.sideways_threshold_pct - 2.0).abs() < 1e-12);
    }
}
