// Core Module - Foundational types, config, logging, events

pub mod types;
pub mod config;
pub mod logger;
pub mod events;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    AlertsConfig, AnalysisConfig, ApiConfig, BollingerConfig, ConfigError, ConfigManager,
    ConfigSummary, LoggingConfig, MonitorConfig, MonitoringConfig, MovingAverageConfig, RsiConfig,
};
pub use logger::setup_logging;
pub use events::{
    Event, EventBus, EventBusStatsSnapshot, EventPriority, SYSTEM_ALERT_EVENT, TREND_CHANGE_EVENT,
};
