// Alert Dispatch - Contract plus log, file, event bus and webhook sinks
// AlertManager fans each alert out to every registered sink

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::config::AlertsConfig;
use crate::core::events::{Event, EventBus, EventPriority, SYSTEM_ALERT_EVENT, TREND_CHANGE_EVENT};
use crate::core::types::{now_millis, Timeframe, TrendType};
use crate::layer3::classifier::IndicatorSnapshot;
use crate::layer3::trend_tracker::transition_label;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Alert rejected with status {status}")]
    Rejected { status: u16 },
    #[error("Alert dispatch timed out")]
    Timeout,
    #[error("Sink error: {0}")]
    Sink(String),
    #[error("Alert log error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Alert Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionAlert {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub previous_trend: TrendType,
    pub current_trend: TrendType,
    pub price: f64,
    pub snapshot: IndicatorSnapshot,
    pub timestamp: i64,
}

impl TransitionAlert {
    pub fn label(&self) -> &'static str {
        transition_label(self.previous_trend, self.current_trend)
    }

    /// Multi-line human readable message
    pub fn message(&self) -> String {
        let fmt_opt = |value: Option<f64>, precision: usize| match value {
            Some(v) => format!("{:.*}", precision, v),
            None => "n/a".to_string(),
        };

        format!(
            "TREND CHANGE {}@{}\n\
             price: {:.4}\n\
             trend: {} -> {} ({})\n\
             rsi: {}\n\
             bb_position: {}\n\
             bb_width: {}\n\
             ma_diff: {}%\n\
             volatility: {}",
            self.symbol,
            self.timeframe,
            self.price,
            self.previous_trend,
            self.current_trend,
            self.label(),
            fmt_opt(self.snapshot.rsi, 2),
            fmt_opt(self.snapshot.bb_position, 2),
            fmt_opt(self.snapshot.bb_width, 4),
            fmt_opt(self.snapshot.ma_diff_pct, 2),
            fmt_opt(self.snapshot.volatility, 4),
        )
    }

    fn priority(&self) -> EventPriority {
        match self.label() {
            "trend reversal" => EventPriority::High,
            "breakout up" | "breakout down" => EventPriority::Medium,
            _ => EventPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemAlert {
    pub level: AlertLevel,
    pub message: String,
    pub details: BTreeMap<String, Value>,
    pub timestamp: i64,
}

impl SystemAlert {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: now_millis(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Error, message)
    }

    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        self.details
            .insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    fn priority(&self) -> EventPriority {
        match self.level {
            AlertLevel::Error => EventPriority::Critical,
            AlertLevel::Warning => EventPriority::High,
            AlertLevel::Info => EventPriority::Info,
        }
    }
}

// ============================================================================
// Dispatch Contract
// ============================================================================

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn notify_transition(&self, alert: &TransitionAlert) -> Result<(), DispatchError>;

    async fn notify_system(&self, alert: &SystemAlert) -> Result<(), DispatchError>;
}

// ============================================================================
// Log Sink
// ============================================================================

/// Writes alerts as structured tracing records
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertDispatcher for LogSink {
    async fn notify_transition(&self, alert: &TransitionAlert) -> Result<(), DispatchError> {
        info!(
            target: "trend_monitor::alerts",
            symbol = %alert.symbol,
            timeframe = %alert.timeframe,
            previous = %alert.previous_trend,
            current = %alert.current_trend,
            price = alert.price,
            kind = alert.label(),
            "{}",
            alert.message()
        );
        Ok(())
    }

    async fn notify_system(&self, alert: &SystemAlert) -> Result<(), DispatchError> {
        let details = serde_json::to_string(&alert.details).unwrap_or_default();
        match alert.level {
            AlertLevel::Error => {
                error!(target: "trend_monitor::alerts", details = %details, "SYSTEM: {}", alert.message)
            }
            AlertLevel::Warning => {
                warn!(target: "trend_monitor::alerts", details = %details, "SYSTEM: {}", alert.message)
            }
            AlertLevel::Info => {
                info!(target: "trend_monitor::alerts", details = %details, "SYSTEM: {}", alert.message)
            }
        }
        Ok(())
    }
}

// ============================================================================
// File Sink
// ============================================================================

/// Appends one JSON record per alert to a log file
pub struct FileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: Value) -> Result<(), DispatchError> {
        let mut line = serde_json::to_string(&record).map_err(|e| DispatchError::Sink(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Alert counts read back from the log. A missing file counts as empty.
    pub async fn read_statistics(&self) -> Result<AlertStatistics, DispatchError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AlertStatistics::default()),
            Err(e) => return Err(e.into()),
        };

        let mut stats = AlertStatistics::default();
        for line in contents.lines() {
            let Ok(record) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            stats.total_alerts += 1;
            match record.get("type").and_then(Value::as_str) {
                Some("trend_change_alert") => stats.trend_changes += 1,
                Some("system_alert") => stats.system_alerts += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl AlertDispatcher for FileSink {
    async fn notify_transition(&self, alert: &TransitionAlert) -> Result<(), DispatchError> {
        self.append(json!({
            "type": "trend_change_alert",
            "logged_at": now_millis(),
            "alert_type": alert.label(),
            "message": alert.message(),
            "data": alert,
        }))
        .await
    }

    async fn notify_system(&self, alert: &SystemAlert) -> Result<(), DispatchError> {
        self.append(json!({
            "type": "system_alert",
            "logged_at": now_millis(),
            "message": alert.message,
            "data": alert,
        }))
        .await
    }
}

// ============================================================================
// Event Bus Sink
// ============================================================================

/// Publishes alerts onto the in-process event bus
pub struct EventBusSink {
    bus: Arc<EventBus>,
}

impl EventBusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn to_data<T: Serialize>(alert: &T) -> Result<HashMap<String, Value>, DispatchError> {
        match serde_json::to_value(alert) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(_) => Err(DispatchError::Sink("alert did not serialize to an object".to_string())),
            Err(e) => Err(DispatchError::Sink(e.to_string())),
        }
    }
}

#[async_trait]
impl AlertDispatcher for EventBusSink {
    async fn notify_transition(&self, alert: &TransitionAlert) -> Result<(), DispatchError> {
        let mut data = Self::to_data(alert)?;
        data.insert("alert_type".to_string(), json!(alert.label()));
        data.insert("message".to_string(), json!(alert.message()));

        self.bus.publish(Event::new(
            TREND_CHANGE_EVENT,
            alert.timestamp,
            data,
            "trend_monitor",
            alert.priority(),
        ));
        Ok(())
    }

    async fn notify_system(&self, alert: &SystemAlert) -> Result<(), DispatchError> {
        let data = Self::to_data(alert)?;
        self.bus.publish(Event::new(
            SYSTEM_ALERT_EVENT,
            alert.timestamp,
            data,
            "trend_monitor",
            alert.priority(),
        ));
        Ok(())
    }
}

// ============================================================================
// Webhook Sink
// ============================================================================

/// POSTs `{type, data, message}` JSON to a webhook URL
pub struct WebhookSink {
    url: String,
    client: Client,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.to_string(), client })
    }

    async fn post(&self, payload: Value) -> Result<(), DispatchError> {
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected { status: status.as_u16() });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertDispatcher for WebhookSink {
    async fn notify_transition(&self, alert: &TransitionAlert) -> Result<(), DispatchError> {
        self.post(json!({
            "type": "trend_change_alert",
            "data": alert,
            "message": alert.message(),
        }))
        .await?;
        info!(symbol = %alert.symbol, "Webhook alert delivered");
        Ok(())
    }

    async fn notify_system(&self, alert: &SystemAlert) -> Result<(), DispatchError> {
        self.post(json!({
            "type": "system_alert",
            "data": alert,
            "message": format!("[{}] {}", alert.level, alert.message),
        }))
        .await
    }
}

// ============================================================================
// Alert Manager
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertStatistics {
    pub total_alerts: u64,
    pub trend_changes: u64,
    pub system_alerts: u64,
    pub dispatch_failures: u64,
}

impl fmt::Display for AlertStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Alerts: total={}, trend_changes={}, system={}, failures={}",
            self.total_alerts, self.trend_changes, self.system_alerts, self.dispatch_failures
        )
    }
}

/// Composite dispatcher. Every sink runs; the first error is returned afterwards.
#[derive(Default)]
pub struct AlertManager {
    sinks: Vec<Arc<dyn AlertDispatcher>>,
    stats: Arc<RwLock<AlertStatistics>>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log sink when console output is on, file sink when a log file is set,
    /// event bus sink when a bus is given, webhook sink when a URL is configured
    pub fn from_config(config: &AlertsConfig, bus: Option<Arc<EventBus>>) -> Result<Self, DispatchError> {
        let mut manager = Self::new();

        if config.console_output {
            manager.add_sink(Arc::new(LogSink));
        }
        if let Some(path) = config.log_file.as_deref() {
            manager.add_sink(Arc::new(FileSink::new(path)));
        }
        if let Some(bus) = bus {
            manager.add_sink(Arc::new(EventBusSink::new(bus)));
        }
        if let Some(url) = config.webhook_url.as_deref() {
            manager.add_sink(Arc::new(WebhookSink::new(url, Duration::from_secs(config.dispatch_timeout_secs))?));
        }

        Ok(manager)
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertDispatcher>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn statistics(&self) -> AlertStatistics {
        self.stats.read().clone()
    }

    fn settle(&self, results: Vec<Result<(), DispatchError>>) -> Result<(), DispatchError> {
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                self.stats.write().dispatch_failures += 1;
                warn!(error = %e, "Alert sink failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl AlertDispatcher for AlertManager {
    async fn notify_transition(&self, alert: &TransitionAlert) -> Result<(), DispatchError> {
        {
            let mut stats = self.stats.write();
            stats.total_alerts += 1;
            stats.trend_changes += 1;
        }
        let results = join_all(self.sinks.iter().map(|sink| sink.notify_transition(alert))).await;
        self.settle(results)
    }

    async fn notify_system(&self, alert: &SystemAlert) -> Result<(), DispatchError> {
        {
            let mut stats = self.stats.write();
            stats.total_alerts += 1;
            stats.system_alerts += 1;
        }
        let results = join_all(self.sinks.iter().map(|sink| sink.notify_system(alert))).await;
        self.settle(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(previous: TrendType, current: TrendType) -> TransitionAlert {
        TransitionAlert {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            previous_trend: previous,
            current_trend: current,
            price: 30000.0,
            snapshot: IndicatorSnapshot {
                price: 30000.0,
                bb_position: Some(0.85),
                bb_width: Some(0.031),
                rsi: Some(64.2),
                ma_diff_pct: Some(1.4),
                volatility: None,
                price_range_pct: Some(0.4),
            },
            timestamp: 1_700_000_000_000,
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AlertDispatcher for FailingSink {
        async fn notify_transition(&self, _alert: &TransitionAlert) -> Result<(), DispatchError> {
            Err(DispatchError::Rejected { status: 500 })
        }

        async fn notify_system(&self, _alert: &SystemAlert) -> Result<(), DispatchError> {
            Err(DispatchError::Timeout)
        }
    }

    #[test]
    fn test_transition_message() {
        let alert = transition(TrendType::Sideways, TrendType::Uptrend);
        let message = alert.message();
        assert!(message.contains("BTCUSDT@1h"));
        assert!(message.contains("Sideways -> Uptrend (breakout up)"));
        assert!(message.contains("rsi: 64.20"));
        assert!(message.contains("volatility: n/a"));
        assert_eq!(alert.priority(), EventPriority::Medium);
    }

    #[test]
    fn test_system_alert_details() {
        let alert = SystemAlert::warning("degraded").with_detail("mode", "Degraded");
        assert_eq!(alert.level, AlertLevel::Warning);
        assert_eq!(alert.details["mode"], json!("Degraded"));
        assert_eq!(serde_json::to_value(&alert).unwrap()["level"], json!("WARNING"));
    }

    #[tokio::test]
    async fn test_event_bus_sink_publishes() {
        let bus = Arc::new(EventBus::new());
        let sink = EventBusSink::new(Arc::clone(&bus));

        sink.notify_transition(&transition(TrendType::Uptrend, TrendType::Downtrend))
            .await
            .unwrap();
        sink.notify_system(&SystemAlert::info("started")).await.unwrap();

        let trend_events = bus.get_recent_events(Some(TREND_CHANGE_EVENT), None);
        assert_eq!(trend_events.len(), 1);
        assert_eq!(trend_events[0].priority, EventPriority::High);
        assert_eq!(trend_events[0].data["alert_type"], json!("trend reversal"));
        assert_eq!(trend_events[0].data["symbol"], json!("BTCUSDT"));

        let system_events = bus.get_recent_events(Some(SYSTEM_ALERT_EVENT), None);
        assert_eq!(system_events[0].data["message"], json!("started"));
    }

    #[tokio::test]
    async fn test_manager_runs_every_sink_and_reports_first_error() {
        let bus = Arc::new(EventBus::new());
        let mut manager = AlertManager::new();
        manager.add_sink(Arc::new(FailingSink));
        manager.add_sink(Arc::new(EventBusSink::new(Arc::clone(&bus))));

        let result = manager
            .notify_transition(&transition(TrendType::Sideways, TrendType::Downtrend))
            .await;
        assert!(matches!(result, Err(DispatchError::Rejected { status: 500 })));
        assert_eq!(bus.get_recent_events(None, None).len(), 1);

        let _ = manager.notify_system(&SystemAlert::error("boom")).await;

        let stats = manager.statistics();
        assert_eq!(stats.total_alerts, 2);
        assert_eq!(stats.trend_changes, 1);
        assert_eq!(stats.system_alerts, 1);
        assert_eq!(stats.dispatch_failures, 2);
    }

    #[test]
    fn test_from_config_sinks() {
        let config = AlertsConfig {
            console_output: true,
            webhook_url: Some("http://127.0.0.1:9/hook".to_string()),
            log_file: Some("logs/alerts.log".to_string()),
            dispatch_timeout_secs: 10,
        };
        let manager = AlertManager::from_config(&config, Some(Arc::new(EventBus::new()))).unwrap();
        assert_eq!(manager.sink_count(), 4);

        let quiet = AlertsConfig { console_output: false, ..AlertsConfig::default() };
        assert_eq!(AlertManager::from_config(&quiet, None).unwrap().sink_count(), 0);
    }

    #[tokio::test]
    async fn test_file_sink_appends_and_reads_back() {
        let dir = std::env::temp_dir().join(format!("trend_monitor_alerts_{}", uuid::Uuid::new_v4()));
        let sink = FileSink::new(dir.join("alerts.log"));
        assert_eq!(sink.read_statistics().await.unwrap().total_alerts, 0);

        sink.notify_transition(&transition(TrendType::Sideways, TrendType::Uptrend))
            .await
            .unwrap();
        sink.notify_transition(&transition(TrendType::Uptrend, TrendType::Sideways))
            .await
            .unwrap();
        sink.notify_system(&SystemAlert::warning("degraded")).await.unwrap();

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let records: Vec<Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["alert_type"], json!("breakout up"));
        assert_eq!(records[1]["data"]["current_trend"], json!("Sideways"));
        assert_eq!(records[2]["data"]["level"], json!("WARNING"));

        let stats = sink.read_statistics().await.unwrap();
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.trend_changes, 2);
        assert_eq!(stats.system_alerts, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
