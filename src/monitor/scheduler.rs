// Trend Scheduler - Periodic monitoring rounds over every (symbol, timeframe) pair
// Background tokio task, bounded worker fan-out per round, alert dispatch on transitions

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::core::config::MonitorConfig;
use crate::core::types::{now_millis, MonitorKey, Timeframe, TrendType};
use crate::layer1::hybrid::DataSourceMode;
use crate::layer1::source::{DataSourceError, MarketDataSource};
use crate::layer2::indicators::{compute, IndicatorParams, IndicatorRow};
use crate::layer3::classifier::{classify, ClassifierParams, TrendAnalysis};
use crate::layer3::trend_tracker::{Transition, TrendStateTracker};
use crate::monitor::alerts::{AlertDispatcher, DispatchError, SystemAlert, TransitionAlert};
use crate::monitor::error::MonitorError;

// ============================================================================
// Settings
// ============================================================================

/// Immutable snapshot of everything a scheduler run needs
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub indicators: IndicatorParams,
    pub classifier: ClassifierParams,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub interval: Duration,
    pub kline_limit: u32,
    pub max_workers: usize,
    pub dispatch_timeout: Duration,
    pub stop_timeout: Duration,
    pub error_backoff: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            timeframes: config.timeframes.clone(),
            indicators: IndicatorParams::from(&config.analysis),
            classifier: ClassifierParams::from(&config.analysis),
            rsi_overbought: config.analysis.rsi.overbought,
            rsi_oversold: config.analysis.rsi.oversold,
            interval: Duration::from_secs(config.monitoring.monitoring_interval_secs),
            kline_limit: config.monitoring.kline_limit,
            max_workers: config.monitoring.max_workers,
            dispatch_timeout: Duration::from_secs(config.alerts.dispatch_timeout_secs),
            stop_timeout: Duration::from_secs(config.monitoring.stop_timeout_secs),
            error_backoff: Duration::from_secs(config.monitoring.error_backoff_secs),
        }
    }

    /// Pause before the next round. An overrun starts the next round at once
    /// without catching up missed ticks.
    pub fn next_delay(&self, outcome: &Result<RoundStats, MonitorError>, elapsed: Duration) -> Duration {
        match outcome {
            Ok(_) => self.interval.saturating_sub(elapsed),
            Err(_) => self.error_backoff,
        }
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        let mut errors = Vec::new();
        let ind = &self.indicators;

        if ind.ma_short_period >= ind.ma_long_period {
            errors.push("ma_short_period must be less than ma_long_period".to_string());
        }
        if self.rsi_oversold >= self.rsi_overbought {
            errors.push("rsi_oversold must be less than rsi_overbought".to_string());
        }
        for (name, value) in [
            ("bb_period", ind.bb_period),
            ("rsi_period", ind.rsi_period),
            ("ma_short_period", ind.ma_short_period),
            ("volatility_window", ind.volatility_window),
            ("confirmation_periods", self.classifier.confirmation_periods),
            ("max_workers", self.max_workers),
        ] {
            if value == 0 {
                errors.push(format!("{} must be positive", name));
            }
        }
        if !(ind.bb_std_dev > 0.0) {
            errors.push("bb_std_dev must be positive".to_string());
        }
        if self.kline_limit == 0 || self.kline_limit > 1000 {
            errors.push("kline_limit must be between 1 and 1000".to_string());
        }
        if self.timeframes.is_empty() {
            errors.push("at least one timeframe is required".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::InvalidSettings(errors))
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoundStats {
    pub pairs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub transitions_alerted: usize,
    pub dispatch_failures: usize,
    pub duration_ms: u64,
    pub finished_at: i64,
}

impl fmt::Display for RoundStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round: pairs={}, ok={}, failed={}, alerts={}, dispatch_failures={}, took={}ms",
            self.pairs, self.succeeded, self.failed,
            self.transitions_alerted, self.dispatch_failures, self.duration_ms
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub rounds_completed: u64,
    pub round_errors: u64,
    pub pairs_succeeded: u64,
    pub pairs_failed: u64,
    pub transitions_alerted: u64,
    pub dispatch_failures: u64,
    pub last_round: Option<RoundStats>,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scheduler: rounds={}, round_errors={}, pairs_ok={}, pairs_failed={}, alerts={}, dispatch_failures={}",
            self.rounds_completed, self.round_errors, self.pairs_succeeded,
            self.pairs_failed, self.transitions_alerted, self.dispatch_failures
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub is_running: bool,
    pub symbols_count: usize,
    pub timeframes_count: usize,
    pub total_pairs: usize,
    pub trend_summary: BTreeMap<String, BTreeMap<Timeframe, TrendType>>,
    pub data_source_mode: Option<DataSourceMode>,
    pub stats: SchedulerStats,
}

/// On-demand analysis of one pair
#[derive(Debug, Clone, Serialize)]
pub struct PairAnalysis {
    pub key: MonitorKey,
    pub trend: TrendType,
    pub analysis: TrendAnalysis,
    pub latest: Option<IndicatorRow>,
    pub candles: usize,
}

enum PairOutcome {
    Recorded(Transition),
    Alerted,
    DispatchFailed,
    /// Symbol was removed while the pair was in flight
    Discarded,
}

// ============================================================================
// Shared state
// ============================================================================

struct SchedulerInner {
    settings: MonitorSettings,
    symbols: RwLock<Vec<String>>,
    source: Arc<dyn MarketDataSource>,
    dispatcher: Arc<dyn AlertDispatcher>,
    tracker: TrendStateTracker,
    stats: RwLock<SchedulerStats>,
    degraded_reported: AtomicBool,
}

impl SchedulerInner {
    fn keys(&self) -> Vec<MonitorKey> {
        let symbols = self.symbols.read();
        symbols
            .iter()
            .flat_map(|symbol| {
                self.settings
                    .timeframes
                    .iter()
                    .map(move |tf| MonitorKey::new(symbol.clone(), *tf))
            })
            .collect()
    }

    async fn analyze(&self, key: &MonitorKey) -> Result<PairAnalysis, MonitorError> {
        let candles = self
            .source
            .fetch_candles(&key.symbol, key.timeframe, self.settings.kline_limit)
            .await
            .map_err(|e| MonitorError::from_source(&key.to_string(), e))?;

        if candles.is_empty() {
            return Err(MonitorError::DataUnavailable {
                key: key.to_string(),
                source: DataSourceError::DataUnavailable("empty candle series".to_string()),
            });
        }

        let rows = compute(&candles, &self.settings.indicators);
        let (trend, analysis) = classify(&rows, &self.settings.classifier);

        Ok(PairAnalysis {
            key: key.clone(),
            trend,
            analysis,
            latest: rows.last().copied(),
            candles: candles.len(),
        })
    }

    async fn process_pair(&self, key: &MonitorKey) -> Result<PairOutcome, MonitorError> {
        let result = self.analyze(key).await?;

        let snapshot = match result.analysis {
            TrendAnalysis::Indicators(snapshot) => snapshot,
            TrendAnalysis::InsufficientData => {
                return Err(MonitorError::InsufficientHistory {
                    key: key.to_string(),
                    required: self.settings.classifier.min_history,
                    actual: result.candles,
                });
            }
        };

        // Record under the symbol list lock so a concurrent removal cannot be undone
        let transition = {
            let symbols = self.symbols.read();
            if !symbols.contains(&key.symbol) {
                return Ok(PairOutcome::Discarded);
            }
            self.tracker.record(key, result.trend)
        };

        if transition.is_change() {
            debug!(key = %key, transition = %transition, "Trend changed");
        } else {
            debug!(key = %key, trend = %transition.current, "Trend unchanged");
        }

        if !transition.is_alertable() {
            return Ok(PairOutcome::Recorded(transition));
        }

        let alert = TransitionAlert {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            previous_trend: transition.previous,
            current_trend: transition.current,
            price: snapshot.price,
            snapshot,
            timestamp: now_millis(),
        };

        info!(key = %key, transition = %transition, price = snapshot.price, "Trend change detected");

        match self.dispatch(self.dispatcher.notify_transition(&alert)).await {
            Ok(()) => Ok(PairOutcome::Alerted),
            Err(e) => {
                let error = MonitorError::from(e);
                warn!(key = %key, error = %error, "Transition alert dispatch failed");
                Ok(PairOutcome::DispatchFailed)
            }
        }
    }

    async fn dispatch<F>(&self, delivery: F) -> Result<(), DispatchError>
    where
        F: Future<Output = Result<(), DispatchError>>,
    {
        timeout(self.settings.dispatch_timeout, delivery)
            .await
            .unwrap_or(Err(DispatchError::Timeout))
    }

    async fn run_round(self: &Arc<Self>) -> Result<RoundStats, MonitorError> {
        let started = Instant::now();
        let keys = self.keys();
        let mut round = RoundStats { pairs: keys.len(), ..RoundStats::default() };

        if !keys.is_empty() {
            let permits = self.settings.max_workers.min(keys.len()).max(1);
            let semaphore = Arc::new(Semaphore::new(permits));
            let mut tasks = JoinSet::new();

            // Only a closed semaphore escapes here; pair errors stay inside their task
            for key in keys {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| MonitorError::TransientRoundError(e.to_string()))?;
                let inner = Arc::clone(self);
                tasks.spawn(async move {
                    let _permit = permit;
                    inner.process_pair(&key).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => {
                        round.succeeded += 1;
                        match outcome {
                            PairOutcome::Alerted => round.transitions_alerted += 1,
                            PairOutcome::DispatchFailed => round.dispatch_failures += 1,
                            PairOutcome::Recorded(_) | PairOutcome::Discarded => {}
                        }
                    }
                    Ok(Err(e)) => {
                        round.failed += 1;
                        warn!(error = %e, "Pair analysis failed");
                    }
                    Err(e) => {
                        round.failed += 1;
                        error!(error = %e, "Pair task aborted");
                    }
                }
            }
        }

        round.duration_ms = started.elapsed().as_millis() as u64;
        round.finished_at = now_millis();

        {
            let mut stats = self.stats.write();
            stats.rounds_completed += 1;
            stats.pairs_succeeded += round.succeeded as u64;
            stats.pairs_failed += round.failed as u64;
            stats.transitions_alerted += round.transitions_alerted as u64;
            stats.dispatch_failures += round.dispatch_failures as u64;
            stats.last_round = Some(round.clone());
        }

        self.report_degraded_source().await;

        info!(
            pairs = round.pairs,
            succeeded = round.succeeded,
            failed = round.failed,
            alerts = round.transitions_alerted,
            duration_ms = round.duration_ms,
            "Monitoring round complete"
        );
        Ok(round)
    }

    /// One WARNING the first time the source is seen in fallback mode
    async fn report_degraded_source(&self) {
        if self.source.is_degraded() == Some(true) && !self.degraded_reported.swap(true, Ordering::SeqCst) {
            self.send_system(
                SystemAlert::warning("Primary data source unavailable, switched to fallback")
                    .with_detail("source", self.source.name()),
            )
            .await;
        }
    }

    async fn send_system(&self, alert: SystemAlert) {
        if let Err(e) = self.dispatch(self.dispatcher.notify_system(&alert)).await {
            warn!(error = %e, message = %alert.message, "System alert dispatch failed");
            self.stats.write().dispatch_failures += 1;
        }
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = inner.settings.interval.as_secs(), "Monitoring loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        let outcome = inner.run_round().await;
        if let Err(e) = &outcome {
            error!(error = %e, "Monitoring round error");
            inner.stats.write().round_errors += 1;
            inner
                .send_system(SystemAlert::error(format!("Monitoring round failed: {}", e)))
                .await;
        }
        let wait = inner.settings.next_delay(&outcome, started.elapsed());

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            // A stop request or a dropped sender both end the loop
            _ = shutdown.changed() => break,
        }
    }

    info!("Monitoring loop stopped");
}

// ============================================================================
// Scheduler
// ============================================================================

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct TrendScheduler {
    inner: Arc<SchedulerInner>,
    running: AtomicBool,
    lifecycle: Mutex<Option<RunningLoop>>,
}

impl TrendScheduler {
    pub fn new(
        settings: MonitorSettings,
        source: Arc<dyn MarketDataSource>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Result<Self, MonitorError> {
        settings.validate()?;

        let mut symbols: Vec<String> = Vec::with_capacity(settings.symbols.len());
        for symbol in &settings.symbols {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() && !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }

        info!(
            symbols = symbols.len(),
            timeframes = settings.timeframes.len(),
            source = source.name(),
            "Trend scheduler initialized"
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                settings,
                symbols: RwLock::new(symbols),
                source,
                dispatcher,
                tracker: TrendStateTracker::new(),
                stats: RwLock::new(SchedulerStats::default()),
                degraded_reported: AtomicBool::new(false),
            }),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Probe the data source and spawn the monitoring loop
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            warn!("Trend monitor already running");
            return Ok(());
        }

        let probe = self.inner.source.probe().await;
        info!(probe = ?probe, "Data source connectivity");

        if !probe.values().any(|&reachable| reachable) {
            self.inner
                .send_system(
                    SystemAlert::error("Cannot start monitor: no data source reachable")
                        .with_detail("probe", &probe),
                )
                .await;
            return Err(MonitorError::NoSourceReachable);
        }

        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), receiver));
        *lifecycle = Some(RunningLoop { shutdown, handle });
        self.running.store(true, Ordering::SeqCst);

        let settings = &self.inner.settings;
        let symbols = self.symbols();
        self.inner
            .send_system(
                SystemAlert::info("Trend monitor started")
                    .with_detail("symbols", &symbols)
                    .with_detail("timeframes", &settings.timeframes)
                    .with_detail("interval_secs", settings.interval.as_secs()),
            )
            .await;
        Ok(())
    }

    /// Signal the loop and wait up to the stop timeout. A loop that does not
    /// finish in time is left to complete on its own.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(RunningLoop { shutdown, handle }) = lifecycle.take() else {
            return;
        };

        let _ = shutdown.send(true);
        match timeout(self.inner.settings.stop_timeout, handle).await {
            Ok(Ok(())) => debug!("Monitoring loop joined"),
            Ok(Err(e)) => error!(error = %e, "Monitoring loop task failed"),
            Err(_) => warn!(
                timeout_secs = self.inner.settings.stop_timeout.as_secs(),
                "Monitoring loop did not stop in time, abandoning it"
            ),
        }
        self.running.store(false, Ordering::SeqCst);

        self.inner.send_system(SystemAlert::info("Trend monitor stopped")).await;
    }

    /// Run a single round on the caller's task
    pub async fn run_round(&self) -> Result<RoundStats, MonitorError> {
        self.inner.run_round().await
    }

    /// Returns false if the symbol was already monitored
    pub async fn add_symbol(&self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return false;
        }

        {
            let mut symbols = self.inner.symbols.write();
            if symbols.contains(&symbol) {
                return false;
            }
            symbols.push(symbol.clone());
        }

        info!(symbol = %symbol, "Symbol added");
        self.inner
            .send_system(SystemAlert::info(format!("Added symbol {}", symbol)))
            .await;
        true
    }

    /// Remove a symbol and its trend state. Returns false if it was not monitored.
    pub async fn remove_symbol(&self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_uppercase();

        let purged = {
            let mut symbols = self.inner.symbols.write();
            let Some(pos) = symbols.iter().position(|s| *s == symbol) else {
                return false;
            };
            symbols.remove(pos);
            self.inner.tracker.purge_symbol(&symbol)
        };

        info!(symbol = %symbol, purged = purged, "Symbol removed");
        self.inner
            .send_system(SystemAlert::info(format!("Removed symbol {}", symbol)))
            .await;
        true
    }

    pub fn symbols(&self) -> Vec<String> {
        self.inner.symbols.read().clone()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.inner.settings
    }

    pub fn trend(&self, key: &MonitorKey) -> TrendType {
        self.inner.tracker.get(key)
    }

    pub fn tracked_pairs(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.read().clone()
    }

    pub fn status(&self) -> MonitorStatus {
        let symbols_count = self.inner.symbols.read().len();
        let timeframes_count = self.inner.settings.timeframes.len();

        MonitorStatus {
            is_running: self.is_running(),
            symbols_count,
            timeframes_count,
            total_pairs: symbols_count * timeframes_count,
            trend_summary: self.inner.tracker.summary(),
            data_source_mode: self.inner.source.is_degraded().map(|degraded| {
                if degraded {
                    DataSourceMode::Degraded
                } else {
                    DataSourceMode::Primary
                }
            }),
            stats: self.stats(),
        }
    }

    /// Fetch, compute and classify one pair without touching the tracked state
    pub async fn analyze_pair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<PairAnalysis, MonitorError> {
        let key = MonitorKey::new(symbol.trim().to_uppercase(), timeframe);
        self.inner.analyze(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Candle;
    use crate::monitor::alerts::DispatchError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct ConstantSource {
        candles: usize,
        reachable: bool,
    }

    #[async_trait]
    impl MarketDataSource for ConstantSource {
        fn name(&self) -> &str {
            "constant"
        }

        async fn fetch_candles(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            limit: u32,
        ) -> Result<Vec<Candle>, DataSourceError> {
            if symbol == "DOGEUSDT" {
                return Err(DataSourceError::UnsupportedSymbol(symbol.to_string()));
            }
            Ok((0..self.candles.min(limit as usize))
                .map(|i| Candle {
                    open_time: i as i64 * 60_000,
                    open: 100.0,
                    high: 100.0,
                    low: 100.0,
                    close: 100.0,
                    volume: 1.0,
                    close_time: i as i64 * 60_000 + 59_999,
                })
                .collect())
        }

        async fn spot_price(&self, _symbol: &str) -> Result<f64, DataSourceError> {
            Ok(100.0)
        }

        async fn probe(&self) -> BTreeMap<String, bool> {
            let mut map = BTreeMap::new();
            map.insert("constant".to_string(), self.reachable);
            map
        }
    }

    #[derive(Default)]
    struct CountingDispatcher {
        transitions: AtomicUsize,
        systems: AtomicUsize,
    }

    #[async_trait]
    impl AlertDispatcher for CountingDispatcher {
        async fn notify_transition(&self, _alert: &TransitionAlert) -> Result<(), DispatchError> {
            self.transitions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_system(&self, _alert: &SystemAlert) -> Result<(), DispatchError> {
            self.systems.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings(symbols: &[&str]) -> MonitorSettings {
        MonitorSettings {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            timeframes: vec![Timeframe::M1, Timeframe::H1],
            ..MonitorSettings::default()
        }
    }

    fn scheduler(
        symbols: &[&str],
        candles: usize,
        reachable: bool,
    ) -> (TrendScheduler, Arc<CountingDispatcher>) {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let scheduler = TrendScheduler::new(
            settings(symbols),
            Arc::new(ConstantSource { candles, reachable }),
            dispatcher.clone(),
        )
        .unwrap();
        (scheduler, dispatcher)
    }

    #[test]
    fn test_settings_validation() {
        let mut bad = MonitorSettings::default();
        bad.indicators.ma_short_period = 30;
        bad.indicators.ma_long_period = 30;
        bad.rsi_oversold = 70.0;

        match bad.validate() {
            Err(MonitorError::InvalidSettings(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected invalid settings, got {:?}", other),
        }

        let result = TrendScheduler::new(
            bad,
            Arc::new(ConstantSource { candles: 0, reachable: true }),
            Arc::new(CountingDispatcher::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_symbols_normalized() {
        let (scheduler, _) = scheduler(&["btcusdt", "BTCUSDT", " ethusdt "], 100, true);
        assert_eq!(scheduler.symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn test_round_records_without_alerting_first_time() {
        let (scheduler, dispatcher) = scheduler(&["BTCUSDT", "ETHUSDT"], 100, true);

        let round = scheduler.run_round().await.unwrap();
        assert_eq!(round.pairs, 4);
        assert_eq!(round.succeeded, 4);
        assert_eq!(scheduler.tracked_pairs(), 4);
        assert_eq!(
            scheduler.trend(&MonitorKey::new("BTCUSDT", Timeframe::H1)),
            TrendType::Sideways
        );
        assert_eq!(dispatcher.transitions.load(Ordering::SeqCst), 0);

        // Same regime again: no transition
        scheduler.run_round().await.unwrap();
        assert_eq!(dispatcher.transitions.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().rounds_completed, 2);
    }

    #[tokio::test]
    async fn test_insufficient_history_is_failure_without_state() {
        let (scheduler, _) = scheduler(&["BTCUSDT"], 10, true);

        let round = scheduler.run_round().await.unwrap();
        assert_eq!(round.failed, 2);
        assert_eq!(round.succeeded, 0);
        assert_eq!(scheduler.tracked_pairs(), 0);

        let stats = scheduler.stats();
        assert_eq!(stats.rounds_completed, 1);
        assert_eq!(stats.pairs_failed, 2);
        assert_eq!(stats.round_errors, 0);
    }

    #[test]
    fn test_next_delay() {
        let settings = MonitorSettings::default();
        let ok: Result<RoundStats, MonitorError> = Ok(RoundStats::default());

        assert_eq!(settings.next_delay(&ok, Duration::from_secs(15)), Duration::from_secs(45));
        assert_eq!(settings.next_delay(&ok, Duration::from_secs(90)), Duration::ZERO);

        let escaped = Err(MonitorError::TransientRoundError("semaphore closed".to_string()));
        assert_eq!(settings.next_delay(&escaped, Duration::from_secs(1)), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_partial_failures_do_not_fail_round() {
        let (scheduler, _) = scheduler(&["BTCUSDT", "DOGEUSDT"], 100, true);

        let round = scheduler.run_round().await.unwrap();
        assert_eq!(round.succeeded, 2);
        assert_eq!(round.failed, 2);
    }

    #[tokio::test]
    async fn test_add_and_remove_symbol() {
        let (scheduler, dispatcher) = scheduler(&["BTCUSDT"], 100, true);
        scheduler.run_round().await.unwrap();
        assert_eq!(scheduler.tracked_pairs(), 2);

        assert!(scheduler.add_symbol("ethusdt").await);
        assert!(!scheduler.add_symbol("ETHUSDT").await);
        assert_eq!(scheduler.status().total_pairs, 4);

        assert!(scheduler.remove_symbol("BTCUSDT").await);
        assert!(!scheduler.remove_symbol("BTCUSDT").await);
        assert_eq!(scheduler.tracked_pairs(), 0);
        assert_eq!(dispatcher.systems.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_start_fails_when_unreachable() {
        let (scheduler, dispatcher) = scheduler(&["BTCUSDT"], 100, false);

        let result = scheduler.start().await;
        assert!(matches!(result, Err(MonitorError::NoSourceReachable)));
        assert!(!scheduler.is_running());
        assert_eq!(dispatcher.systems.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (scheduler, dispatcher) = scheduler(&["BTCUSDT"], 100, true);

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        scheduler.start().await.unwrap();

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        scheduler.stop().await;

        // started + stopped
        assert_eq!(dispatcher.systems.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_analyze_pair_leaves_state_untouched() {
        let (scheduler, _) = scheduler(&["BTCUSDT"], 100, true);

        let analysis = scheduler.analyze_pair("btcusdt", Timeframe::H4).await.unwrap();
        assert_eq!(analysis.key, MonitorKey::new("BTCUSDT", Timeframe::H4));
        assert_eq!(analysis.trend, TrendType::Sideways);
        assert_eq!(analysis.candles, 100);
        assert!(analysis.latest.is_some());
        assert_eq!(scheduler.tracked_pairs(), 0);
    }

    #[test]
    fn test_status_without_failover_layer() {
        let (scheduler, _) = scheduler(&["BTCUSDT"], 100, true);
        let status = scheduler.status();
        assert!(!status.is_running);
        assert_eq!(status.symbols_count, 1);
        assert_eq!(status.timeframes_count, 2);
        assert!(status.data_source_mode.is_none());
    }
}
