// Trend Classifier - Rule-based regime detection
// Sideways / uptrend / downtrend votes over the latest indicator row

use serde::Serialize;
use std::fmt;

use crate::core::config::AnalysisConfig;
use crate::core::types::TrendType;
use crate::layer2::indicators::IndicatorRow;

// Neutral RSI zone used by the sideways vote
const RSI_NEUTRAL_LOW: f64 = 30.0;
const RSI_NEUTRAL_HIGH: f64 = 70.0;

const SIDEWAYS_MIN_VOTES: usize = 3;
const TREND_MIN_VOTES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierParams {
    pub min_history: usize,
    pub confirmation_periods: usize,
    pub sideways_threshold: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            min_history: 30,
            confirmation_periods: 3,
            sideways_threshold: 0.02,
        }
    }
}

impl From<&AnalysisConfig> for ClassifierParams {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            min_history: config
                .bollinger_bands
                .period
                .max(config.rsi.period)
                .max(config.moving_averages.long_period),
            confirmation_periods: config.trend_confirmation_periods,
            sideways_threshold: config.sideways_threshold,
        }
    }
}

// ============================================================================
// Analysis result
// ============================================================================

/// Latest indicator values the classification was made from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub bb_position: Option<f64>,
    pub bb_width: Option<f64>,
    pub rsi: Option<f64>,
    pub ma_diff_pct: Option<f64>,
    pub volatility: Option<f64>,
    pub price_range_pct: Option<f64>,
}

impl From<&IndicatorRow> for IndicatorSnapshot {
    fn from(row: &IndicatorRow) -> Self {
        Self {
            price: row.close,
            bb_position: row.bb_position,
            bb_width: row.bb_width,
            rsi: row.rsi,
            ma_diff_pct: row.ma_diff_pct,
            volatility: row.volatility,
            price_range_pct: row.price_range_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendAnalysis {
    InsufficientData,
    Indicators(IndicatorSnapshot),
}

impl TrendAnalysis {
    pub fn snapshot(&self) -> Option<&IndicatorSnapshot> {
        match self {
            TrendAnalysis::Indicators(snapshot) => Some(snapshot),
            TrendAnalysis::InsufficientData => None,
        }
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for TrendAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendAnalysis::InsufficientData => write!(f, "insufficient data"),
            TrendAnalysis::Indicators(s) => write!(
                f,
                "price={:.4}, bb_position={}, bb_width={}, rsi={}, ma_diff={}%, volatility={}",
                s.price,
                fmt_opt(s.bb_position, 3),
                fmt_opt(s.bb_width, 4),
                fmt_opt(s.rsi, 2),
                fmt_opt(s.ma_diff_pct, 2),
                fmt_opt(s.volatility, 4),
            ),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

fn votes(conditions: &[bool]) -> usize {
    conditions.iter().filter(|&&c| c).count()
}

/// Classify the current regime of an indicator series.
///
/// Conditions whose input is undefined vote false. Sideways has precedence,
/// then uptrend, then downtrend; anything else defaults to sideways.
pub fn classify(rows: &[IndicatorRow], params: &ClassifierParams) -> (TrendType, TrendAnalysis) {
    let latest = match rows.last() {
        Some(latest) if rows.len() >= params.min_history => latest,
        _ => return (TrendType::Unknown, TrendAnalysis::InsufficientData),
    };

    let snapshot = IndicatorSnapshot::from(latest);
    let window = &rows[rows.len() - params.confirmation_periods.clamp(1, rows.len())..];
    let first_close = window[0].close;
    let last_close = latest.close;
    let threshold = params.sideways_threshold;

    let is = |value: Option<f64>, predicate: fn(f64, f64) -> bool, arg: f64| {
        value.map_or(false, |v| predicate(v, arg))
    };

    let sideways = votes(&[
        is(snapshot.bb_width, |w, t| w < t, threshold),
        is(snapshot.rsi, |r, _| RSI_NEUTRAL_LOW < r && r < RSI_NEUTRAL_HIGH, 0.0),
        is(snapshot.ma_diff_pct, |d, _| d.abs() < 2.0, 0.0),
        is(snapshot.bb_position, |p, _| 0.2 < p && p < 0.8, 0.0),
    ]);

    let uptrend = votes(&[
        is(snapshot.ma_diff_pct, |d, _| d > 1.0, 0.0),
        is(snapshot.bb_position, |p, _| p > 0.7, 0.0),
        last_close > first_close * (1.0 + threshold / 2.0),
    ]);

    let downtrend = votes(&[
        is(snapshot.ma_diff_pct, |d, _| d < -1.0, 0.0),
        is(snapshot.bb_position, |p, _| p < 0.3, 0.0),
        last_close < first_close * (1.0 - threshold / 2.0),
    ]);

    let trend = if sideways >= SIDEWAYS_MIN_VOTES {
        TrendType::Sideways
    } else if uptrend >= TREND_MIN_VOTES {
        TrendType::Uptrend
    } else if downtrend >= TREND_MIN_VOTES {
        TrendType::Downtrend
    } else {
        TrendType::Sideways
    };

    (trend, TrendAnalysis::Indicators(snapshot))
}
