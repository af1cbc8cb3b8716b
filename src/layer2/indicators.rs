// Indicator Engine - Bollinger Bands, RSI, moving averages and volatility
// Pure batch computation over a candle series; one output row per candle

use serde::Serialize;

use crate::core::config::AnalysisConfig;
use crate::core::types::Candle;

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub rsi_period: usize,
    pub ma_short_period: usize,
    pub ma_long_period: usize,
    pub volatility_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_std_dev: 2.0,
            rsi_period: 14,
            ma_short_period: 10,
            ma_long_period: 30,
            volatility_window: 20,
        }
    }
}

impl From<&AnalysisConfig> for IndicatorParams {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            bb_period: config.bollinger_bands.period,
            bb_std_dev: config.bollinger_bands.std_dev,
            rsi_period: config.rsi.period,
            ma_short_period: config.moving_averages.short_period,
            ma_long_period: config.moving_averages.long_period,
            volatility_window: config.volatility_window,
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Derived values for one candle. `None` means undefined at this index.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IndicatorRow {
    pub open_time: i64,
    pub close: f64,

    pub bb_middle: Option<f64>,
    pub bb_std: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    /// Not clamped: below 0 or above 1 when price is outside the bands
    pub bb_position: Option<f64>,

    pub rsi: Option<f64>,

    pub ma_short: Option<f64>,
    pub ma_long: Option<f64>,
    pub ma_diff_pct: Option<f64>,

    pub returns: Option<f64>,
    pub volatility: Option<f64>,
    pub price_range_pct: Option<f64>,
}

pub type IndicatorSet = Vec<IndicatorRow>;

// ============================================================================
// Rolling helpers
// ============================================================================

/// The `len` values ending at `end` inclusive, if that many exist
fn trailing<T>(values: &[T], end: usize, len: usize) -> Option<&[T]> {
    if len == 0 || end + 1 < len || end >= values.len() {
        return None;
    }
    Some(&values[end + 1 - len..=end])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (N−1), undefined below two values
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Every value of the window must be defined
fn defined(values: &[Option<f64>]) -> Option<Vec<f64>> {
    values.iter().copied().collect()
}

fn sma_at(closes: &[f64], i: usize, period: usize) -> Option<f64> {
    trailing(closes, i, period).map(mean)
}

fn rsi_at(deltas: &[Option<f64>], i: usize, period: usize) -> Option<f64> {
    let window = defined(trailing(deltas, i, period)?)?;

    let gain = window.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let loss = window.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

    if loss == 0.0 {
        return if gain == 0.0 { None } else { Some(100.0) };
    }
    Some(100.0 - 100.0 / (1.0 + gain / loss))
}

// ============================================================================
// Engine
// ============================================================================

/// Compute every indicator for every candle.
///
/// Row `i` depends only on candles `..=i`, so appending candles never changes
/// earlier rows.
pub fn compute(candles: &[Candle], params: &IndicatorParams) -> IndicatorSet {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let deltas: Vec<Option<f64>> = (0..closes.len())
        .map(|i| if i == 0 { None } else { Some(closes[i] - closes[i - 1]) })
        .collect();

    let returns: Vec<Option<f64>> = (0..closes.len())
        .map(|i| {
            if i == 0 || closes[i - 1] == 0.0 {
                None
            } else {
                Some((closes[i] - closes[i - 1]) / closes[i - 1])
            }
        })
        .collect();

    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let mut row = IndicatorRow {
                open_time: candle.open_time,
                close: candle.close,
                returns: returns[i],
                price_range_pct: candle.range_pct(),
                ..IndicatorRow::default()
            };

            // Bollinger Bands
            if let Some(window) = trailing(&closes, i, params.bb_period) {
                let middle = mean(window);
                row.bb_middle = Some(middle);
                row.bb_std = sample_std(window);

                if let Some(std) = row.bb_std {
                    let upper = middle + std * params.bb_std_dev;
                    let lower = middle - std * params.bb_std_dev;
                    row.bb_upper = Some(upper);
                    row.bb_lower = Some(lower);
                    row.bb_width = if middle != 0.0 { Some((upper - lower) / middle) } else { None };
                    // Zero-width band: position undefined
                    row.bb_position = if upper != lower {
                        Some((candle.close - lower) / (upper - lower))
                    } else {
                        None
                    };
                }
            }

            row.rsi = rsi_at(&deltas, i, params.rsi_period);

            // Moving averages
            row.ma_short = sma_at(&closes, i, params.ma_short_period);
            row.ma_long = sma_at(&closes, i, params.ma_long_period);
            row.ma_diff_pct = match (row.ma_short, row.ma_long) {
                (Some(short), Some(long)) if long != 0.0 => Some((short - long) / long * 100.0),
                _ => None,
            };

            // Volatility
            row.volatility = trailing(&returns, i, params.volatility_window)
                .and_then(defined)
                .and_then(|window| sample_std(&window))
                .map(|std| std * (params.volatility_window as f64).sqrt());

            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: i as i64 * 60_000,
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1.0,
                close_time: i as i64 * 60_000 + 59_999,
            })
            .collect()
    }

    #[test]
    fn test_constant_series_zero_width_band() {
        let candles = candles_from_closes(&[100.0; 25]);
        let rows = compute(&candles, &IndicatorParams::default());
        let last = rows[24];

        assert_eq!(last.bb_middle, Some(100.0));
        assert_eq!(last.bb_std, Some(0.0));
        assert_eq!(last.bb_upper, Some(100.0));
        assert_eq!(last.bb_lower, Some(100.0));
        assert_eq!(last.bb_width, Some(0.0));
        assert_eq!(last.bb_position, None);
        // No movement at all: RSI undefined
        assert_eq!(last.rsi, None);
    }

    #[test]
    fn test_warmup_rows_undefined() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let rows = compute(&candles_from_closes(&closes), &IndicatorParams::default());

        assert!(rows[18].bb_middle.is_none());
        assert!(rows[19].bb_middle.is_some());
        assert!(rows[13].rsi.is_none());
        assert!(rows[14].rsi.is_some());
        assert!(rows[8].ma_short.is_none());
        assert!(rows[9].ma_short.is_some());
        assert!(rows[28].ma_long.is_none());
        assert!(rows[29].ma_diff_pct.is_some());
        assert!(rows[0].returns.is_none());
        assert!(rows[19].volatility.is_none());
        assert!(rows[20].volatility.is_some());
    }

    #[test]
    fn test_rsi_strictly_increasing_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.5).collect();
        let params = IndicatorParams { rsi_period: 14, ..IndicatorParams::default() };
        let rows = compute(&candles_from_closes(&closes), &params);

        for row in &rows[14..] {
            assert_eq!(row.rsi, Some(100.0));
        }
    }

    #[test]
    fn test_rsi_balanced_moves_is_50() {
        let closes: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let params = IndicatorParams { rsi_period: 14, ..IndicatorParams::default() };
        let rows = compute(&candles_from_closes(&closes), &params);

        let rsi = rows[29].rsi.unwrap();
        assert!((rsi - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_strictly_decreasing_rsi_is_zero() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        let rows = compute(&candles_from_closes(&closes), &IndicatorParams::default());
        assert_eq!(rows[19].rsi, Some(0.0));
    }

    #[test]
    fn test_shift_invariance() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let candles = candles_from_closes(&closes);
        let params = IndicatorParams::default();

        let shorter = compute(&candles[..59], &params);
        let longer = compute(&candles, &params);

        assert_eq!(&longer[..59], &shorter[..]);
    }

    #[test]
    fn test_bb_position_not_clamped() {
        let mut closes = vec![100.0; 19];
        closes.push(100.5);
        closes.push(150.0);
        let rows = compute(&candles_from_closes(&closes), &IndicatorParams::default());
        assert!(rows[20].bb_position.unwrap() > 1.0);
    }

    #[test]
    fn test_price_range_pct() {
        let rows = compute(&candles_from_closes(&[100.0]), &IndicatorParams::default());
        assert!((rows[0].price_range_pct.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        assert!(compute(&[], &IndicatorParams::default()).is_empty());
    }
}
