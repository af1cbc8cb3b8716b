// Layer 2 - Indicator computation over candle series

pub mod indicators;

pub use indicators::{compute, IndicatorParams, IndicatorRow, IndicatorSet};
