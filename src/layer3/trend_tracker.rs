// Trend State Tracker - Last observed trend per (symbol, timeframe)
// Atomic record-and-compare plus the alertable transition table

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::core::types::{MonitorKey, Timeframe, TrendType};

/// Ordered (previous, current) pairs that raise an alert
pub const ALERTABLE_TRANSITIONS: [(TrendType, TrendType); 6] = [
    (TrendType::Sideways, TrendType::Uptrend),
    (TrendType::Sideways, TrendType::Downtrend),
    (TrendType::Uptrend, TrendType::Sideways),
    (TrendType::Downtrend, TrendType::Sideways),
    (TrendType::Uptrend, TrendType::Downtrend),
    (TrendType::Downtrend, TrendType::Uptrend),
];

pub fn is_alertable(previous: TrendType, current: TrendType) -> bool {
    ALERTABLE_TRANSITIONS.contains(&(previous, current))
}

/// Human label for an alertable transition
pub fn transition_label(previous: TrendType, current: TrendType) -> &'static str {
    match (previous, current) {
        (TrendType::Sideways, TrendType::Uptrend) => "breakout up",
        (TrendType::Sideways, TrendType::Downtrend) => "breakout down",
        (TrendType::Uptrend, TrendType::Sideways) => "uptrend stalled",
        (TrendType::Downtrend, TrendType::Sideways) => "downtrend stalled",
        (TrendType::Uptrend, TrendType::Downtrend) | (TrendType::Downtrend, TrendType::Uptrend) => {
            "trend reversal"
        }
        _ => "trend change",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub previous: TrendType,
    pub current: TrendType,
}

impl Transition {
    pub fn is_alertable(&self) -> bool {
        is_alertable(self.previous, self.current)
    }

    pub fn is_change(&self) -> bool {
        self.previous != self.current
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.previous, self.current)
    }
}

// ============================================================================
// Tracker
// ============================================================================

#[derive(Debug, Default)]
pub struct TrendStateTracker {
    states: Mutex<HashMap<MonitorKey, TrendType>>,
}

impl TrendStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `current` and return what it replaced, under a single lock
    pub fn record(&self, key: &MonitorKey, current: TrendType) -> Transition {
        let mut states = self.states.lock();
        let previous = states.insert(key.clone(), current).unwrap_or_default();
        Transition { previous, current }
    }

    pub fn get(&self, key: &MonitorKey) -> TrendType {
        self.states.lock().get(key).copied().unwrap_or_default()
    }

    /// symbol → timeframe → trend, ordered for display
    pub fn summary(&self) -> BTreeMap<String, BTreeMap<Timeframe, TrendType>> {
        let mut summary: BTreeMap<String, BTreeMap<Timeframe, TrendType>> = BTreeMap::new();
        for (key, trend) in self.states.lock().iter() {
            summary
                .entry(key.symbol.clone())
                .or_default()
                .insert(key.timeframe, *trend);
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Drop every entry of `symbol`, returning how many were removed
    pub fn purge_symbol(&self, symbol: &str) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|key, _| key.symbol != symbol);
        before - states.len()
    }
}
