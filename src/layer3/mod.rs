// Layer 3 - Trend classification and per-pair state tracking

pub mod classifier;
pub mod trend_tracker;

pub use classifier::{classify, ClassifierParams, IndicatorSnapshot, TrendAnalysis};
pub use trend_tracker::{
    is_alertable, transition_label, Transition, TrendStateTracker, ALERTABLE_TRANSITIONS,
};
