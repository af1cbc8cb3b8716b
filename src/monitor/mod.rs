// Monitor - Scheduling loop, alert dispatch and error taxonomy

pub mod error;
pub mod alerts;
pub mod scheduler;

pub use error::MonitorError;
pub use alerts::{
    AlertDispatcher, AlertLevel, AlertManager, AlertStatistics, DispatchError, EventBusSink,
    FileSink, LogSink, SystemAlert, TransitionAlert, WebhookSink,
};
pub use scheduler::{
    MonitorSettings, MonitorStatus, PairAnalysis, RoundStats, SchedulerStats, TrendScheduler,
};
