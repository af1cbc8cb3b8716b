// Event System for Trend Monitor
// In-process pub/sub bus: callbacks, broadcast channel and bounded history

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use parking_lot::RwLock;
use uuid::Uuid;

pub const TREND_CHANGE_EVENT: &str = "trend_change";
pub const SYSTEM_ALERT_EVENT: &str = "system_alert";

// ============================================================================
// Event Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    Critical = 1,  // Source unreachable, round failures
    High = 2,      // Reversals, degraded data source
    Medium = 3,    // Breakouts
    Low = 4,       // Stalled trends
    Info = 5,      // Lifecycle notices
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub timestamp: i64,
    pub data: HashMap<String, serde_json::Value>,
    pub source: String,
    pub priority: EventPriority,
    pub event_id: String,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        timestamp: i64,
        data: HashMap<String, serde_json::Value>,
        source: impl Into<String>,
        priority: EventPriority,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            data,
            source: source.into(),
            priority,
            event_id: Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(type={}, source={}, priority={:?}, id={})",
            self.event_type,
            self.source,
            self.priority,
            &self.event_id[..8]
        )
    }
}

// ============================================================================
// Event Bus
// ============================================================================

type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    subscribers: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    wildcard_subscribers: Arc<RwLock<Vec<EventCallback>>>,
    event_history: Arc<RwLock<VecDeque<Event>>>,
    max_history: usize,
    stats: Arc<RwLock<EventBusStats>>,
}

#[derive(Debug, Clone, Default)]
struct EventBusStats {
    total_published: u64,
    total_delivered: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_history: usize) -> Self {
        let (tx, _rx) = broadcast::channel(1024);

        Self {
            tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            wildcard_subscribers: Arc::new(RwLock::new(Vec::new())),
            event_history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history.min(1024)))),
            max_history,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    /// Subscribe to events by type, or "*" for all events
    pub fn subscribe<F>(&self, event_type: &str, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);

        if event_type == "*" {
            self.wildcard_subscribers.write().push(callback);
        } else {
            self.subscribers
                .write()
                .entry(event_type.to_string())
                .or_default()
                .push(callback);
        }

        tracing::debug!(event_type = %event_type, "Subscribed to events");
    }

    /// Publish event to history, channel receivers and callbacks
    pub fn publish(&self, event: Event) {
        self.stats.write().total_published += 1;

        {
            let mut history = self.event_history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // No receivers is fine
        let _ = self.tx.send(event.clone());

        // Clone the callback lists so a callback may subscribe without deadlocking
        let direct: Vec<EventCallback> = self
            .subscribers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        let wildcard: Vec<EventCallback> = self.wildcard_subscribers.read().clone();

        let mut delivered = 0u64;
        for callback in direct.iter().chain(wildcard.iter()) {
            callback(&event);
            delivered += 1;
        }
        self.stats.write().total_delivered += delivered;
    }

    /// Get a receiver for all events (broadcast channel)
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Most recent events first
    pub fn get_recent_events(&self, event_type: Option<&str>, limit: Option<usize>) -> Vec<Event> {
        let history = self.event_history.read();
        let limit = limit.unwrap_or(100);

        history
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |et| e.event_type == et))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> EventBusStatsSnapshot {
        let stats = self.stats.read();
        let subscribers = self.subscribers.read();
        let wildcard = self.wildcard_subscribers.read();

        EventBusStatsSnapshot {
            total_published: stats.total_published,
            total_delivered: stats.total_delivered,
            subscriber_count: subscribers.values().map(Vec::len).sum::<usize>() + wildcard.len(),
            event_types: subscribers.keys().cloned().collect(),
            history_size: self.event_history.read().len(),
        }
    }

    pub fn clear_history(&self) {
        self.event_history.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of event bus statistics
#[derive(Debug, Clone)]
pub struct EventBusStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub subscriber_count: usize,
    pub event_types: Vec<String>,
    pub history_size: usize,
}

impl fmt::Display for EventBusStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventBus: published={}, delivered={}, subscribers={}, history={}",
            self.total_published, self.total_delivered, self.subscriber_count, self.history_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str) -> Event {
        Event::new(event_type, 123456789, HashMap::new(), "test_source", EventPriority::Info)
    }

    #[test]
    fn test_event_priority() {
        assert!(EventPriority::Critical < EventPriority::High);
        assert!(EventPriority::High < EventPriority::Medium);
    }

    #[test]
    fn test_event_creation() {
        let event = event(TREND_CHANGE_EVENT);
        assert_eq!(event.event_type, "trend_change");
        assert_eq!(event.source, "test_source");
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn test_event_bus_subscribe_and_publish() {
        let bus = EventBus::new();
        let direct = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let direct_clone = Arc::clone(&direct);
        bus.subscribe(TREND_CHANGE_EVENT, move |_| {
            direct_clone.fetch_add(1, Ordering::SeqCst);
        });
        let all_clone = Arc::clone(&all);
        bus.subscribe("*", move |_| {
            all_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(event(TREND_CHANGE_EVENT));
        bus.publish(event(SYSTEM_ALERT_EVENT));

        assert_eq!(direct.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);

        let stats = bus.get_stats();
        assert_eq!(stats.total_published, 2);
        assert_eq!(stats.total_delivered, 3);
        assert_eq!(stats.subscriber_count, 2);
    }

    #[test]
    fn test_event_history_bounded_and_filtered() {
        let bus = EventBus::with_capacity(3);
        for _ in 0..3 {
            bus.publish(event(TREND_CHANGE_EVENT));
        }
        bus.publish(event(SYSTEM_ALERT_EVENT));

        let history = bus.get_recent_events(None, Some(10));
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].event_type, SYSTEM_ALERT_EVENT);

        let trend_only = bus.get_recent_events(Some(TREND_CHANGE_EVENT), None);
        assert_eq!(trend_only.len(), 2);

        bus.clear_history();
        assert!(bus.get_recent_events(None, None).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_channel_receives() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();
        bus.publish(event(SYSTEM_ALERT_EVENT));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, SYSTEM_ALERT_EVENT);
    }
}
