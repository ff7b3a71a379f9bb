use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use core_types::{Event, EventType};
use global_state::GlobalState;

/// A subscriber callback: invoked with a reference to the published event.
///
/// Callbacks are plain closures rather than `async fn`s — publication happens
/// synchronously from whichever bot or service thread raised the event, so a
/// slow callback blocks that caller. Subscribers that need to do real work
/// should hand the event off to their own queue instead of blocking here.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// In-process publish/subscribe bus for lifecycle, signal, and trade events.
///
/// One instance is created at process start and shared (via clone, since
/// everything inside is `Arc`-backed) with every bot worker and service that
/// needs to either raise or observe events. Consults [`GlobalState`] on every
/// publish to decide whether the event should be suppressed while the fleet
/// is globally paused.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: Mutex<HashMap<EventType, Vec<Callback>>>,
    history: Mutex<VecDeque<Event>>,
    capacity: usize,
    global_state: GlobalState,
}

impl EventBus {
    /// Creates an event bus retaining at most `capacity` events in its history,
    /// consulting `global_state` to decide on pause-suppression.
    pub fn new(capacity: usize, global_state: GlobalState) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                global_state,
            }),
        }
    }

    /// Registers `callback` to be invoked on every future publication of `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner
            .subscribers
            .lock()
            .expect("event bus subscriber lock poisoned")
            .entry(event_type)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Publishes `event`: records it in history (unless pause-suppressed) and
    /// invokes every subscriber registered for its type, in registration order,
    /// outside the subscriber lock. A callback that panics is caught and logged;
    /// it never aborts delivery to the remaining subscribers.
    pub fn publish(&self, event: Event) {
        if self.is_suppressed(event.event_type) {
            tracing::debug!(event_type = ?event.event_type, "event suppressed while globally paused");
            return;
        }

        self.record(event.clone());

        let callbacks = self
            .inner
            .subscribers
            .lock()
            .expect("event bus subscriber lock poisoned")
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        for callback in callbacks {
            let event_ref = &event;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event_ref);
            }));
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::warn!(event_type = ?event.event_type, %message, "event subscriber panicked");
            }
        }
    }

    /// Returns up to `limit` most recent events, optionally filtered by `event_type`,
    /// newest last.
    pub fn history(&self, event_type: Option<EventType>, limit: usize) -> Vec<Event> {
        let history = self
            .inner
            .history
            .lock()
            .expect("event bus history lock poisoned");
        history
            .iter()
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    fn is_suppressed(&self, event_type: EventType) -> bool {
        event_type.suppressed_while_paused() && self.inner.global_state.is_paused()
    }

    fn record(&self, event: Event) {
        let mut history = self
            .inner
            .history
            .lock()
            .expect("event bus history lock poisoned");
        if history.len() == self.inner.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bus() -> EventBus {
        EventBus::new(8, GlobalState::new())
    }

    #[test]
    fn delivers_to_subscribers_of_matching_type() {
        let bus = bus();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(EventType::BotStarted, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventType::BotStarted, "bot-1", json!({})));
        bus.publish(Event::new(EventType::BotStopped, "bot-1", json!({})));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn history_is_bounded_and_ordered_oldest_first() {
        let bus = EventBus::new(2, GlobalState::new());
        bus.publish(Event::new(EventType::BotStarted, "bot-1", json!(1)));
        bus.publish(Event::new(EventType::BotStarted, "bot-1", json!(2)));
        bus.publish(Event::new(EventType::BotStarted, "bot-1", json!(3)));

        let history = bus.history(None, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload, json!(2));
        assert_eq!(history[1].payload, json!(3));
    }

    #[test]
    fn suppresses_trade_events_while_globally_paused() {
        let global_state = GlobalState::new();
        let bus = EventBus::new(8, global_state.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(EventType::TradeOpened, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        global_state.set_paused(true);
        bus.publish(Event::new(EventType::TradeOpened, "bot-1", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(bus.history(None, 10).is_empty());

        global_state.set_paused(false);
        bus.publish(Event::new(EventType::TradeOpened, "bot-1", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn does_not_suppress_non_suppressible_events_while_paused() {
        let global_state = GlobalState::new();
        global_state.set_paused(true);
        let bus = EventBus::new(8, global_state);

        bus.publish(Event::new(EventType::BotPaused, "bot-1", json!({})));
        assert_eq!(bus.history(None, 10).len(), 1);
    }
}
