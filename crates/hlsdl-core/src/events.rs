//! Event bus (§6): single-producer-multi-consumer dispatch of task
//! lifecycle events. Generalizes this codebase's `control::JobControl`
//! shared-registry idiom (a map behind one lock, handed an owned token)
//! to a subscriber registry whose entries unregister themselves on drop,
//! the Rust realization §9 calls for in place of weak references.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskProgress,
    TaskStatusChanged,
    TaskCompleted,
    TaskFailed,
    ErrorOccurred,
    BandwidthUpdate,
    DownloadStarted,
    DownloadPaused,
    DownloadResumed,
    DownloadCanceled,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub task_id: String,
    pub payload: serde_json::Value,
    pub source: Option<String>,
    pub timestamp: u64,
}

impl Event {
    /// Builds an event stamped with the current wall-clock time, reusing
    /// the registry's `unix_timestamp` helper so every lifecycle event
    /// and every persisted row agree on one clock source.
    pub fn new(kind: EventKind, task_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            payload,
            source: None,
            timestamp: crate::registry::unix_timestamp().max(0) as u64,
        }
    }
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

struct Inner {
    subscribers: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
}

/// Broadcasts events to subscribers without blocking the emitter.
/// Subscriber panics or errors are caught and logged, never propagated.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
    next_id: Arc<AtomicU64>,
}

/// Unregisters its subscriber when dropped (§6's Rust realization of
/// "weak-reference semantics"). Holding this alive is what keeps the
/// subscription active.
pub struct SubscriptionHandle {
    bus: EventBus,
    kind: EventKind,
    id: u64,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let mut subscribers = self.bus.inner.subscribers.lock().unwrap();
        if let Some(list) = subscribers.get_mut(&self.kind) {
            list.retain(|s| s.id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
            }),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers `callback` for `kind`, returning a handle that
    /// unregisters it on drop.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.entry(kind).or_default().push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        SubscriptionHandle {
            bus: self.clone(),
            kind,
            id,
        }
    }

    /// Dispatches `event` to all current subscribers of `event.kind`.
    /// Never blocks on a subscriber and never propagates a subscriber
    /// panic to the caller.
    pub fn emit(&self, event: Event) {
        let subscribers = self.inner.subscribers.lock().unwrap();
        let Some(list) = subscribers.get(&event.kind) else {
            return;
        };
        for subscriber in list {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (subscriber.callback)(&event)
            }));
            if result.is_err() {
                tracing::warn!(kind = ?event.kind, "event subscriber panicked, isolating");
            }
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as O};

    fn sample_event(kind: EventKind) -> Event {
        Event {
            kind,
            task_id: "task-1".to_string(),
            payload: serde_json::json!({}),
            source: None,
            timestamp: 0,
        }
    }

    #[test]
    fn subscriber_receives_emitted_event() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let _handle = bus.subscribe(EventKind::TaskProgress, move |_| {
            calls_cb.fetch_add(1, O::Relaxed);
        });
        bus.emit(sample_event(EventKind::TaskProgress));
        assert_eq!(calls.load(O::Relaxed), 1);
    }

    #[test]
    fn dropping_handle_unregisters_subscriber() {
        let bus = EventBus::new();
        let handle = bus.subscribe(EventKind::TaskCompleted, |_| {});
        assert_eq!(bus.subscriber_count(EventKind::TaskCompleted), 1);
        drop(handle);
        assert_eq!(bus.subscriber_count(EventKind::TaskCompleted), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let _bad = bus.subscribe(EventKind::ErrorOccurred, |_| panic!("boom"));
        let _good = bus.subscribe(EventKind::ErrorOccurred, move |_| {
            calls_cb.fetch_add(1, O::Relaxed);
        });
        bus.emit(sample_event(EventKind::ErrorOccurred));
        assert_eq!(calls.load(O::Relaxed), 1);
    }

    #[test]
    fn events_of_other_kinds_are_not_delivered() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let _handle = bus.subscribe(EventKind::TaskProgress, move |_| {
            calls_cb.fetch_add(1, O::Relaxed);
        });
        bus.emit(sample_event(EventKind::TaskFailed));
        assert_eq!(calls.load(O::Relaxed), 0);
    }
}
