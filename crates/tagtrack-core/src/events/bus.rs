//! Synchronous topic-based publish/subscribe.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use super::{TaskEvent, Topic};

type Handler = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Dispatches [`TaskEvent`]s to the handlers registered for their topic.
///
/// Handlers run on the emitting thread, in registration order. A panicking
/// handler is contained: the remaining handlers still run and the emitter
/// only learns how many failed.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<Topic, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn on<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, subscription: SubscriptionId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(id, _)| *id == subscription) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler of its topic.
    ///
    /// Returns the number of handlers that panicked.
    pub fn emit(&self, event: &TaskEvent) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.topic())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        handlers
            .iter()
            .filter(|handler| catch_unwind(AssertUnwindSafe(|| handler(event))).is_err())
            .count()
    }

    /// Number of handlers currently registered for `topic`.
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Subscribe with a channel instead of a callback.
    ///
    /// The handler only enqueues, so a slow consumer never slows the emitter.
    /// Once the receiver is dropped the events are discarded.
    pub fn subscribe_channel(
        &self,
        topic: Topic,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.on(topic, move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(topic, list)| (topic.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::JobId;

    fn recorder(bus: &EventBus, topic: Topic, tag: &'static str, out: &Arc<Mutex<Vec<String>>>) {
        let out = Arc::clone(out);
        bus.on(topic, move |event| {
            out.lock().unwrap().push(format!("{tag}:{}", event.topic()));
        });
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        recorder(&bus, Topic::TaskLog, "a", &seen);
        recorder(&bus, Topic::TaskLog, "b", &seen);
        recorder(&bus, Topic::TaskState, "c", &seen);

        let failed = bus.emit(&TaskEvent::log(JobId::new(), "hello"));

        assert_eq!(failed, 0);
        assert_eq!(*seen.lock().unwrap(), vec!["a:task_log", "b:task_log"]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.on(Topic::TaskLog, |_| panic!("subscriber bug"));
        recorder(&bus, Topic::TaskLog, "after", &seen);
        recorder(&bus, Topic::TaskState, "state", &seen);

        let id = JobId::new();
        assert_eq!(bus.emit(&TaskEvent::log(id, "x")), 1);
        assert_eq!(bus.emit(&TaskEvent::running(id)), 0);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["after:task_log", "state:task_state"]
        );
    }

    #[test]
    fn test_off_unsubscribes() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus.on(Topic::TaskState, move |_| sink.lock().unwrap().push(()));

        assert!(bus.off(sub));
        assert!(!bus.off(sub));
        bus.emit(&TaskEvent::running(JobId::new()));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.handler_count(Topic::TaskState), 0);
    }

    #[test]
    fn test_emit_without_handlers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(&TaskEvent::completed(JobId::new())), 0);
    }

    #[tokio::test]
    async fn test_subscribe_channel_receives_in_order() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe_channel(Topic::TaskLog);
        let id = JobId::new();

        bus.emit(&TaskEvent::log(id, "one"));
        bus.emit(&TaskEvent::log(id, "two"));

        for expected in ["one", "two"] {
            match rx.recv().await {
                Some(TaskEvent::TaskLog { line, .. }) => assert_eq!(line, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
