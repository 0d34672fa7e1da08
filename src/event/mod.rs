//! In-process typed publish/subscribe with per-execution scoping.
//!
//! Handlers are registered against an [`EventType`] or the wildcard and
//! are invoked under priority order on every matching [`emit`](EventBus::emit).
//! [`EventBus::create_scope`] hands an execution its own [`ScopedEmitter`],
//! which stamps every event it forwards with `executionId` so subscribers
//! attached through one execution's scope never see another's events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The event taxonomy carried on the bus. Serializes to the `"kind:name"`
/// strings in the external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "execution:start")]
    ExecutionStart,
    #[serde(rename = "execution:progress")]
    ExecutionProgress,
    #[serde(rename = "execution:complete")]
    ExecutionComplete,
    #[serde(rename = "execution:error")]
    ExecutionError,
    #[serde(rename = "execution:cancel")]
    ExecutionCancel,
    #[serde(rename = "node:start")]
    NodeStart,
    #[serde(rename = "node:update")]
    NodeUpdate,
    #[serde(rename = "node:complete")]
    NodeComplete,
    #[serde(rename = "node:error")]
    NodeError,
    #[serde(rename = "stream:thinking")]
    StreamThinking,
    #[serde(rename = "stream:content")]
    StreamContent,
    #[serde(rename = "stream:tool_call")]
    StreamToolCall,
    #[serde(rename = "state:changed")]
    StateChanged,
}

/// One event instance, as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "executionId")]
    pub execution_id: String,
    #[serde(default, rename = "nodeId")]
    pub node_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

type Handler = Arc<dyn Fn(&Event) -> crate::Result<()> + Send + Sync>;
type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Options accepted by [`EventBus::subscribe`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub filter: Option<Filter>,
    pub once: bool,
    pub priority: i32,
}

impl SubscribeOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

struct Subscription {
    id: u64,
    handler: Handler,
    filter: Option<Filter>,
    once: bool,
    priority: i32,
    seq: u64,
}

/// A key identifying a handle returned by `subscribe`, used to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
enum Key {
    Type(EventType),
    Wildcard,
}

#[derive(Default)]
struct Handlers {
    table: HashMap<Key, Vec<Subscription>>,
}

/// Multi-handler publish/subscribe bus. Cloning shares the underlying
/// handler table (cheap `Arc` clone), mirroring how the bus shares its
/// `dashmap`-backed tables across API handlers.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<Mutex<Handlers>>,
    next_id: Arc<AtomicU64>,
    next_seq: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Handlers::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            next_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to one event type. Pass `None` for the wildcard channel.
    pub fn subscribe(
        &self,
        event_type: Option<EventType>,
        handler: Handler,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let key = match event_type {
            Some(t) => Key::Type(t),
            None => Key::Wildcard,
        };
        let sub = Subscription {
            id,
            handler,
            filter: options.filter,
            once: options.once,
            priority: options.priority,
            seq,
        };
        let mut handlers = self.handlers.lock();
        handlers.table.entry(key).or_default().push(sub);
        SubscriptionId(id)
    }

    /// Remove a subscription by handle. No-op if already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut handlers = self.handlers.lock();
        for subs in handlers.table.values_mut() {
            subs.retain(|s| s.id != id.0);
        }
    }

    /// Deliver an event to every matching subscriber, highest priority
    /// first, ties broken by subscription order. Handler errors are
    /// logged and do not stop delivery to the remaining subscribers.
    pub fn emit(&self, event: Event) {
        let mut once_ids = Vec::new();
        let mut snapshot: Vec<(u64, u64, i32, Handler, Option<Filter>, bool)> = Vec::new();

        {
            let handlers = self.handlers.lock();
            if let Some(subs) = handlers.table.get(&Key::Type(event.event_type)) {
                for s in subs {
                    snapshot.push((s.id, s.seq, s.priority, s.handler.clone(), s.filter.clone(), s.once));
                }
            }
            if let Some(subs) = handlers.table.get(&Key::Wildcard) {
                for s in subs {
                    snapshot.push((s.id, s.seq, s.priority, s.handler.clone(), s.filter.clone(), s.once));
                }
            }
        }

        snapshot.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)));

        for (id, _, _, handler, filter, once) in snapshot {
            if let Some(filter) = &filter {
                if !filter(&event) {
                    continue;
                }
            }
            if let Err(err) = handler(&event) {
                tracing::warn!(error = %err, "event handler failed");
            }
            if once {
                once_ids.push(id);
            }
        }

        if !once_ids.is_empty() {
            let mut handlers = self.handlers.lock();
            for subs in handlers.table.values_mut() {
                subs.retain(|s| !once_ids.contains(&s.id));
            }
        }
    }

    /// Create a per-execution view of the bus. Events emitted through the
    /// scope are stamped with `execution_id` and dropped once
    /// [`EventBus::destroy_scope`]-equivalent ([`ScopedEmitter::deactivate`])
    /// has been called.
    pub fn create_scope(&self, execution_id: impl Into<String>) -> ScopedEmitter {
        ScopedEmitter {
            bus: self.clone(),
            execution_id: execution_id.into(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// A view of the [`EventBus`] restricted to one execution id.
#[derive(Clone)]
pub struct ScopedEmitter {
    bus: EventBus,
    execution_id: String,
    active: Arc<AtomicBool>,
}

impl ScopedEmitter {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Emit an event stamped with this scope's execution id. A no-op once
    /// the scope has been destroyed.
    pub fn emit(&self, event_type: EventType, payload: Value, node_id: Option<String>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        self.bus.emit(Event {
            event_type,
            execution_id: self.execution_id.clone(),
            node_id,
            timestamp: Utc::now(),
            payload,
        });
    }

    pub fn emit_thinking(&self, node_id: &str, delta: &str) {
        self.emit(
            EventType::StreamThinking,
            serde_json::json!({ "delta": delta }),
            Some(node_id.to_string()),
        );
    }

    pub fn emit_content(&self, node_id: &str, delta: &str) {
        self.emit(
            EventType::StreamContent,
            serde_json::json!({ "delta": delta }),
            Some(node_id.to_string()),
        );
    }

    pub fn emit_error(&self, node_id: &str, err: &crate::KernelError) {
        self.emit(
            EventType::NodeError,
            serde_json::json!({ "error": err.to_string() }),
            Some(node_id.to_string()),
        );
    }

    pub fn emit_node_status(&self, node_id: &str, status: &str) {
        self.emit(
            EventType::NodeUpdate,
            serde_json::json!({ "status": status }),
            Some(node_id.to_string()),
        );
    }

    /// Subscribe through this scope: the handler only ever sees events
    /// carrying this scope's execution id, even though it is registered
    /// on the shared bus.
    pub fn on(&self, event_type: Option<EventType>, handler: Handler, options: SubscribeOptions) -> SubscriptionId {
        let execution_id = self.execution_id.clone();
        let user_filter = options.filter.clone();
        let scoped_filter: Filter = Arc::new(move |event: &Event| {
            if event.execution_id != execution_id {
                return false;
            }
            match &user_filter {
                Some(f) => f(event),
                None => true,
            }
        });
        self.bus.subscribe(event_type, handler, options.with_filter(scoped_filter))
    }

    /// Drop this scope: in-flight subscriptions remain valid for events
    /// already queued, but `emit` becomes a no-op from this point on.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn wildcard_and_typed_both_fire() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(
            None,
            Arc::new(move |_e| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default(),
        );
        let c2 = count.clone();
        bus.subscribe(
            Some(EventType::NodeStart),
            Arc::new(move |_e| {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default(),
        );
        bus.emit(Event {
            event_type: EventType::NodeStart,
            execution_id: "e1".into(),
            node_id: None,
            timestamp: Utc::now(),
            payload: Value::Null,
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn priority_order_then_insertion_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, priority) in [("low", 0), ("high", 10), ("mid", 5)] {
            let order = order.clone();
            bus.subscribe(
                Some(EventType::NodeStart),
                Arc::new(move |_e| {
                    order.lock().push(label);
                    Ok(())
                }),
                SubscribeOptions::default().with_priority(priority),
            );
        }
        bus.emit(Event {
            event_type: EventType::NodeStart,
            execution_id: "e1".into(),
            node_id: None,
            timestamp: Utc::now(),
            payload: Value::Null,
        });
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn scope_filters_out_other_executions() {
        let bus = EventBus::new();
        let scope_a = bus.create_scope("a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        scope_a.on(
            None,
            Arc::new(move |e: &Event| {
                seen2.lock().push(e.execution_id.clone());
                Ok(())
            }),
            SubscribeOptions::default(),
        );

        let scope_b = bus.create_scope("b");
        scope_b.emit(EventType::NodeStart, Value::Null, None);
        scope_a.emit(EventType::NodeStart, Value::Null, None);

        assert_eq!(*seen.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn once_handler_fires_only_once() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(
            Some(EventType::NodeStart),
            Arc::new(move |_e| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default().once(),
        );
        for _ in 0..3 {
            bus.emit(Event {
                event_type: EventType::NodeStart,
                execution_id: "e1".into(),
                node_id: None,
                timestamp: Utc::now(),
                payload: Value::Null,
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deactivated_scope_emits_nothing() {
        let bus = EventBus::new();
        let scope = bus.create_scope("a");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(
            None,
            Arc::new(move |_e| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default(),
        );
        scope.deactivate();
        scope.emit(EventType::NodeStart, Value::Null, None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
