//! Publish/subscribe registry demultiplexing inbound channel messages.
//!
//! The dispatcher parses raw text frames into the `{type, payload}`
//! envelope and invokes every handler subscribed to that [`EventKind`], in
//! registration order. Malformed frames are dropped with a logged parse
//! error; recognized-but-unsubscribed types are dropped silently so that
//! new server event types never break old clients.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::protocol::{EventKind, parse_envelope};

/// Subscriber callback invoked with the event payload
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque handle returned by [`EventDispatcher::subscribe`], used to remove
/// exactly that one handler again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    kind: EventKind,
}

struct HandlerEntry {
    id: u64,
    handler: EventHandler,
}

#[derive(Default)]
struct DispatcherInner {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<HandlerEntry>>,
}

/// Publish/subscribe registry keyed by [`EventKind`].
#[derive(Default)]
pub struct EventDispatcher {
    inner: Mutex<DispatcherInner>,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given event kind.
    ///
    /// Multiple handlers per kind are permitted; all of them are invoked in
    /// registration order for every matching message.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.entry(kind.clone()).or_default().push(HandlerEntry {
            id,
            handler: Arc::new(handler),
        });
        tracing::debug!("Subscribed handler {} to '{}'", id, kind);
        SubscriptionHandle { id, kind }
    }

    /// Remove the handler registered under the given handle.
    ///
    /// Removing an already-removed handle is a safe no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        if let Some(entries) = inner.handlers.get_mut(&handle.kind) {
            entries.retain(|entry| entry.id != handle.id);
            if entries.is_empty() {
                inner.handlers.remove(&handle.kind);
            }
        }
    }

    /// Parse a raw text frame and dispatch it to subscribers.
    ///
    /// Malformed frames (non-JSON, missing `type`) are dropped with a
    /// logged parse error and never reach any handler.
    pub fn dispatch_raw(&self, text: &str) {
        match parse_envelope(text) {
            Ok(envelope) => {
                self.dispatch(&EventKind::parse(&envelope.r#type), &envelope.payload);
            }
            Err(e) => {
                tracing::error!("Dropping malformed frame: {}", e);
            }
        }
    }

    /// Invoke every handler subscribed to `kind` with `payload`.
    ///
    /// A panicking handler is isolated: it is logged and does not prevent
    /// the remaining handlers from running.
    pub fn dispatch(&self, kind: &EventKind, payload: &Value) {
        // Snapshot handlers so a callback can subscribe/unsubscribe without
        // deadlocking on the registry lock.
        let handlers: Vec<EventHandler> = {
            let inner = self.inner.lock().expect("dispatcher lock poisoned");
            match inner.handlers.get(kind) {
                Some(entries) => entries.iter().map(|e| e.handler.clone()).collect(),
                None => {
                    tracing::debug!("No subscriber for event '{}', dropping", kind);
                    return;
                }
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                tracing::error!("Handler for event '{}' panicked; continuing", kind);
            }
        }
    }

    /// Number of handlers currently registered for `kind`
    pub fn handler_count(&self, kind: &EventKind) -> usize {
        let inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.handlers.get(kind).map_or(0, |entries| entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> impl Fn(&Value) + Send + Sync {
        move |_payload| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dispatch_invokes_only_matching_topic() {
        // テスト項目: あるトピックへの配信は別トピックのハンドラを呼び出さない
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let chat_count = Arc::new(AtomicUsize::new(0));
        let presence_count = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(EventKind::ChatMessage, counting_handler(chat_count.clone()));
        dispatcher.subscribe(EventKind::PlayerJoined, counting_handler(presence_count.clone()));

        // when (操作):
        dispatcher.dispatch(&EventKind::ChatMessage, &Value::Null);

        // then (期待する結果):
        assert_eq!(chat_count.load(Ordering::SeqCst), 1);
        assert_eq!(presence_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_multiple_handlers_fire_in_registration_order() {
        // テスト項目: 同一トピックの複数ハンドラが登録順に呼び出される
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            dispatcher.subscribe(EventKind::GameUpdated, move |_| {
                order.lock().unwrap().push(label);
            });
        }

        // when (操作):
        dispatcher.dispatch(&EventKind::GameUpdated, &Value::Null);

        // then (期待する結果):
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_removes_exactly_one_handler() {
        // テスト項目: unsubscribe は対象のハンドラだけを削除する
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let kept = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(EventKind::ChatMessage, counting_handler(kept.clone()));
        let handle = dispatcher.subscribe(EventKind::ChatMessage, counting_handler(removed.clone()));

        // when (操作):
        dispatcher.unsubscribe(&handle);
        dispatcher.dispatch(&EventKind::ChatMessage, &Value::Null);

        // then (期待する結果):
        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_unsubscribe_is_noop() {
        // テスト項目: 同じハンドルで二重に unsubscribe しても安全に何も起きない
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let handle = dispatcher.subscribe(EventKind::ChatMessage, |_| {});
        dispatcher.unsubscribe(&handle);

        // when (操作):
        dispatcher.unsubscribe(&handle);

        // then (期待する結果):
        assert_eq!(dispatcher.handler_count(&EventKind::ChatMessage), 0);
    }

    #[test]
    fn test_malformed_frame_never_reaches_handlers() {
        // テスト項目: 不正なフレームはハンドラに到達せず破棄される
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(EventKind::ChatMessage, counting_handler(count.clone()));

        // when (操作):
        dispatcher.dispatch_raw("not json");
        dispatcher.dispatch_raw(r#"{"payload":{}}"#);

        // then (期待する結果):
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrecognized_type_is_dropped_silently() {
        // テスト項目: 購読者のいないイベント種別は黙って破棄される
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(EventKind::ChatMessage, counting_handler(count.clone()));

        // when (操作):
        dispatcher.dispatch_raw(r#"{"type":"venue_changed","payload":{}}"#);

        // then (期待する結果):
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_passthrough_subscription_receives_unknown_type() {
        // テスト項目: Other として購読した未知のイベント種別が配信される
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(
            EventKind::Other("venue_changed".to_string()),
            counting_handler(count.clone()),
        );

        // when (操作):
        dispatcher.dispatch_raw(r#"{"type":"venue_changed","payload":{}}"#);

        // then (期待する結果):
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_block_siblings() {
        // テスト項目: パニックしたハンドラが後続ハンドラの実行を妨げない
        // given (前提条件):
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(EventKind::ChatMessage, |_| {
            panic!("handler blew up");
        });
        dispatcher.subscribe(EventKind::ChatMessage, counting_handler(count.clone()));

        // when (操作):
        dispatcher.dispatch(&EventKind::ChatMessage, &Value::Null);

        // then (期待する結果):
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself_during_dispatch() {
        // テスト項目: 配信中のハンドラが自身を unsubscribe してもデッドロックしない
        // given (前提条件):
        let dispatcher = Arc::new(EventDispatcher::new());
        let handle_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let dispatcher_for_handler = dispatcher.clone();
        let slot_for_handler = handle_slot.clone();
        let handle = dispatcher.subscribe(EventKind::ChatMessage, move |_| {
            if let Some(handle) = slot_for_handler.lock().unwrap().take() {
                dispatcher_for_handler.unsubscribe(&handle);
            }
        });
        *handle_slot.lock().unwrap() = Some(handle);

        // when (操作):
        dispatcher.dispatch(&EventKind::ChatMessage, &Value::Null);

        // then (期待する結果):
        assert_eq!(dispatcher.handler_count(&EventKind::ChatMessage), 0);
    }
}
