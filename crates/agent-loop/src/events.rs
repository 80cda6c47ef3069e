//! The session event stream. Shaped like a publish/subscribe bus — per-kind
//! listeners, a wildcard listener set, a buffering mode, and a cancellable
//! async stream — mirroring the pipeline engine's own event bus, but
//! carrying [`SessionEvent`] instead of a `PipelineEvent`; the two families
//! never share a channel.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{now_timestamp, EventKind, SessionEvent};

/// Create a fresh emitter/receiver pair under a random session id.
#[must_use]
pub fn channel() -> (EventEmitter, EventReceiver) {
    channel_with_id(Uuid::new_v4().to_string())
}

/// Create a fresh emitter/receiver pair under a caller-chosen session id —
/// used when a child session should be identifiable in its own right.
#[must_use]
pub fn channel_with_id(session_id: impl Into<String>) -> (EventEmitter, EventReceiver) {
    let session_id = session_id.into();
    let bus = Arc::new(Bus::default());
    let stream = bus.subscribe(None);
    (
        EventEmitter { session_id: session_id.clone(), bus },
        EventReceiver { session_id, stream },
    )
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}

fn is_terminal(kind: EventKind) -> bool {
    matches!(kind, EventKind::SessionEnd)
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Returned from registration; pass back to [`EventEmitter::unregister`] to
/// stop delivery.
#[derive(Clone, Copy)]
pub struct ListenerHandle {
    id: u64,
    kind: Option<EventKind>,
}

struct Subscriber {
    filter: Option<EventKind>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    kind_listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
    wildcard_listeners: Vec<(u64, Listener)>,
    buffering: bool,
    buffer: VecDeque<SessionEvent>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn dispatch_now(&mut self, event: &SessionEvent) {
        if let Some(listeners) = self.kind_listeners.get(&event.kind) {
            for (_, listener) in listeners {
                invoke(listener, event);
            }
        }
        for (_, listener) in &self.wildcard_listeners {
            invoke(listener, event);
        }
        self.subscribers.retain(|sub| {
            if sub.filter.is_none_or_matches(event.kind) {
                sub.tx.send(event.clone()).is_ok()
            } else {
                true
            }
        });
        if is_terminal(event.kind) {
            self.subscribers.clear();
        }
    }
}

trait FilterMatch {
    fn is_none_or_matches(&self, kind: EventKind) -> bool;
}

impl FilterMatch for Option<EventKind> {
    fn is_none_or_matches(&self, kind: EventKind) -> bool {
        match self {
            None => true,
            Some(k) => *k == kind,
        }
    }
}

fn invoke(listener: &Listener, event: &SessionEvent) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
    if result.is_err() {
        tracing::warn!(kind = ?event.kind, session_id = %event.session_id, "session event listener panicked");
    }
}

#[derive(Default)]
struct Bus {
    inner: Mutex<Inner>,
}

impl Bus {
    fn register(&self, kind: EventKind, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerHandle {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.allocate_id();
        inner.kind_listeners.entry(kind).or_default().push((id, Box::new(listener)));
        ListenerHandle { id, kind: Some(kind) }
    }

    fn register_wildcard(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerHandle {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.allocate_id();
        inner.wildcard_listeners.push((id, Box::new(listener)));
        ListenerHandle { id, kind: None }
    }

    fn unregister(&self, handle: ListenerHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match handle.kind {
            Some(kind) => {
                if let Some(listeners) = inner.kind_listeners.get_mut(&kind) {
                    listeners.retain(|(id, _)| *id != handle.id);
                }
            }
            None => inner.wildcard_listeners.retain(|(id, _)| *id != handle.id),
        }
    }

    fn set_buffering(&self, enabled: bool) {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).buffering = enabled;
    }

    fn flush(&self) {
        let queued: Vec<SessionEvent> = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.buffer.drain(..).collect()
        };
        for event in queued {
            self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).dispatch_now(&event);
        }
    }

    fn emit(&self, event: SessionEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.buffering {
            inner.buffer.push_back(event);
        } else {
            inner.dispatch_now(&event);
        }
    }

    fn subscribe(&self, filter: Option<EventKind>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.subscribers.push(Subscriber { filter, tx });
        EventStream { rx, cancelled: Arc::new(AtomicBool::new(false)) }
    }
}

/// An asynchronous, cancellable sequence of events, optionally restricted
/// to one kind. Completes once `SESSION_END` has been delivered, or once
/// [`EventStream::cancel`] is called.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    cancelled: Arc<AtomicBool>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let cancelled = self.cancelled.clone();
        tokio::select! {
            biased;
            () = wait_for_cancellation(cancelled) => None,
            event = self.rx.recv() => event,
        }
    }

    /// Stops the stream from the outside, mirroring a generator's
    /// `return()`: the next call to [`EventStream::next`] resolves to
    /// `None` even if more events are pending.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn try_next(&mut self) -> Option<SessionEvent> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

async fn wait_for_cancellation(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// The write side of a session's event stream.
#[derive(Clone)]
pub struct EventEmitter {
    session_id: String,
    bus: Arc<Bus>,
}

impl EventEmitter {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register a listener for one event kind. Fires synchronously, before
    /// any wildcard listener, in registration order.
    pub fn register(&self, kind: EventKind, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerHandle {
        self.bus.register(kind, listener)
    }

    /// Register a listener for every event kind.
    pub fn register_wildcard(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerHandle {
        self.bus.register_wildcard(listener)
    }

    pub fn unregister(&self, handle: ListenerHandle) {
        self.bus.unregister(handle);
    }

    /// Queue emits instead of delivering them immediately; `flush` delivers
    /// and clears the queue in emit order.
    pub fn set_buffering(&self, enabled: bool) {
        self.bus.set_buffering(enabled);
    }

    pub fn flush(&self) {
        self.bus.flush();
    }

    /// Subscribe to an async, cancellable stream of events, optionally
    /// restricted to one kind.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventKind>) -> EventStream {
        self.bus.subscribe(filter)
    }

    /// Stamp and dispatch an event. A listener error is isolated and logged;
    /// it never prevents later listeners from firing.
    pub fn emit(&self, kind: EventKind, data: Value) {
        self.bus.emit(SessionEvent {
            kind,
            timestamp: now_timestamp(),
            session_id: self.session_id.clone(),
            data: as_map(data),
        });
    }

    pub fn emit_session_start(&self) {
        self.emit(EventKind::SessionStart, json!({}));
    }

    pub fn emit_session_end(&self, final_state: &str) {
        self.emit(EventKind::SessionEnd, json!({ "final_state": final_state }));
    }

    pub fn emit_user_input(&self, content: &str) {
        self.emit(EventKind::UserInput, json!({ "content": content }));
    }

    pub fn emit_llm_call_start(&self, round: u32) {
        self.emit(EventKind::LlmCallStart, json!({ "round": round }));
    }

    pub fn emit_llm_call_end(&self, round: u32, tool_call_count: usize) {
        self.emit(
            EventKind::LlmCallEnd,
            json!({ "round": round, "tool_call_count": tool_call_count }),
        );
    }

    pub fn emit_tool_call_start(&self, tool_name: &str, call_id: &str, arguments: &Value) {
        self.emit(
            EventKind::ToolCallStart,
            json!({ "tool_name": tool_name, "call_id": call_id, "arguments": arguments }),
        );
    }

    pub fn emit_tool_call_end(&self, call_id: &str, output: &str) {
        self.emit(
            EventKind::ToolCallEnd,
            json!({ "call_id": call_id, "output": output, "is_error": false }),
        );
    }

    pub fn emit_tool_call_end_error(&self, call_id: &str, error: &str) {
        self.emit(
            EventKind::ToolCallEnd,
            json!({ "call_id": call_id, "error": error, "is_error": true }),
        );
    }

    pub fn emit_steering_injected(&self, content: &str) {
        self.emit(EventKind::SteeringInjected, json!({ "content": content }));
    }

    pub fn emit_turn_complete(&self, total_turns: u32) {
        self.emit(EventKind::TurnComplete, json!({ "total_turns": total_turns }));
    }

    pub fn emit_turn_limit(&self, data: Map<String, Value>) {
        self.emit(EventKind::TurnLimit, Value::Object(data));
    }

    pub fn emit_loop_detection(&self, message: &str) {
        self.emit(EventKind::LoopDetection, json!({ "message": message }));
    }

    pub fn emit_warning(&self, message: &str, data: Value) {
        let mut map = as_map(data);
        map.insert("message".into(), Value::String(message.into()));
        self.emit(EventKind::Warning, Value::Object(map));
    }

    pub fn emit_error(&self, code: &str, message: &str) {
        self.emit(EventKind::Error, json!({ "code": code, "message": message }));
    }

    pub fn emit_subagent_spawn(&self, agent_id: &str) {
        self.emit(EventKind::SubagentSpawn, json!({ "agent_id": agent_id }));
    }

    pub fn emit_subagent_complete(&self, agent_id: &str, success: bool) {
        self.emit(
            EventKind::SubagentComplete,
            json!({ "agent_id": agent_id, "success": success }),
        );
    }

    pub fn emit_info(&self, code: &str, message: &str) {
        self.emit(EventKind::Info, json!({ "code": code, "message": message }));
    }
}

/// The read side of a session's event stream — a plain drainable queue
/// backed by the same bus every listener and subscriber draws from.
pub struct EventReceiver {
    session_id: String,
    stream: EventStream,
}

impl EventReceiver {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.stream.next().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.stream.try_next()
    }

    /// Stop receiving further events even if more are pending.
    pub fn cancel(&self) {
        self.stream.cancel();
    }
}
