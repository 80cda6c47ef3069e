//! The pipeline's own typed event stream. Shaped like a publish/subscribe
//! bus — per-kind listeners, a wildcard listener set, a buffering mode, and
//! a cancellable async stream — but carries [`PipelineEvent`] rather than
//! an agent session's events; the two families never share a channel.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    PipelineStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    StageRetrying,
    CheckpointSaved,
    PipelineCompleted,
    PipelineFailed,
    InterviewQuestion,
    InterviewAnswer,
    InterviewTimeout,
}

impl PipelineEventKind {
    fn is_terminal(self) -> bool {
        matches!(self, Self::PipelineCompleted | Self::PipelineFailed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub kind: PipelineEventKind,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: HashMap<String, Value>,
}

impl PipelineEvent {
    #[must_use]
    pub fn new(kind: PipelineEventKind, run_id: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self { kind, run_id: run_id.into(), timestamp: chrono::Utc::now(), data }
    }
}

type Listener = Box<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Returned from registration; pass back to [`EventBus::unregister`] to
/// stop delivery.
#[derive(Clone, Copy)]
pub struct ListenerHandle {
    id: u64,
    kind: Option<PipelineEventKind>,
}

struct Subscriber {
    filter: Option<PipelineEventKind>,
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    kind_listeners: HashMap<PipelineEventKind, Vec<(u64, Listener)>>,
    wildcard_listeners: Vec<(u64, Listener)>,
    buffering: bool,
    buffer: VecDeque<PipelineEvent>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn dispatch_now(&mut self, event: &PipelineEvent) {
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
        if event.kind.is_terminal() {
            self.subscribers.clear();
        }
    }
}

trait FilterMatch {
    fn is_none_or_matches(&self, kind: PipelineEventKind) -> bool;
}

impl FilterMatch for Option<PipelineEventKind> {
    fn is_none_or_matches(&self, kind: PipelineEventKind) -> bool {
        match self {
            None => true,
            Some(k) => *k == kind,
        }
    }
}

fn invoke(listener: &Listener, event: &PipelineEvent) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
    if result.is_err() {
        tracing::warn!(kind = ?event.kind, run_id = %event.run_id, "pipeline event listener panicked");
    }
}

/// The run-scoped hub a pipeline run emits through and external consumers
/// observe through.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Inner>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: PipelineEventKind, listener: impl Fn(&PipelineEvent) + Send + Sync + 'static) -> ListenerHandle {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.allocate_id();
        inner.kind_listeners.entry(kind).or_default().push((id, Box::new(listener)));
        ListenerHandle { id, kind: Some(kind) }
    }

    pub fn register_wildcard(&self, listener: impl Fn(&PipelineEvent) + Send + Sync + 'static) -> ListenerHandle {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = inner.allocate_id();
        inner.wildcard_listeners.push((id, Box::new(listener)));
        ListenerHandle { id, kind: None }
    }

    pub fn unregister(&self, handle: ListenerHandle) {
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

    pub fn set_buffering(&self, enabled: bool) {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).buffering = enabled;
    }

    /// Deliver and clear whatever is queued, preserving emit order.
    pub fn flush(&self) {
        let queued: Vec<PipelineEvent> = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.buffer.drain(..).collect()
        };
        for event in queued {
            self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).dispatch_now(&event);
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.buffering {
            inner.buffer.push_back(event);
        } else {
            inner.dispatch_now(&event);
        }
    }

    /// Subscribe to an async, cancellable stream of events, optionally
    /// restricted to one kind. The stream ends once a terminal pipeline
    /// event (`PipelineCompleted`/`PipelineFailed`) has been delivered, or
    /// once [`EventStream::cancel`] is called.
    pub fn subscribe(&self, filter: Option<PipelineEventKind>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.subscribers.push(Subscriber { filter, tx });
        EventStream { rx, cancelled: Arc::new(AtomicBool::new(false)) }
    }
}

pub struct EventStream {
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
    cancelled: Arc<AtomicBool>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<PipelineEvent> {
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
}

async fn wait_for_cancellation(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn event(kind: PipelineEventKind) -> PipelineEvent {
        PipelineEvent::new(kind, "run-1", HashMap::new())
    }

    #[test]
    fn kind_listeners_fire_before_wildcard_listeners() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.register(PipelineEventKind::StageStarted, move |_| o1.lock().unwrap().push("kind"));
        let o2 = order.clone();
        bus.register_wildcard(move |_| o2.lock().unwrap().push("wildcard"));
        bus.emit(event(PipelineEventKind::StageStarted));
        assert_eq!(*order.lock().unwrap(), vec!["kind", "wildcard"]);
    }

    #[test]
    fn unregister_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = bus.register_wildcard(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(event(PipelineEventKind::StageStarted));
        bus.unregister(handle);
        bus.emit(event(PipelineEventKind::StageStarted));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn buffering_defers_delivery_until_flush() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        bus.register_wildcard(move |e| r.lock().unwrap().push(e.kind));
        bus.set_buffering(true);
        bus.emit(event(PipelineEventKind::StageStarted));
        bus.emit(event(PipelineEventKind::StageCompleted));
        assert!(received.lock().unwrap().is_empty());
        bus.flush();
        assert_eq!(
            *received.lock().unwrap(),
            vec![PipelineEventKind::StageStarted, PipelineEventKind::StageCompleted]
        );
    }

    #[tokio::test]
    async fn subscribers_only_receive_matching_kinds() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(Some(PipelineEventKind::StageFailed));
        bus.emit(event(PipelineEventKind::StageStarted));
        bus.emit(event(PipelineEventKind::StageFailed));
        let received = stream.next().await.unwrap();
        assert_eq!(received.kind, PipelineEventKind::StageFailed);
    }

    #[tokio::test]
    async fn cancel_ends_the_stream() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        bus.emit(event(PipelineEventKind::StageStarted));
        stream.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn terminal_event_closes_all_subscribers() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        bus.emit(event(PipelineEventKind::PipelineCompleted));
        assert!(stream.next().await.is_some());
        bus.emit(event(PipelineEventKind::StageStarted));
        assert!(stream.next().await.is_none());
    }
}
