//! Free-form key/value state shared across a pipeline run: node outputs,
//! operator-supplied inputs, and anything a handler chooses to publish for
//! downstream conditions or variable expansion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

/// Storage for pipeline run state. `InMemoryBackend` is the only
/// implementation this crate ships; a host may implement this trait
/// against its own persistence layer.
#[async_trait]
pub trait ContextBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value);
    async fn remove(&self, key: &str);
    async fn snapshot(&self) -> HashMap<String, Value>;
    async fn restore(&self, data: HashMap<String, Value>);
}

#[derive(Default)]
pub struct InMemoryBackend {
    data: Mutex<HashMap<String, Value>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key);
    }

    async fn snapshot(&self) -> HashMap<String, Value> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    async fn restore(&self, data: HashMap<String, Value>) {
        *self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = data;
    }
}

/// The handle a handler interacts with: a backend plus the identity of the
/// run it belongs to. Cheaply `Clone` — clones share the same backend, so
/// cloning is how the engine hands the same context to concurrent callers
/// that should see each other's writes. Use [`PipelineContext::clone_context`]
/// when isolation (no shared backend) is what's wanted instead.
#[derive(Clone)]
pub struct PipelineContext {
    pub run_id: String,
    backend: Arc<dyn ContextBackend>,
}

impl PipelineContext {
    #[must_use]
    pub fn new(run_id: impl Into<String>, backend: Arc<dyn ContextBackend>) -> Self {
        Self { run_id: run_id.into(), backend }
    }

    #[must_use]
    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Arc::new(InMemoryBackend::new()))
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: impl Into<Value>) {
        self.backend.set(key, value.into()).await;
    }

    pub async fn remove(&self, key: &str) {
        self.backend.remove(key).await;
    }

    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.backend.snapshot().await
    }

    pub async fn restore(&self, data: HashMap<String, Value>) {
        self.backend.restore(data).await;
    }

    /// An independent in-memory copy of this context's current state,
    /// sharing the run id but with no aliasing back to the original
    /// backend. Used to give each parallel branch its own isolated state.
    pub async fn clone_context(&self) -> Self {
        let clone = Self::in_memory(self.run_id.clone());
        clone.restore(self.snapshot().await).await;
        clone
    }
}
