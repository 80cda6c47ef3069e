//! Durable run state, so an engine run can resume after a crash or a
//! deliberate pause without replaying every stage from the start.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub current_node: String,
    pub context: HashMap<String, Value>,
    pub visited: Vec<String>,
    /// The node a resumed run should start from. Absent only for
    /// checkpoints saved before the engine determined a next hop (e.g.
    /// a checkpoint saved at the exit node, which has no successor).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node: Option<String>,
    /// Outcome status string (`"success"`, `"fail"`, ...) per visited
    /// node, so a resumed run can reconstruct goal-gate state without
    /// re-executing anything.
    #[serde(default)]
    pub node_statuses: HashMap<String, String>,
    /// Retry attempt count per visited node, carried across a resume so
    /// a node that already exhausted its budget doesn't get a fresh one.
    #[serde(default)]
    pub node_retries: HashMap<String, u32>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(run_id: impl Into<String>, current_node: impl Into<String>, context: HashMap<String, Value>, visited: Vec<String>) -> Self {
        Self {
            run_id: run_id.into(),
            current_node: current_node.into(),
            context,
            visited,
            next_node: None,
            node_statuses: HashMap::new(),
            node_retries: HashMap::new(),
            saved_at: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn with_next_node(mut self, next_node: impl Into<String>) -> Self {
        self.next_node = Some(next_node.into());
        self
    }

    #[must_use]
    pub fn with_node_statuses(mut self, node_statuses: HashMap<String, String>) -> Self {
        self.node_statuses = node_statuses;
        self
    }

    #[must_use]
    pub fn with_node_retries(mut self, node_retries: HashMap<String, u32>) -> Self {
        self.node_retries = node_retries;
        self
    }
}

/// Saves and loads [`Checkpoint`]s at `<logs_root>/<run_id>/checkpoint.json`,
/// one directory per run, matching the rest of that run's artifact tree.
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a half-written checkpoint.
pub struct CheckpointManager {
    logs_root: PathBuf,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        Self { logs_root: logs_root.into() }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.logs_root.join(run_id)
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("checkpoint.json")
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> PipelineResult<()> {
        let run_dir = self.run_dir(&checkpoint.run_id);
        fs::create_dir_all(&run_dir).await.map_err(PipelineError::from_io)?;
        let body = serde_json::to_vec_pretty(checkpoint).map_err(|e| PipelineError::Checkpoint { message: e.to_string() })?;
        let final_path = self.path_for(&checkpoint.run_id);
        let tmp_path = run_dir.join("checkpoint.json.tmp");
        fs::write(&tmp_path, &body).await.map_err(PipelineError::from_io)?;
        fs::rename(&tmp_path, &final_path).await.map_err(PipelineError::from_io)?;
        Ok(())
    }

    pub async fn load(&self, run_id: &str) -> PipelineResult<Option<Checkpoint>> {
        let path = self.path_for(run_id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let checkpoint = serde_json::from_slice(&bytes).map_err(|e| PipelineError::Checkpoint { message: e.to_string() })?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::from_io(e)),
        }
    }

    pub async fn remove(&self, run_id: &str) -> PipelineResult<()> {
        match fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::from_io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("attractor-checkpoint-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let manager = CheckpointManager::new(test_dir());
        let mut context = HashMap::new();
        context.insert("step".to_string(), Value::from(2));
        let checkpoint = Checkpoint::new("run-1", "node-b", context, vec!["node-a".into(), "node-b".into()]);
        manager.save(&checkpoint).await.unwrap();

        let loaded = manager.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_node, "node-b");
        assert_eq!(loaded.visited, vec!["node-a".to_string(), "node-b".to_string()]);
    }

    #[tokio::test]
    async fn load_missing_run_returns_none() {
        let manager = CheckpointManager::new(test_dir());
        assert!(manager.load("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let manager = CheckpointManager::new(test_dir());
        let checkpoint = Checkpoint::new("run-1", "node-a", HashMap::new(), vec![]);
        manager.save(&checkpoint).await.unwrap();
        manager.remove("run-1").await.unwrap();
        assert!(manager.load("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_node_and_retry_metadata_round_trip() {
        let manager = CheckpointManager::new(test_dir());
        let mut node_statuses = HashMap::new();
        node_statuses.insert("node-a".to_string(), "success".to_string());
        let mut node_retries = HashMap::new();
        node_retries.insert("node-a".to_string(), 2u32);
        let checkpoint = Checkpoint::new("run-1", "node-a", HashMap::new(), vec!["node-a".into()])
            .with_next_node("node-b")
            .with_node_statuses(node_statuses)
            .with_node_retries(node_retries);
        manager.save(&checkpoint).await.unwrap();

        let loaded = manager.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.next_node.as_deref(), Some("node-b"));
        assert_eq!(loaded.node_statuses.get("node-a").map(String::as_str), Some("success"));
        assert_eq!(loaded.node_retries.get("node-a"), Some(&2));
    }

    #[tokio::test]
    async fn overwriting_a_checkpoint_leaves_no_temp_file_behind() {
        let dir = test_dir();
        let manager = CheckpointManager::new(dir.clone());
        manager.save(&Checkpoint::new("run-1", "a", HashMap::new(), vec![])).await.unwrap();
        manager.save(&Checkpoint::new("run-1", "b", HashMap::new(), vec![])).await.unwrap();
        let mut entries = fs::read_dir(&dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["run-1.checkpoint.json".to_string()]);
    }
}
