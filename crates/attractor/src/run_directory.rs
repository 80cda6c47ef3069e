//! Per-run artifact directory: manifest, checkpoint, and per-node status
//! files under `<logs_root>/<run_id>/`.
//!
//! ```text
//! <root>/
//!   manifest.json
//!   checkpoint.json
//!   nodes/
//!     <node_id>/
//!       status.json
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::handler::Outcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub goal: String,
    pub start_time: String,
}

#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Create a fresh run directory (and its `nodes/` subdirectory).
    pub fn create(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("nodes")).map_err(PipelineError::from_io)?;
        Ok(Self { root })
    }

    /// Wrap an existing run directory without creating anything.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    #[must_use]
    pub fn node_dir(&self, node_id: &str) -> PathBuf {
        self.root.join("nodes").join(node_id)
    }

    #[must_use]
    pub fn status_path(&self, node_id: &str) -> PathBuf {
        self.node_dir(node_id).join("status.json")
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> PipelineResult<()> {
        let json = serde_json::to_string_pretty(manifest).map_err(|e| PipelineError::Io { message: e.to_string() })?;
        std::fs::write(self.manifest_path(), json).map_err(PipelineError::from_io)
    }

    pub fn write_status(&self, node_id: &str, outcome: &Outcome) -> PipelineResult<()> {
        let dir = self.node_dir(node_id);
        std::fs::create_dir_all(&dir).map_err(PipelineError::from_io)?;
        let json = serde_json::to_string_pretty(outcome).map_err(|e| PipelineError::Io { message: e.to_string() })?;
        std::fs::write(self.status_path(node_id), json).map_err(PipelineError::from_io)
    }

    pub fn read_status(&self, node_id: &str) -> PipelineResult<Outcome> {
        let data = std::fs::read_to_string(self.status_path(node_id)).map_err(PipelineError::from_io)?;
        serde_json::from_str(&data).map_err(|e| PipelineError::Io { message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;
    use std::path::PathBuf;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("attractor-rundir-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn create_makes_the_nodes_subdirectory() {
        let dir = test_dir();
        let run_dir = RunDirectory::create(&dir).unwrap();
        assert!(dir.join("nodes").is_dir());
        drop(run_dir);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_then_read_status_round_trips() {
        let dir = test_dir();
        let run_dir = RunDirectory::create(&dir).unwrap();
        let outcome = Outcome::success().with_notes("done");
        run_dir.write_status("node-a", &outcome).unwrap();
        let read_back = run_dir.read_status("node-a").unwrap();
        assert_eq!(read_back.notes.as_deref(), Some("done"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_manifest_persists_fields() {
        let dir = test_dir();
        let run_dir = RunDirectory::create(&dir).unwrap();
        let manifest = Manifest { name: "demo".into(), goal: "ship it".into(), start_time: "2026-08-01T00:00:00Z".into() };
        run_dir.write_manifest(&manifest).unwrap();
        let read_back: Manifest = serde_json::from_str(&std::fs::read_to_string(run_dir.manifest_path()).unwrap()).unwrap();
        assert_eq!(read_back, manifest);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
