//! Restore points.
//!
//! When a run fails mid-way, the in-memory migration state (completed steps
//! plus the shared namespace) can be dumped to a JSON file and loaded by a
//! later run, which then skips the already-completed top-level steps.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::MigrationContext;
use crate::errors::CheckpointError;

/// Serializable migration progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationState {
    /// Names of top-level steps that completed successfully.
    #[serde(default)]
    pub completed_steps: Vec<String>,

    /// The shared namespace at the time of the dump.
    #[serde(default)]
    pub context: MigrationContext,
}

impl MigrationState {
    /// Whether `step` already ran in a previous (restored) run.
    pub fn has_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    /// Record a completed step.
    pub fn register(&mut self, step: &str) {
        if !self.has_completed(step) {
            self.completed_steps.push(step.to_string());
        }
    }

    /// Save a restore point to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), steps = self.completed_steps.len(), "restore point saved");
        Ok(())
    }

    /// Load a restore point from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&contents)?;
        info!(
            path = %path.display(),
            steps = state.completed_steps.len(),
            "restore point loaded"
        );
        Ok(state)
    }
}
