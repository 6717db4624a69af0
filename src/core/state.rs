//! HS-013: Lock persistence and bookkeeping.
//!
//! One YAML lock per pipeline under `<state_dir>/<pipeline>/`. A save writes
//! a temp file in the same directory and persists it over the old lock.

use super::types::{StateLock, StepLock, StepStatus, StepType};
use crate::tripwire::eventlog::timestamp;
use indexmap::IndexMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const LOCK_FILE: &str = "state.lock.yaml";
const LOCK_SCHEMA: &str = "1.0";

/// Derive the lock file path for a pipeline within the state directory.
pub fn lock_file_path(state_dir: &Path, pipeline: &str) -> PathBuf {
    state_dir.join(pipeline).join(LOCK_FILE)
}

/// Load a pipeline's lock. `None` when the pipeline has never run.
pub fn load_lock(state_dir: &Path, pipeline: &str) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir, pipeline);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
    };
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    if lock.pipeline != pipeline {
        return Err(format!(
            "{} belongs to pipeline '{}', not '{}'",
            path.display(),
            lock.pipeline,
            pipeline
        ));
    }
    Ok(Some(lock))
}

/// Save a lock; readers see either the old file or the new one.
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.pipeline);
    let dir = path
        .parent()
        .ok_or_else(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("cannot serialize lock: {}", e))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| format!("cannot create temp file in {}: {}", dir.display(), e))?;
    tmp.write_all(yaml.as_bytes())
        .map_err(|e| format!("cannot write {}: {}", tmp.path().display(), e))?;
    tmp.persist(&path)
        .map_err(|e| format!("cannot replace {}: {}", path.display(), e.error))?;
    Ok(())
}

impl StateLock {
    /// Empty lock for a pipeline's first run.
    pub fn new(pipeline: &str, account: &str) -> Self {
        Self {
            schema: LOCK_SCHEMA.to_string(),
            pipeline: pipeline.to_string(),
            account: account.to_string(),
            generated_at: timestamp(),
            generator: format!("handson {}", env!("CARGO_PKG_VERSION")),
            blake3_version: "1.8".to_string(),
            steps: IndexMap::new(),
        }
    }

    /// Record a provisioning step that reached its desired state.
    pub fn converge(
        &mut self,
        step_id: &str,
        step_type: StepType,
        object: Option<String>,
        hash: &str,
        duration: f64,
    ) {
        self.put(step_id, step_type, StepStatus::Converged, object, hash, duration);
    }

    /// Record a failed provisioning step. An empty hash forces a retry.
    pub fn fail(&mut self, step_id: &str, step_type: StepType, object: Option<String>, duration: f64) {
        self.put(step_id, step_type, StepStatus::Failed, object, "", duration);
    }

    /// Drop a destroyed step's entry.
    pub fn forget(&mut self, step_id: &str) -> Option<StepLock> {
        self.steps.shift_remove(step_id)
    }

    /// Stamp the end of a run.
    pub fn touch(&mut self) {
        self.generated_at = timestamp();
    }

    fn put(
        &mut self,
        step_id: &str,
        step_type: StepType,
        status: StepStatus,
        object: Option<String>,
        hash: &str,
        duration: f64,
    ) {
        self.steps.insert(
            step_id.to_string(),
            StepLock {
                step_type,
                status,
                object,
                applied_at: Some(timestamp()),
                duration_seconds: Some(duration),
                hash: hash.to_string(),
            },
        );
    }
}
