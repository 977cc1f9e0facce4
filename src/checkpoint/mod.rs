//! Run checkpoints: crash-safe progress records.
//!
//! One JSON file per run under the checkpoint directory, rewritten after
//! every completed band via write-to-temp-then-rename so a crash never
//! leaves a torn file. A later run with the same plan fingerprint resumes
//! from the completed bands; a clean finish removes the file.

use crate::engine::analysis::BandResult;
use crate::engine::plan::Band;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub plan_fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub completed: Vec<BandResult>,
    pub in_progress: Option<Band>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(
        run_id: &str,
        plan_fingerprint: &str,
        completed: Vec<BandResult>,
        in_progress: Option<Band>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            plan_fingerprint: plan_fingerprint.to_string(),
            timestamp: Utc::now(),
            completed,
            in_progress,
        }
    }

    #[must_use]
    pub fn path(dir: &Path, run_id: &str) -> PathBuf {
        dir.join(format!("{run_id}.json"))
    }

    /// Persist atomically: write a sibling temp file, then rename over the
    /// destination.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or either the
    /// write or the rename fails.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;

        let path = Self::path(dir, &self.run_id);
        let tmp = path.with_extension("json.tmp");

        let payload = serde_json::to_vec_pretty(self).context("failed to encode checkpoint")?;
        fs::write(&tmp, payload)
            .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move checkpoint into place at {}", path.display()))?;

        debug!(path = %path.display(), bands = self.completed.len(), "checkpoint written");
        Ok(path)
    }

    /// Delete this run's checkpoint. Missing files are fine.
    pub fn remove(dir: &Path, run_id: &str) {
        let path = Self::path(dir, run_id);
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "checkpoint removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), "failed to remove checkpoint: {e}"),
        }
    }

    /// Scan the checkpoint directory for a run with a matching plan
    /// fingerprint. Unreadable or mismatched files are skipped, not errors.
    #[must_use]
    pub fn find_resumable(dir: &Path, plan_fingerprint: &str) -> Option<Self> {
        let entries = fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<Self>(&raw) {
                Ok(checkpoint) if checkpoint.plan_fingerprint == plan_fingerprint => {
                    debug!(
                        path = %path.display(),
                        run_id = %checkpoint.run_id,
                        "resumable checkpoint found"
                    );
                    return Some(checkpoint);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable checkpoint: {e}");
                }
            }
        }
        None
    }
}
