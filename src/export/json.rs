//! JSON artifact: the full run, pretty-printed.

use crate::engine::ProgressiveResult;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Render the run document.
///
/// # Errors
///
/// Returns an error when encoding fails.
pub fn render(result: &ProgressiveResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to encode run result")
}

/// Write the run document to `<dir>/<run_id>.json`.
///
/// # Errors
///
/// Returns an error when the directory cannot be created or the write fails.
pub fn write(dir: &Path, run_id: &str, result: &ProgressiveResult) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    fs::write(&path, render(result)?)
        .with_context(|| format!("failed to write JSON export {}", path.display()))?;
    Ok(path)
}
