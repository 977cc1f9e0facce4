//! CSV artifact: one row per band, RFC 4180 quoting.

use crate::engine::analysis::{BandResult, sanitize};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const HEADER: &str = "band,workers,connections,duration_s,tps,qps,avg_latency_ms,p50,p95,p99,std_latency,errors,efficiency,marginal_gain,scaling_region,bottleneck";

/// Render the per-band table.
#[must_use]
pub fn render(results: &[BandResult]) -> String {
    let mut out = String::with_capacity(256 + results.len() * 160);
    out.push_str(HEADER);
    out.push_str("\r\n");

    for result in results {
        let latency = &result.metrics.histogram.latency;
        let marginal = result
            .marginal_gain
            .map(|g| format_float(sanitize(g)))
            .unwrap_or_default();

        let _ = write!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\r\n",
            result.band.index,
            result.band.workers,
            result.band.connections,
            format_float(sanitize(result.duration_s)),
            format_float(sanitize(result.metrics.tps)),
            format_float(sanitize(result.metrics.qps)),
            format_float(sanitize(latency.avg_ms)),
            format_float(sanitize(latency.p50_ms)),
            format_float(sanitize(latency.p95_ms)),
            format_float(sanitize(latency.p99_ms)),
            format_float(sanitize(latency.std_dev_ms)),
            result.metrics.errors,
            format_float(sanitize(result.efficiency)),
            marginal,
            quote(result.scaling_region.as_str()),
            quote(result.bottleneck.as_str()),
        );
    }
    out
}

/// Write the table to `<dir>/<run_id>.csv`.
///
/// # Errors
///
/// Returns an error when the directory cannot be created or the file write
/// fails.
pub fn write(dir: &Path, run_id: &str, results: &[BandResult]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.csv"));
    fs::write(&path, render(results))
        .with_context(|| format!("failed to write CSV export {}", path.display()))?;
    Ok(path)
}

fn format_float(value: f64) -> String {
    format!("{value:.3}")
}

/// RFC 4180: quote fields containing commas, quotes or line breaks; double
/// embedded quotes.
fn quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
