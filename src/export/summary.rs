//! Human-readable end-of-run summary.

use crate::engine::{ProgressiveResult, RunStatus};
use std::fmt::Write as _;

/// Render the terminal summary block printed after a run.
#[must_use]
pub fn render_summary(result: &ProgressiveResult) -> String {
    let mut out = String::new();
    let interrupted = match result.metadata.status {
        RunStatus::Interrupted => " (interrupted)",
        RunStatus::Failed => " (failed)",
        RunStatus::Completed => "",
    };

    let _ = writeln!(
        out,
        "run {} — workload {} on PostgreSQL {}{}",
        result.metadata.run_id,
        result.metadata.workload,
        result.metadata.backend_version,
        interrupted
    );
    if let Some(failure) = &result.metadata.failure {
        let _ = writeln!(out, "failure: {failure}");
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "{:>4} {:>8} {:>6} {:>10} {:>10} {:>9} {:>9} {:>8} {:>13} {:>16}",
        "band", "workers", "conns", "tps", "qps", "p95(ms)", "p99(ms)", "errors", "region", "bottleneck"
    );
    for band in &result.bands {
        let latency = &band.metrics.histogram.latency;
        let flags = if band.interrupted {
            "*"
        } else if band.aborted {
            "!"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:>4} {:>8} {:>6} {:>10.1} {:>10.1} {:>9.2} {:>9.2} {:>8} {:>13} {:>16}{}",
            band.band.index,
            band.band.workers,
            band.band.connections,
            band.metrics.tps,
            band.metrics.qps,
            latency.p95_ms,
            latency.p99_ms,
            band.metrics.errors,
            band.scaling_region.as_str(),
            band.bottleneck.as_str(),
            flags
        );
    }

    let mut kinds: std::collections::BTreeMap<crate::error::ErrorKind, u64> =
        std::collections::BTreeMap::new();
    for band in &result.bands {
        for (kind, count) in &band.metrics.error_kinds {
            *kinds.entry(*kind).or_insert(0) += count;
        }
    }
    if !kinds.is_empty() {
        let _ = writeln!(out, "\nerrors:");
        for (kind, count) in kinds {
            let exemplar = result
                .bands
                .iter()
                .find_map(|b| b.metrics.error_exemplars.get(&kind))
                .map(String::as_str)
                .unwrap_or("");
            let _ = writeln!(out, "  {:<13} {:>8}  {}", kind.as_str(), count, exemplar);
        }
    }

    if let Some(optimal) = &result.analysis.optimal {
        let _ = writeln!(
            out,
            "\noptimal: band {} ({} workers) at {:.1} tps, {:.2} tps/worker — {}",
            optimal.band_index, optimal.workers, optimal.tps, optimal.efficiency, optimal.reason
        );
    }
    if let Some(best) = result.analysis.models.best {
        let r2 = result
            .analysis
            .models
            .models
            .get(best.as_str())
            .map_or(0.0, |fit| fit.r_squared);
        let _ = writeln!(out, "best fit: {best} (r² = {r2:.4})");
    }
    let _ = writeln!(
        out,
        "bottleneck: {} (confidence {:.0}%)",
        result.analysis.bottleneck.label,
        result.analysis.bottleneck.confidence * 100.0
    );

    for event in &result.scale_events {
        let _ = writeln!(
            out,
            "budget adjustment: workers {}→{}, connections {}→{} ({})",
            event.old_workers,
            event.new_workers,
            event.old_connections,
            event.new_connections,
            event.reason
        );
    }

    out
}
