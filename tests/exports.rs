#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

mod common;

use chrono::Utc;
use common::ladder;
use stormdb::config::Config;
use stormdb::engine::{ProgressiveResult, RunMetadata, RunStatus, analyze};
use stormdb::export::{csv, json};

fn document() -> ProgressiveResult {
    let bands = ladder(&[(10, 1_000.0), (20, 1_900.0), (30, 2_600.0)]);
    ProgressiveResult {
        metadata: RunMetadata {
            run_id: "01hexport".to_string(),
            workload: "select1".to_string(),
            backend_version: 16,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            status: RunStatus::Completed,
            failure: None,
            plan_fingerprint: "linear:3".to_string(),
        },
        configuration: Config::default(),
        analysis: analyze(&bands, 0.01),
        bands,
        scale_events: Vec::new(),
        artifacts: Vec::new(),
    }
}

#[test]
fn test_csv_and_json_describe_the_same_bands() {
    let dir = tempfile::tempdir().unwrap();
    let document = document();

    let csv_path = csv::write(dir.path(), "01hexport", &document.bands).unwrap();
    let json_path = json::write(dir.path(), "01hexport", &document).unwrap();

    let csv_text = std::fs::read_to_string(csv_path).unwrap();
    let parsed: ProgressiveResult =
        serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();

    let rows: Vec<&str> = csv_text.trim_end().split("\r\n").skip(1).collect();
    assert_eq!(rows.len(), parsed.bands.len());

    for (row, band) in rows.iter().zip(&parsed.bands) {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[0].parse::<usize>().unwrap(), band.band.index);
        assert_eq!(fields[1].parse::<u32>().unwrap(), band.band.workers);
        assert_eq!(fields[2].parse::<u32>().unwrap(), band.band.connections);

        let tps: f64 = fields[4].parse().unwrap();
        assert!((tps - band.metrics.tps).abs() < 0.001);

        let errors: u64 = fields[11].parse().unwrap();
        assert_eq!(errors, band.metrics.errors);

        let efficiency: f64 = fields[12].parse().unwrap();
        assert!((efficiency - band.efficiency).abs() < 0.001);

        assert_eq!(fields[14], band.scaling_region.as_str());
        assert_eq!(fields[15], band.bottleneck.as_str());
    }
}

#[test]
fn test_json_export_has_expected_shape() {
    let rendered = json::render(&document()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

    assert!(value.get("metadata").is_some());
    assert!(value.get("configuration").is_some());
    assert!(value["bands"].as_array().map(Vec::len) == Some(3));
    assert!(value["analysis"].get("optimal").is_some());
    assert!(value["analysis"].get("models").is_some());
    assert!(value["analysis"].get("bottleneck").is_some());
    assert!(value["analysis"].get("regions").is_some());

    // pretty-printed, per contract
    assert!(rendered.contains("\n  "));
}

#[test]
fn test_json_export_contains_no_nonfinite_floats() {
    let mut document = document();
    // force a value that would be NaN without sanitization
    document.bands[0].metrics.tps = 0.0;
    document.bands[0].band.workers = 0;
    let rendered = json::render(&document).unwrap();
    assert!(!rendered.contains("NaN"));
    assert!(!rendered.contains("Infinity"));
}

#[test]
fn test_csv_is_crlf_terminated() {
    let rendered = csv::render(&document().bands);
    assert!(rendered.ends_with("\r\n"));
    assert!(rendered.lines().count() >= 4);
}
