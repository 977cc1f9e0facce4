#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

mod common;

use common::ladder;
use stormdb::checkpoint::Checkpoint;

#[test]
fn test_checkpoint_round_trips_band_results() {
    let dir = tempfile::tempdir().unwrap();
    let completed = ladder(&[(10, 1_000.0), (20, 1_900.0)]);

    let checkpoint = Checkpoint::new("01hrun", "linear:5:[10x10,...]", completed.clone(), None);
    checkpoint.write(dir.path()).unwrap();

    let restored = Checkpoint::find_resumable(dir.path(), "linear:5:[10x10,...]").unwrap();
    assert_eq!(restored.run_id, "01hrun");
    assert_eq!(restored.completed.len(), 2);
    assert_eq!(restored.completed[0].band.workers, 10);
    assert!(
        (restored.completed[1].metrics.tps - completed[1].metrics.tps).abs() < f64::EPSILON
    );
}

#[test]
fn test_rewrite_replaces_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();

    let first = Checkpoint::new("01hrun", "fp", ladder(&[(10, 1_000.0)]), None);
    first.write(dir.path()).unwrap();

    let second = Checkpoint::new(
        "01hrun",
        "fp",
        ladder(&[(10, 1_000.0), (20, 1_900.0)]),
        None,
    );
    second.write(dir.path()).unwrap();

    let restored = Checkpoint::find_resumable(dir.path(), "fp").unwrap();
    assert_eq!(restored.completed.len(), 2);

    // still exactly one file for the run
    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
    assert_eq!(files.len(), 1);
}

#[test]
fn test_plan_change_invalidates_resume() {
    let dir = tempfile::tempdir().unwrap();
    Checkpoint::new("01hrun", "linear:5", ladder(&[(10, 1_000.0)]), None)
        .write(dir.path())
        .unwrap();

    assert!(Checkpoint::find_resumable(dir.path(), "linear:6").is_none());
}

#[test]
fn test_clean_removal_after_completion() {
    let dir = tempfile::tempdir().unwrap();
    Checkpoint::new("01hrun", "fp", Vec::new(), None)
        .write(dir.path())
        .unwrap();

    Checkpoint::remove(dir.path(), "01hrun");
    assert!(Checkpoint::find_resumable(dir.path(), "fp").is_none());
}
