//! Scheduled ring snapshots.
//!
//! These tests verify:
//! - The schedule drains the ring into snapshot files on its interval
//! - A bounded schedule ends on its own
//! - Shutdown stops the thread promptly and is idempotent

mod common;

use anyhow::Result;
use common::{harness, read_lines, wait_for};
use myocapture::{CaptureError, Sample, SnapshotScheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn snapshot_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default();
    files.sort();
    files
}

#[test]
fn test_schedule_drains_ring_to_files() -> Result<()> {
    let h = harness()?;
    let dir = h.dir.path().join("snapshots");
    let scheduler =
        SnapshotScheduler::spawn(Arc::clone(&h.core), &dir, Duration::from_millis(20), None)?;

    for t in 0..5 {
        h.core.on_sample(Sample::new(t, [t as i16; 8]));
    }
    assert!(wait_for(|| h.core.status().buffered == 0));
    assert!(wait_for(|| !snapshot_files(&dir).is_empty()));

    scheduler.shutdown();
    let rows: usize = snapshot_files(&dir)
        .iter()
        .map(|path| read_lines(path).map(|lines| lines.len() - 1))
        .sum::<Result<usize>>()?;
    assert_eq!(rows, 5);
    Ok(())
}

#[test]
fn test_bounded_schedule_ends_itself() -> Result<()> {
    let h = harness()?;
    let scheduler = SnapshotScheduler::spawn(
        Arc::clone(&h.core),
        h.dir.path().join("snapshots"),
        Duration::from_millis(10),
        Some(Duration::from_millis(50)),
    )?;

    assert!(wait_for(|| !scheduler.is_running()));
    h.core.on_sample(Sample::new(1, [0; 8]));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.core.status().buffered, 1);
    Ok(())
}

#[test]
fn test_shutdown_is_prompt_and_idempotent() -> Result<()> {
    let h = harness()?;
    let scheduler = SnapshotScheduler::spawn(
        Arc::clone(&h.core),
        h.dir.path().join("snapshots"),
        Duration::from_secs(3600),
        None,
    )?;

    let begun = Instant::now();
    scheduler.shutdown();
    scheduler.shutdown();
    assert!(begun.elapsed() < Duration::from_secs(5));
    assert!(!scheduler.is_running());
    Ok(())
}

#[test]
fn test_zero_interval_rejected() -> Result<()> {
    let h = harness()?;
    let err = SnapshotScheduler::spawn(
        Arc::clone(&h.core),
        h.dir.path().join("snapshots"),
        Duration::ZERO,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, CaptureError::Validation(_)));
    Ok(())
}
