//! Shared fixtures for capture integration tests.

#![allow(dead_code)]

use anyhow::Result;
use myocapture::{
    BroadcastSink, CaptureCore, CsvRegistry, PatientRecord, PatientStore, SampleFrame,
};
use myoconf::CaptureConfig;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Sink that keeps every frame it is handed.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<SampleFrame>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<SampleFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl BroadcastSink for RecordingSink {
    fn publish(&self, frame: SampleFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

pub struct Harness {
    pub core: Arc<CaptureCore>,
    pub sink: Arc<RecordingSink>,
    pub registry: Arc<CsvRegistry>,
    pub dir: TempDir,
}

impl Harness {
    pub fn patients_dir(&self) -> PathBuf {
        self.dir.path().join("patients")
    }
}

pub fn harness() -> Result<Harness> {
    harness_with(CaptureConfig::default())
}

pub fn harness_with(config: CaptureConfig) -> Result<Harness> {
    let dir = TempDir::new()?;
    let registry = Arc::new(CsvRegistry::open(dir.path().join("patients.csv"))?);
    registry.register(PatientRecord::new(
        "AAA010101",
        "Ana",
        "left-arm",
        "post-op",
    )?)?;

    let sink = Arc::new(RecordingSink::default());
    let store: Arc<dyn PatientStore> = registry.clone();
    let core = Arc::new(CaptureCore::new(
        &config,
        dir.path().join("patients"),
        store,
        sink.clone(),
    )?);

    Ok(Harness {
        core,
        sink,
        registry,
        dir,
    })
}

pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::to_string)
        .collect())
}

/// Poll until `check` holds or a few seconds pass.
pub fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
