//! Process wiring: registry, capture core, live feed, snapshot schedule and
//! device hub.

use anyhow::{Context, Result};
use myocapture::device::{self, DeviceAdapter};
use myocapture::{CaptureCore, CsvRegistry, DeviceHub, PatientStore, SnapshotScheduler};
use myoconf::MyoConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::live::LiveFeed;
use crate::web::WebState;

/// Everything that lives for the length of the process.
pub struct Runtime {
    pub core: Arc<CaptureCore>,
    pub registry: Arc<dyn PatientStore>,
    pub feed: LiveFeed,
    pub snapshots_dir: PathBuf,
    snapshots: Option<SnapshotScheduler>,
    hub: Option<DeviceHub>,
}

impl Runtime {
    /// Open storage and start the capture core, without a device.
    pub fn build(config: &MyoConfig) -> Result<Self> {
        let paths = &config.infra.paths;
        std::fs::create_dir_all(&paths.data_dir).with_context(|| {
            format!("Failed to create data directory {}", paths.data_dir.display())
        })?;

        let registry: Arc<dyn PatientStore> = Arc::new(
            CsvRegistry::open(paths.registry_file()).context("Failed to open patient registry")?,
        );
        info!(
            patients = registry.count().unwrap_or(0),
            "📋 Patient registry at {}",
            paths.registry_file().display()
        );

        let feed = LiveFeed::default();
        let core = Arc::new(
            CaptureCore::new(
                &config.capture,
                paths.patients_dir(),
                registry.clone(),
                Arc::new(feed.clone()),
            )
            .context("Failed to start capture core")?,
        );

        let snapshots_dir = paths.snapshots_dir();
        let snapshots = match config.capture.snapshot_interval_ms {
            0 => None,
            ms => Some(
                SnapshotScheduler::spawn(
                    core.clone(),
                    snapshots_dir.clone(),
                    Duration::from_millis(ms),
                    config.capture.snapshot_duration.map(|d| d.as_duration()),
                )
                .context("Failed to start snapshot schedule")?,
            ),
        };

        Ok(Self {
            core,
            registry,
            feed,
            snapshots_dir,
            snapshots,
            hub: None,
        })
    }

    /// Start the adapter selected in config.
    pub fn attach_configured_device(&mut self, config: &MyoConfig) -> Result<()> {
        let adapter =
            device::from_config(&config.capture.device).context("Failed to create device adapter")?;
        self.attach(adapter)
    }

    pub fn attach(&mut self, adapter: Box<dyn DeviceAdapter>) -> Result<()> {
        // stopping a hub also puts the core into shutdown
        if self.hub.is_some() {
            anyhow::bail!("a device is already attached");
        }
        let hub =
            DeviceHub::spawn(adapter, self.core.clone()).context("Failed to start device hub")?;
        info!("🦾 Device hub running: {}", hub.device());
        self.hub = Some(hub);
        Ok(())
    }

    pub fn web_state(&self) -> WebState {
        WebState::new(
            self.core.clone(),
            self.registry.clone(),
            self.feed.clone(),
            self.snapshots_dir.clone(),
        )
    }

    pub fn snapshots_running(&self) -> bool {
        self.snapshots.as_ref().is_some_and(|s| s.is_running())
    }

    /// Stop snapshots and the device, close any open session and stop the writer.
    pub fn shutdown(mut self) {
        if let Some(snapshots) = self.snapshots.take() {
            snapshots.shutdown();
        }
        match self.hub.take() {
            Some(hub) => hub.shutdown(),
            None => self.core.request_shutdown(),
        }
        self.core.shutdown();

        if let Some(error) = self.core.status().last_error {
            warn!("last capture error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myocapture::{PatientRecord, Sample};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> MyoConfig {
        let mut config = MyoConfig::default();
        config.infra.paths.data_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_build_creates_registry() {
        let temp = TempDir::new().unwrap();
        let runtime = Runtime::build(&config(&temp)).unwrap();
        assert!(temp.path().join("patients.csv").exists());
        assert_eq!(runtime.registry.count().unwrap(), 0);
        assert!(!runtime.snapshots_running());
        runtime.shutdown();
    }

    #[test]
    fn test_configured_snapshot_schedule() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.capture.snapshot_interval_ms = 20;
        let runtime = Runtime::build(&config).unwrap();
        assert!(runtime.snapshots_running());

        runtime.core.on_sample(Sample::new(1, [1; 8]));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while runtime.core.status().buffered > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(runtime.core.status().buffered, 0);
        runtime.shutdown();

        let written = std::fs::read_dir(temp.path().join("snapshots")).unwrap().count();
        assert_eq!(written, 1);
    }

    #[test]
    fn test_shutdown_closes_open_session() {
        let temp = TempDir::new().unwrap();
        let runtime = Runtime::build(&config(&temp)).unwrap();
        runtime
            .registry
            .register(PatientRecord::new("AAA010101", "Ana", "left-arm", "").unwrap())
            .unwrap();
        runtime
            .core
            .start_session(myocapture::StartCapture {
                patient: myocapture::PatientRef::Id("AAA010101".to_string()),
                session_label: "s1".to_string(),
                observations: "obs".to_string(),
            })
            .unwrap();
        runtime.core.on_sample(Sample::new(1, [1; 8]));

        let core = runtime.core.clone();
        runtime.shutdown();

        assert!(core.is_shutting_down());
        let contents =
            std::fs::read_to_string(temp.path().join("patients/AAA010101/session_s1.csv")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
