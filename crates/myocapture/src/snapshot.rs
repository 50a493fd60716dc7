//! Scheduled ring snapshots.
//!
//! A `ring-snapshot` thread drains the capture ring into
//! `emg_data_<timestamp>.csv` every interval, optionally for a bounded total
//! duration. Recording sessions are unaffected; the snapshot only empties the
//! ring.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::CaptureCore;
use crate::error::CaptureError;

pub struct SnapshotScheduler {
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    dir: PathBuf,
    interval: Duration,
}

impl SnapshotScheduler {
    /// Start draining `core`'s ring into `dir` every `interval`.
    ///
    /// With a `duration` the schedule ends on its own once that much time has
    /// passed since start.
    pub fn spawn(
        core: Arc<CaptureCore>,
        dir: impl Into<PathBuf>,
        interval: Duration,
        duration: Option<Duration>,
    ) -> Result<Self, CaptureError> {
        if interval.is_zero() {
            return Err(CaptureError::validation(
                "snapshot interval must be greater than zero",
            ));
        }

        let dir = dir.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_dir = dir.clone();

        let handle = thread::Builder::new()
            .name("ring-snapshot".to_string())
            .spawn(move || {
                let started = Instant::now();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if core.is_shutting_down() {
                        break;
                    }

                    match core.flush_ring(&thread_dir) {
                        Ok(Some(snapshot)) => {
                            debug!(rows = snapshot.rows, "scheduled snapshot written")
                        }
                        Ok(None) => {}
                        Err(e) => warn!("scheduled snapshot failed: {e}"),
                    }

                    if duration.is_some_and(|d| started.elapsed() >= d) {
                        info!("snapshot schedule finished");
                        break;
                    }
                }
            })?;

        info!(
            interval_ms = interval.as_millis() as u64,
            dir = %dir.display(),
            "snapshot schedule started"
        );

        Ok(Self {
            stop: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
            dir,
            interval,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the schedule and join its thread. Idempotent.
    pub fn shutdown(&self) {
        // dropping the sender wakes the thread even if it already stopped listening
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("snapshot thread panicked");
            }
            debug!("snapshot schedule stopped");
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SnapshotScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotScheduler")
            .field("dir", &self.dir)
            .field("interval", &self.interval)
            .finish()
    }
}
