//! Capture core - the Idle/Recording state machine.
//!
//! Every device event goes through [`CaptureCore::handle_event`]. One lock
//! guards the ring, the channel mask and the active session, so a sample is
//! pushed, broadcast and queued for disk as a single step and the writer
//! queue sees rows in arrival order.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use myoconf::CaptureConfig;

use crate::device::DeviceEvent;
use crate::error::CaptureError;
use crate::registry::{PatientRecord, PatientStore};
use crate::ring::SampleRing;
use crate::types::{ChannelMask, Sample, SampleFrame};
use crate::writer::{sample_record, session_path, SessionTarget, SessionWriter, SAMPLE_HEADER};

/// Receives one frame per accepted sample.
///
/// Called with the core lock held; implementations must not block.
pub trait BroadcastSink: Send + Sync {
    fn publish(&self, frame: SampleFrame);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Recording,
}

/// How a start request names its patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientRef {
    Id(String),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCapture {
    pub patient: PatientRef,
    pub session_label: String,
    pub observations: String,
}

/// The session that is currently recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub patient_id: String,
    pub patient_name: String,
    pub session_label: String,
    pub observations: String,
    pub started_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Returned by a stop that closed a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub patient_id: String,
    pub session_label: String,
    pub rows_written: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub patient_id: Option<String>,
    pub session_label: Option<String>,
    pub samples_seen: u64,
    pub rows_queued: u64,
    pub buffered: usize,
    pub ring_capacity: usize,
    pub channel_mask: ChannelMask,
    pub device: Option<String>,
    pub device_connected: bool,
    pub last_error: Option<String>,
}

/// Result of [`CaptureCore::flush_ring`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingSnapshot {
    pub path: PathBuf,
    pub rows: usize,
}

struct ActiveCapture {
    info: SessionInfo,
    header_written: bool,
    rows_queued: u64,
}

struct CoreState {
    ring: SampleRing,
    mask: ChannelMask,
    session: Option<ActiveCapture>,
    samples_seen: u64,
    shutting_down: bool,
    device: Option<String>,
    device_connected: bool,
    last_error: Option<String>,
    /// A fault that ended a session before anyone called stop.
    unreported_fault: Option<String>,
}

pub struct CaptureCore {
    state: Mutex<CoreState>,
    registry: Arc<dyn PatientStore>,
    sink: Arc<dyn BroadcastSink>,
    writer: SessionWriter,
    patients_dir: PathBuf,
}

impl CaptureCore {
    /// Build the core and start its session writer.
    pub fn new(
        config: &CaptureConfig,
        patients_dir: impl Into<PathBuf>,
        registry: Arc<dyn PatientStore>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Result<Self, CaptureError> {
        let patients_dir = patients_dir.into();
        let writer = SessionWriter::spawn(
            patients_dir.clone(),
            config.writer_queue,
            Duration::from_millis(config.flush_interval_ms),
        )?;

        let mask = ChannelMask::new(config.channel_mask);
        debug!(
            ring_capacity = config.ring_capacity,
            mask = %mask,
            dir = %patients_dir.display(),
            "capture core ready"
        );

        Ok(Self {
            state: Mutex::new(CoreState {
                ring: SampleRing::new(config.ring_capacity),
                mask,
                session: None,
                samples_seen: 0,
                shutting_down: false,
                device: None,
                device_connected: false,
                last_error: None,
                unreported_fault: None,
            }),
            registry,
            sink,
            writer,
            patients_dir,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &Arc<dyn PatientStore> {
        &self.registry
    }

    pub fn patients_dir(&self) -> &Path {
        &self.patients_dir
    }

    pub fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected { device } => {
                info!(device = %device, "device connected");
                let mut state = self.lock();
                state.device = Some(device);
                state.device_connected = true;
            }
            DeviceEvent::Sample(sample) => self.on_sample(sample),
            DeviceEvent::Disconnected { reason } => {
                warn!(reason = %reason, "device disconnected");
                self.lock().device_connected = false;
            }
        }
    }

    /// Ring push, broadcast, then a queued row while recording.
    pub fn on_sample(&self, sample: Sample) {
        let mut state = self.lock();
        state.ring.push(sample);
        state.samples_seen += 1;
        self.sink.publish(SampleFrame::from_sample(&sample, &state.mask));

        if state.session.is_none() || state.shutting_down {
            return;
        }

        if let Some(fault) = self.writer.take_fault() {
            self.abort_session(&mut state, fault);
            return;
        }

        if let Err(e) = self.queue_row(&mut state, &sample) {
            self.abort_session(&mut state, e.to_string());
        }
    }

    fn queue_row(&self, state: &mut CoreState, sample: &Sample) -> Result<(), CaptureError> {
        let mask = state.mask;
        let Some(active) = state.session.as_mut() else {
            return Ok(());
        };

        if !active.header_written {
            self.writer.header()?;
            active.header_written = true;
        }
        self.writer.row(sample, &mask)?;
        active.rows_queued += 1;
        Ok(())
    }

    /// End the active session after a writer fault.
    fn abort_session(&self, state: &mut CoreState, message: String) {
        let Some(active) = state.session.take() else {
            return;
        };
        error!(
            patient.id = %active.info.patient_id,
            session = %active.info.session_label,
            "session aborted: {message}"
        );

        // release the writer's handle on the faulted file
        let _ = self.writer.close();
        self.writer.take_fault();

        state.last_error = Some(message.clone());
        state.unreported_fault = Some(message);
    }

    fn resolve(&self, patient: &PatientRef) -> Result<PatientRecord, CaptureError> {
        match patient {
            PatientRef::Id(id) => self.registry.find_by_id(id),
            PatientRef::Name(name) => self.registry.find_by_name(name),
        }
    }

    /// Idle -> Recording.
    pub fn start_session(&self, request: StartCapture) -> Result<SessionInfo, CaptureError> {
        let (key, value) = match &request.patient {
            PatientRef::Id(id) => ("patientId", id),
            PatientRef::Name(name) => ("name", name),
        };
        for (field, value) in [
            (key, value),
            ("sessionLabel", &request.session_label),
            ("observations", &request.observations),
        ] {
            if value.trim().is_empty() {
                return Err(CaptureError::validation(format!("{field} must not be empty")));
            }
        }

        let mut state = self.lock();
        if state.shutting_down {
            return Err(CaptureError::ShuttingDown);
        }
        if let Some(active) = &state.session {
            return Err(CaptureError::conflict(format!(
                "already recording session {} for patient {}",
                active.info.session_label, active.info.patient_id
            )));
        }

        let patient = self.resolve(&request.patient)?;
        let session_label = request.session_label.trim().to_string();
        let path = session_path(&self.patients_dir, &patient.patient_id, &session_label);
        if path.exists() {
            return Err(CaptureError::conflict(format!(
                "session {session_label} already exists for patient {}",
                patient.patient_id
            )));
        }

        // a fault from an earlier session must not end this one
        self.writer.take_fault();
        state.unreported_fault = None;

        let observations = request.observations.trim().to_string();
        self.writer.open(SessionTarget {
            patient_id: patient.patient_id.clone(),
            session_label: session_label.clone(),
            observations: observations.clone(),
        })?;

        let info = SessionInfo {
            patient_id: patient.patient_id,
            patient_name: patient.name,
            session_label,
            observations,
            started_at: Utc::now(),
            path,
        };
        info!(
            patient.id = %info.patient_id,
            session = %info.session_label,
            "recording started"
        );

        state.session = Some(ActiveCapture {
            info: info.clone(),
            header_written: false,
            rows_queued: 0,
        });
        Ok(info)
    }

    /// Recording -> Idle. Returns once the session file is flushed and closed.
    ///
    /// `Ok(None)` when nothing was recording. A session that already ended on
    /// a writer fault reports that fault once.
    pub fn stop_session(&self) -> Result<Option<SessionSummary>, CaptureError> {
        let mut state = self.lock();
        let Some(active) = state.session.take() else {
            return match state.unreported_fault.take() {
                Some(message) => Err(CaptureError::Io(std::io::Error::other(message))),
                None => Ok(None),
            };
        };

        let closed = self.writer.close();
        self.writer.take_fault();

        match closed {
            Ok(closed) => {
                info!(
                    patient.id = %active.info.patient_id,
                    session = %active.info.session_label,
                    rows = closed.rows_written,
                    "recording stopped"
                );
                Ok(Some(SessionSummary {
                    patient_id: active.info.patient_id,
                    session_label: active.info.session_label,
                    rows_written: closed.rows_written,
                    path: closed.path,
                }))
            }
            Err(e) => {
                error!(
                    patient.id = %active.info.patient_id,
                    session = %active.info.session_label,
                    "session ended with error: {e}"
                );
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Reject new sessions and stop queueing rows.
    pub fn request_shutdown(&self) {
        let mut state = self.lock();
        if !state.shutting_down {
            debug!("capture core shutting down");
            state.shutting_down = true;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Close any open session and stop the writer thread.
    pub fn shutdown(&self) {
        self.request_shutdown();
        match self.stop_session() {
            Ok(Some(summary)) => info!(
                rows = summary.rows_written,
                path = %summary.path.display(),
                "closed session on shutdown"
            ),
            Ok(None) => {}
            Err(e) => warn!("session close failed during shutdown: {e}"),
        }
        self.writer.shutdown();
    }

    pub fn status(&self) -> CaptureStatus {
        let state = self.lock();
        let session = state.session.as_ref();
        CaptureStatus {
            state: if session.is_some() {
                CaptureState::Recording
            } else {
                CaptureState::Idle
            },
            patient_id: session.map(|s| s.info.patient_id.clone()),
            session_label: session.map(|s| s.info.session_label.clone()),
            samples_seen: state.samples_seen,
            rows_queued: session.map(|s| s.rows_queued).unwrap_or(0),
            buffered: state.ring.len(),
            ring_capacity: state.ring.capacity(),
            channel_mask: state.mask,
            device: state.device.clone(),
            device_connected: state.device_connected,
            last_error: state.last_error.clone(),
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.lock().session.is_some() {
            CaptureState::Recording
        } else {
            CaptureState::Idle
        }
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.lock().mask
    }

    /// Applies from the next sample on.
    pub fn set_channel_mask(&self, mask: ChannelMask) {
        let mut state = self.lock();
        if state.mask != mask {
            info!(mask = %mask, "channel mask changed");
            state.mask = mask;
        }
    }

    /// The newest `n` buffered samples, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Sample> {
        self.lock().ring.latest(n)
    }

    /// Drain the ring into `emg_data_<timestamp>.csv` under `dir`.
    ///
    /// Writes all channels regardless of the mask. `Ok(None)` for an empty ring.
    pub fn flush_ring(&self, dir: &Path) -> Result<Option<RingSnapshot>, CaptureError> {
        let samples = self.lock().ring.drain();
        if samples.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(dir)?;
        let (path, file) = create_snapshot_file(dir, Local::now())?;

        let mut out = csv::Writer::from_writer(file);
        out.write_record(SAMPLE_HEADER)?;
        for sample in &samples {
            out.write_record(sample_record(
                sample.timestamp,
                &ChannelMask::all().apply(sample),
            ))?;
        }
        out.flush()?;

        info!(path = %path.display(), rows = samples.len(), "ring snapshot written");
        Ok(Some(RingSnapshot {
            path,
            rows: samples.len(),
        }))
    }
}

impl std::fmt::Debug for CaptureCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCore")
            .field("patients_dir", &self.patients_dir)
            .finish_non_exhaustive()
    }
}

/// Create the first free `emg_data_<YYYYmmdd_HHMMSS>[_n].csv` in `dir`.
///
/// `create_new` makes the claim atomic, so concurrent snapshots in the same
/// second never share a file.
fn create_snapshot_file(dir: &Path, now: DateTime<Local>) -> std::io::Result<(PathBuf, File)> {
    let stem = format!("emg_data_{}", now.format("%Y%m%d_%H%M%S"));
    let mut path = dir.join(format!("{stem}.csv"));
    let mut n = 1;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                path = dir.join(format!("{stem}_{n}.csv"));
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Frames(Mutex<Vec<SampleFrame>>);

    impl BroadcastSink for Frames {
        fn publish(&self, frame: SampleFrame) {
            self.0.lock().unwrap().push(frame);
        }
    }

    fn core(dir: &Path) -> (CaptureCore, Arc<Frames>) {
        let registry = InMemoryRegistry::new();
        registry
            .register(PatientRecord::new("AAA010101", "Ana", "left-arm", "").unwrap())
            .unwrap();
        let frames = Arc::new(Frames::default());
        let config = CaptureConfig {
            ring_capacity: 4,
            ..CaptureConfig::default()
        };
        let core = CaptureCore::new(&config, dir, Arc::new(registry), frames.clone()).unwrap();
        (core, frames)
    }

    fn start(label: &str) -> StartCapture {
        StartCapture {
            patient: PatientRef::Id("AAA010101".to_string()),
            session_label: label.to_string(),
            observations: "obs".to_string(),
        }
    }

    #[test]
    fn test_validation_precedes_lookup() {
        let temp = TempDir::new().unwrap();
        let (core, _) = core(temp.path());
        let mut request = start("s1");
        request.session_label = "  ".to_string();
        assert!(matches!(
            core.start_session(request).unwrap_err(),
            CaptureError::Validation(_)
        ));
        assert_eq!(core.state(), CaptureState::Idle);
    }

    #[test]
    fn test_start_by_name() {
        let temp = TempDir::new().unwrap();
        let (core, _) = core(temp.path());
        let info = core
            .start_session(StartCapture {
                patient: PatientRef::Name("Ana".to_string()),
                ..start("s1")
            })
            .unwrap();
        assert_eq!(info.patient_id, "AAA010101");
        assert_eq!(core.state(), CaptureState::Recording);
    }

    #[test]
    fn test_second_start_conflicts() {
        let temp = TempDir::new().unwrap();
        let (core, _) = core(temp.path());
        core.start_session(start("s1")).unwrap();
        assert!(matches!(
            core.start_session(start("s2")).unwrap_err(),
            CaptureError::Conflict(_)
        ));
        assert_eq!(core.status().session_label.as_deref(), Some("s1"));
    }

    #[test]
    fn test_existing_label_conflicts() {
        let temp = TempDir::new().unwrap();
        let (core, _) = core(temp.path());
        core.start_session(start("s1")).unwrap();
        core.stop_session().unwrap();
        assert!(matches!(
            core.start_session(start("s1")).unwrap_err(),
            CaptureError::Conflict(_)
        ));
    }

    #[test]
    fn test_ring_keeps_capacity_and_broadcasts_everything() {
        let temp = TempDir::new().unwrap();
        let (core, frames) = core(temp.path());
        for t in 0..10 {
            core.on_sample(Sample::new(t, [1; 8]));
        }
        let status = core.status();
        assert_eq!(status.buffered, 4);
        assert_eq!(status.samples_seen, 10);
        assert_eq!(frames.0.lock().unwrap().len(), 10);
        let recent: Vec<u64> = core.recent(2).iter().map(|s| s.timestamp).collect();
        assert_eq!(recent, vec![8, 9]);
    }

    #[test]
    fn test_mask_change_applies_to_next_frame() {
        let temp = TempDir::new().unwrap();
        let (core, frames) = core(temp.path());
        core.on_sample(Sample::new(1, [1, 2, 3, 4, 5, 6, 7, 8]));
        core.set_channel_mask(ChannelMask::new([
            true, true, false, false, false, false, false, false,
        ]));
        core.on_sample(Sample::new(2, [1, 2, 3, 4, 5, 6, 7, 8]));

        let frames = frames.0.lock().unwrap();
        assert_eq!(frames[0].channels.len(), 8);
        assert_eq!(frames[1].channels, vec![1, 2]);
    }

    #[test]
    fn test_shutdown_rejects_start() {
        let temp = TempDir::new().unwrap();
        let (core, _) = core(temp.path());
        core.request_shutdown();
        assert!(matches!(
            core.start_session(start("s1")).unwrap_err(),
            CaptureError::ShuttingDown
        ));
    }

    #[test]
    fn test_flush_ring_empty_is_none() {
        let temp = TempDir::new().unwrap();
        let (core, _) = core(temp.path());
        assert!(core.flush_ring(&temp.path().join("snapshots")).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_file_avoids_collisions() {
        let temp = TempDir::new().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let (first, _) = create_snapshot_file(temp.path(), now).unwrap();
        assert_eq!(first.file_name().unwrap(), "emg_data_20240309_140507.csv");
        let (second, _) = create_snapshot_file(temp.path(), now).unwrap();
        assert_eq!(second.file_name().unwrap(), "emg_data_20240309_140507_1.csv");
    }

    #[test]
    fn test_concurrent_snapshots_get_distinct_files() {
        let temp = TempDir::new().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let dir = temp.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                std::thread::spawn(move || create_snapshot_file(&dir, now).unwrap().0)
            })
            .collect();
        let mut paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        paths.sort();
        paths.dedup();

        assert_eq!(paths.len(), 8);
    }

    #[test]
    fn test_fault_seen_by_sample_ends_session_once() {
        let temp = TempDir::new().unwrap();
        // a plain file where the patient's directory belongs
        std::fs::write(temp.path().join("AAA010101"), b"blocker").unwrap();
        let (core, _) = core(temp.path());

        core.start_session(start("s1")).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !core.writer.has_fault() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(core.writer.has_fault());

        core.on_sample(Sample::new(1, [1; 8]));

        let status = core.status();
        assert_eq!(status.state, CaptureState::Idle);
        assert!(status.last_error.unwrap().contains("session_s1.csv"));
        assert!(matches!(core.stop_session(), Err(CaptureError::Io(_))));
        assert!(core.stop_session().unwrap().is_none());
        assert!(core.status().last_error.is_some());
    }
}
