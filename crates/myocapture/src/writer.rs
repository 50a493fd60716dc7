//! Session writer - persists recording sessions off the ingestion path.
//!
//! The capture core queues commands on a bounded channel; a dedicated
//! `session-writer` thread owns every open file. Rows are buffered by the
//! CSV writer and flushed once the queue has been quiet for the flush
//! interval, and always on close.
//!
//! I/O errors fault the session. A faulted session discards further rows,
//! records the error in a shared slot the core polls, and reports it again
//! when the session is closed.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::CaptureError;
use crate::types::{ChannelMask, Sample, CHANNEL_COUNT};

/// Column names shared by session files and ring snapshots.
pub const SAMPLE_HEADER: [&str; CHANNEL_COUNT + 1] = [
    "timestamp", "sensor1", "sensor2", "sensor3", "sensor4", "sensor5", "sensor6", "sensor7",
    "sensor8",
];

/// Column names of the per-patient session index.
pub const SESSION_INDEX_HEADER: [&str; 2] = ["sesion", "observaciones"];

const SESSION_INDEX_FILE: &str = "sessions.csv";

/// Replace anything outside `[A-Za-z0-9_-]` so the value is safe as a path component.
pub fn sanitize(component: &str) -> String {
    component
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<patients_dir>/<id>/session_<label>.csv`
pub fn session_path(patients_dir: &Path, patient_id: &str, session_label: &str) -> PathBuf {
    patients_dir
        .join(sanitize(patient_id))
        .join(format!("session_{}.csv", sanitize(session_label)))
}

/// One CSV row for a sample, deselected channels left empty.
pub(crate) fn sample_record(timestamp: u64, values: &[Option<i16>; CHANNEL_COUNT]) -> Vec<String> {
    let mut record = Vec::with_capacity(CHANNEL_COUNT + 1);
    record.push(timestamp.to_string());
    record.extend(
        values
            .iter()
            .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
    );
    record
}

/// Where a session lands on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub patient_id: String,
    pub session_label: String,
    pub observations: String,
}

/// Result of a clean close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    pub path: PathBuf,
    pub rows_written: u64,
}

/// Commands accepted by the writer thread.
#[derive(Debug)]
pub enum WriterCommand {
    Open(SessionTarget),
    Header,
    Row {
        timestamp: u64,
        values: [Option<i16>; CHANNEL_COUNT],
    },
    Close {
        reply: mpsc::Sender<Result<ClosedSession, CaptureError>>,
    },
    Shutdown,
}

/// Handle to the writer thread.
pub struct SessionWriter {
    tx: SyncSender<WriterCommand>,
    fault: Arc<Mutex<Option<String>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionWriter {
    /// Start the writer thread. `queue` bounds the number of pending commands.
    pub fn spawn(
        patients_dir: impl Into<PathBuf>,
        queue: usize,
        flush_interval: Duration,
    ) -> Result<Self, CaptureError> {
        let (tx, rx) = mpsc::sync_channel(queue.max(1));
        let fault = Arc::new(Mutex::new(None));

        let worker = WriterLoop {
            patients_dir: patients_dir.into(),
            flush_interval: flush_interval.max(Duration::from_millis(1)),
            fault: Arc::clone(&fault),
            active: None,
        };

        let handle = std::thread::Builder::new()
            .name("session-writer".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self {
            tx,
            fault,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, command: WriterCommand) -> Result<(), CaptureError> {
        self.tx
            .send(command)
            .map_err(|_| CaptureError::WriterUnavailable)
    }

    pub fn open(&self, target: SessionTarget) -> Result<(), CaptureError> {
        self.send(WriterCommand::Open(target))
    }

    pub fn header(&self) -> Result<(), CaptureError> {
        self.send(WriterCommand::Header)
    }

    /// Queue one data row. Blocks while the queue is full.
    pub fn row(&self, sample: &Sample, mask: &ChannelMask) -> Result<(), CaptureError> {
        self.send(WriterCommand::Row {
            timestamp: sample.timestamp,
            values: mask.apply(sample),
        })
    }

    /// Close the open session and wait until its file is flushed.
    pub fn close(&self) -> Result<ClosedSession, CaptureError> {
        let (reply, rx) = mpsc::channel();
        self.send(WriterCommand::Close { reply })?;
        rx.recv().map_err(|_| CaptureError::WriterUnavailable)?
    }

    /// Take the pending fault, if the writer hit one since the last call.
    pub fn take_fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[cfg(test)]
    pub(crate) fn has_fault(&self) -> bool {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the thread and wait for it. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        // Err means the thread already exited
        let _ = self.tx.send(WriterCommand::Shutdown);
        if handle.join().is_err() {
            warn!("session writer thread panicked");
        }
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter").finish_non_exhaustive()
    }
}

struct ActiveSession {
    path: PathBuf,
    out: Option<csv::Writer<File>>,
    header_written: bool,
    rows_written: u64,
    dirty: bool,
    fault: Option<String>,
}

impl ActiveSession {
    fn write(&mut self, record: &[String]) -> Result<(), csv::Error> {
        match self.out.as_mut() {
            Some(out) => {
                out.write_record(record)?;
                self.dirty = true;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn write_header(&mut self) -> Result<(), csv::Error> {
        if self.header_written {
            return Ok(());
        }
        let header: Vec<String> = SAMPLE_HEADER.iter().map(|s| s.to_string()).collect();
        self.write(&header)?;
        self.header_written = true;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let (true, Some(out)) = (self.dirty, self.out.as_mut()) {
            out.flush()?;
            self.dirty = false;
        }
        Ok(())
    }
}

struct WriterLoop {
    patients_dir: PathBuf,
    flush_interval: Duration,
    fault: Arc<Mutex<Option<String>>>,
    active: Option<ActiveSession>,
}

impl WriterLoop {
    fn run(mut self, rx: Receiver<WriterCommand>) {
        debug!(dir = %self.patients_dir.display(), "session writer started");
        let mut last_flush = Instant::now();

        loop {
            match rx.recv_timeout(self.flush_interval) {
                Ok(WriterCommand::Shutdown) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {
                    self.flush_active();
                    last_flush = Instant::now();
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_flush.elapsed() >= self.flush_interval {
                self.flush_active();
                last_flush = Instant::now();
            }
        }

        if let Some(session) = self.active.take() {
            warn!(path = %session.path.display(), "writer stopping with a session still open");
            let _ = self.finish(session);
        }
        debug!("session writer stopped");
    }

    fn handle(&mut self, command: WriterCommand) {
        match command {
            WriterCommand::Open(target) => {
                if let Some(previous) = self.active.take() {
                    warn!(path = %previous.path.display(), "closing session left open");
                    let _ = self.finish(previous);
                }
                self.active = Some(self.open(&target));
            }
            WriterCommand::Header => {
                if let Some(session) = self.active.as_mut() {
                    if let Err(e) = session.write_header() {
                        let message = format!("header write failed: {e}");
                        self.fail(message);
                    }
                }
            }
            WriterCommand::Row { timestamp, values } => {
                let Some(session) = self.active.as_mut() else {
                    return;
                };
                if session.fault.is_some() {
                    return;
                }
                match session.write(&sample_record(timestamp, &values)) {
                    Ok(()) => session.rows_written += 1,
                    Err(e) => {
                        let message = format!("row write failed: {e}");
                        self.fail(message);
                    }
                }
            }
            WriterCommand::Close { reply } => {
                let result = match self.active.take() {
                    Some(session) => self.finish(session),
                    None => Err(CaptureError::conflict("no session is open")),
                };
                // the requester may have given up waiting
                let _ = reply.send(result);
            }
            WriterCommand::Shutdown => {}
        }
    }

    fn open(&mut self, target: &SessionTarget) -> ActiveSession {
        let path = session_path(&self.patients_dir, &target.patient_id, &target.session_label);
        let mut session = ActiveSession {
            path: path.clone(),
            out: None,
            header_written: false,
            rows_written: 0,
            dirty: false,
            fault: None,
        };

        match self.open_files(target, &path) {
            Ok(out) => {
                info!(
                    patient.id = %target.patient_id,
                    session = %target.session_label,
                    path = %path.display(),
                    "session file opened"
                );
                session.out = Some(out);
            }
            Err(e) => {
                let message = format!("cannot open {}: {e}", path.display());
                error!("{message}");
                session.fault = Some(message.clone());
                self.publish_fault(message);
            }
        }
        session
    }

    fn open_files(
        &self,
        target: &SessionTarget,
        path: &Path,
    ) -> Result<csv::Writer<File>, CaptureError> {
        let patient_dir = self.patients_dir.join(sanitize(&target.patient_id));
        std::fs::create_dir_all(&patient_dir)?;

        let index_path = patient_dir.join(SESSION_INDEX_FILE);
        let new_index = !index_path.exists();
        let index_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;
        let mut index = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(index_file);
        if new_index {
            index.write_record(SESSION_INDEX_HEADER)?;
        }
        index.write_record([target.session_label.as_str(), target.observations.as_str()])?;
        index.flush()?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file))
    }

    fn finish(&mut self, mut session: ActiveSession) -> Result<ClosedSession, CaptureError> {
        if let Some(message) = session.fault.take() {
            return Err(CaptureError::Io(std::io::Error::other(message)));
        }

        session.write_header()?;
        session.dirty = true;
        session.flush()?;

        info!(
            path = %session.path.display(),
            rows = session.rows_written,
            "session file closed"
        );
        Ok(ClosedSession {
            path: session.path,
            rows_written: session.rows_written,
        })
    }

    fn flush_active(&mut self) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = session.flush() {
            let message = format!("flush failed for {}: {e}", session.path.display());
            self.fail(message);
        }
    }

    /// Fault the active session: drop its file and report the error.
    fn fail(&mut self, message: String) {
        error!("{message}");
        if let Some(session) = self.active.as_mut() {
            session.out = None;
            session.fault = Some(message.clone());
        }
        self.publish_fault(message);
    }

    fn publish_fault(&self, message: String) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
    }
}
