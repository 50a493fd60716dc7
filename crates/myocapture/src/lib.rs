//! Session capture core for an 8-channel EMG armband.
//!
//! Samples flow device adapter -> [`DeviceHub`] -> [`CaptureCore`], which
//! keeps the last few hundred in a [`SampleRing`], publishes each one to a
//! [`BroadcastSink`], and while a session is recording hands rows to the
//! [`SessionWriter`] thread. A [`SnapshotScheduler`] can drain the ring to
//! snapshot files on a timer.
//!
//! ```text
//! adapter ──▶ device-hub thread ──▶ CaptureCore (lock)
//!                                     ├─▶ SampleRing ◀── ring-snapshot thread (drain)
//!                                     ├─▶ BroadcastSink
//!                                     └─▶ SessionWriter queue ──▶ session-writer thread ──▶ disk
//! ```

pub mod capture;
pub mod device;
pub mod error;
pub mod registry;
pub mod ring;
pub mod snapshot;
pub mod types;
pub mod writer;

pub use capture::{
    BroadcastSink, CaptureCore, CaptureState, CaptureStatus, PatientRef, RingSnapshot,
    SessionInfo, SessionSummary, StartCapture,
};
pub use device::{DeviceAdapter, DeviceEvent, DeviceHub, ReplayArmband, SimulatedArmband};
pub use error::{CaptureError, DeviceError};
pub use registry::{CsvRegistry, InMemoryRegistry, PatientRecord, PatientStore};
pub use ring::SampleRing;
pub use snapshot::SnapshotScheduler;
pub use types::{ChannelMask, Sample, SampleFrame, CHANNEL_COUNT};
pub use writer::{sanitize, session_path, SessionWriter};
