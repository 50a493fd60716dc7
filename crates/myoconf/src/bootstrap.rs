//! Bootstrap configuration - seeds capture state, then the capture core owns it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Number of EMG channels on the armband.
pub const CHANNEL_COUNT: usize = 8;

/// Which device adapter feeds the capture core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Synthetic armband signal.
    Simulated,
    /// Replays rows from a recorded session file.
    Replay,
}

impl DeviceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Some(Self::Simulated),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Replay => "replay",
        }
    }
}

/// Device adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "DeviceConfig::default_kind")]
    pub kind: DeviceKind,

    /// Samples per second emitted by the adapter.
    /// Default: 200 (the armband's EMG rate)
    #[serde(default = "DeviceConfig::default_rate_hz")]
    pub rate_hz: u32,

    /// Session file to replay when `kind = "replay"`.
    #[serde(default)]
    pub replay_path: Option<PathBuf>,

    /// Restart the replay file from the top when it runs out.
    #[serde(default = "DeviceConfig::default_replay_loop")]
    pub replay_loop: bool,

    /// Seed for the simulated signal.
    #[serde(default = "DeviceConfig::default_seed")]
    pub seed: u64,
}

impl DeviceConfig {
    fn default_kind() -> DeviceKind {
        DeviceKind::Simulated
    }

    fn default_rate_hz() -> u32 {
        200
    }

    fn default_replay_loop() -> bool {
        true
    }

    fn default_seed() -> u64 {
        0x6d79_6f63
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
            rate_hz: Self::default_rate_hz(),
            replay_path: None,
            replay_loop: Self::default_replay_loop(),
            seed: Self::default_seed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
}

impl DurationUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "s" | "sec" | "secs" | "second" | "seconds" => Some(Self::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(Self::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(Self::Hours),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        }
    }

    fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }
}

/// How long scheduled ring snapshots keep running, e.g. `"10 minutes"` or `"90s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotDuration {
    pub value: u64,
    pub unit: DurationUnit,
}

impl SnapshotDuration {
    pub fn new(value: u64, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    /// Parse `<n>` (seconds), `<n><unit>` or `<n> <unit>`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let value = digits.parse().ok()?;
        Some(Self::new(value, DurationUnit::parse(unit)?))
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.value.saturating_mul(self.unit.seconds()))
    }
}

impl fmt::Display for SnapshotDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.as_str())
    }
}

impl TryFrom<String> for SnapshotDuration {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("invalid duration {s:?}, use e.g. \"10 minutes\""))
    }
}

impl From<SnapshotDuration> for String {
    fn from(d: SnapshotDuration) -> Self {
        d.to_string()
    }
}

/// Capture core settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Ring buffer capacity in samples.
    /// Default: 512
    #[serde(default = "CaptureConfig::default_ring_capacity")]
    pub ring_capacity: usize,

    /// Initial channel selection, one flag per channel.
    #[serde(default = "CaptureConfig::default_channel_mask")]
    pub channel_mask: [bool; CHANNEL_COUNT],

    /// The session writer flushes after this much queue silence.
    /// Default: 1000
    #[serde(default = "CaptureConfig::default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Bound on rows waiting for the session writer.
    /// Default: 4096
    #[serde(default = "CaptureConfig::default_writer_queue")]
    pub writer_queue: usize,

    /// Drain the ring to a snapshot file this often. 0 disables the schedule.
    #[serde(default)]
    pub snapshot_interval_ms: u64,

    /// Stop scheduled snapshots after this long; unset runs until shutdown.
    #[serde(default)]
    pub snapshot_duration: Option<SnapshotDuration>,

    #[serde(default)]
    pub device: DeviceConfig,
}

impl CaptureConfig {
    fn default_ring_capacity() -> usize {
        512
    }

    fn default_channel_mask() -> [bool; CHANNEL_COUNT] {
        [true; CHANNEL_COUNT]
    }

    fn default_flush_interval_ms() -> u64 {
        1000
    }

    fn default_writer_queue() -> usize {
        4096
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_capacity: Self::default_ring_capacity(),
            channel_mask: Self::default_channel_mask(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            writer_queue: Self::default_writer_queue(),
            snapshot_interval_ms: 0,
            snapshot_duration: None,
            device: DeviceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_defaults() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.ring_capacity, 512);
        assert_eq!(capture.channel_mask, [true; 8]);
        assert_eq!(capture.device.kind, DeviceKind::Simulated);
        assert_eq!(capture.device.rate_hz, 200);
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!(DeviceKind::parse("Replay"), Some(DeviceKind::Replay));
        assert_eq!(DeviceKind::parse(" sim "), Some(DeviceKind::Simulated));
        assert_eq!(DeviceKind::parse("myo"), None);
    }

    #[test]
    fn test_snapshot_duration_parse() {
        let ten_min = SnapshotDuration::parse("10 minutes").unwrap();
        assert_eq!(ten_min, SnapshotDuration::new(10, DurationUnit::Minutes));
        assert_eq!(ten_min.as_duration(), Duration::from_secs(600));
        assert_eq!(
            SnapshotDuration::parse("2h").unwrap().as_duration(),
            Duration::from_secs(7200)
        );
        assert_eq!(
            SnapshotDuration::parse("45").unwrap(),
            SnapshotDuration::new(45, DurationUnit::Seconds)
        );
        assert_eq!(SnapshotDuration::parse("ten minutes"), None);
        assert_eq!(SnapshotDuration::parse("3 days"), None);
        assert_eq!(ten_min.to_string(), "10 minutes");
    }
}
