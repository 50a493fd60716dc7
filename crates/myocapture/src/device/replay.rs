use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::{DeviceAdapter, DeviceEvent, Pacer};
use crate::error::DeviceError;
use crate::types::{Sample, CHANNEL_COUNT};

/// Re-emits the rows of a recorded session file.
///
/// Empty channel cells (masked out at record time) replay as zero. When
/// looping, each pass is shifted forward so timestamps keep increasing.
#[derive(Debug)]
pub struct ReplayArmband {
    path: PathBuf,
    name: String,
    rate_hz: u32,
    looped: bool,
    samples: Vec<Sample>,
}

impl ReplayArmband {
    pub fn open(path: impl AsRef<Path>, rate_hz: u32, looped: bool) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let samples = read_samples(&path)?;
        if samples.is_empty() {
            return Err(DeviceError::Malformed {
                line: 1,
                message: format!("{} has no sample rows", path.display()),
            });
        }

        debug!(path = %path.display(), rows = samples.len(), "replay file loaded");
        Ok(Self {
            name: format!("replay:{}", path.display()),
            path,
            rate_hz,
            looped,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Offset added per pass: the file's span plus one typical step.
    fn pass_span(&self) -> u64 {
        let first = self.samples.first().map(|s| s.timestamp).unwrap_or(0);
        let last = self.samples.last().map(|s| s.timestamp).unwrap_or(0);
        let step = if self.samples.len() > 1 {
            (last.saturating_sub(first) / (self.samples.len() as u64 - 1)).max(1)
        } else {
            1
        };
        last.saturating_sub(first) + step
    }
}

fn read_samples(path: &Path) -> Result<Vec<Sample>, DeviceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let mut samples = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row?;
        let line = i as u64 + 2;
        if row.len() < CHANNEL_COUNT + 1 {
            return Err(DeviceError::Malformed {
                line,
                message: format!("expected {} columns, found {}", CHANNEL_COUNT + 1, row.len()),
            });
        }

        let timestamp = row[0].trim().parse::<u64>().map_err(|e| DeviceError::Malformed {
            line,
            message: format!("bad timestamp {:?}: {e}", &row[0]),
        })?;

        let mut channels = [0i16; CHANNEL_COUNT];
        for (c, value) in channels.iter_mut().enumerate() {
            let cell = row[c + 1].trim();
            if cell.is_empty() {
                continue;
            }
            *value = cell.parse::<i16>().map_err(|e| DeviceError::Malformed {
                line,
                message: format!("bad sensor{} value {cell:?}: {e}", c + 1),
            })?;
        }

        samples.push(Sample::new(timestamp, channels));
    }
    Ok(samples)
}

impl DeviceAdapter for ReplayArmband {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &mut self,
        emit: &mut dyn FnMut(DeviceEvent),
        running: &AtomicBool,
    ) -> Result<(), DeviceError> {
        emit(DeviceEvent::Connected {
            device: self.name.clone(),
        });
        info!(path = %self.path.display(), looped = self.looped, "replay started");

        let span = self.pass_span();
        let mut pacer = Pacer::new(self.rate_hz);
        let mut offset = 0u64;

        'passes: loop {
            for sample in &self.samples {
                if !running.load(Ordering::SeqCst) {
                    break 'passes;
                }
                emit(DeviceEvent::Sample(Sample::new(
                    sample.timestamp + offset,
                    sample.channels,
                )));
                pacer.wait();
            }

            if !self.looped {
                break;
            }
            offset += span;
        }

        let reason = if running.load(Ordering::SeqCst) {
            "end of replay file"
        } else {
            "stopped"
        };
        emit(DeviceEvent::Disconnected {
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const HEADER: &str =
        "timestamp,sensor1,sensor2,sensor3,sensor4,sensor5,sensor6,sensor7,sensor8";

    const FILE: &str = "timestamp,sensor1,sensor2,sensor3,sensor4,sensor5,sensor6,sensor7,sensor8\n\
                        100,1,2,3,4,5,6,7,8\n\
                        110,-1,,3,,5,,7,\n\
                        120,0,0,0,0,0,0,0,0\n";

    fn write(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("session_s1.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn samples(events: Vec<DeviceEvent>) -> Vec<Sample> {
        events
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::Sample(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_pass() {
        let temp = TempDir::new().unwrap();
        let mut replay = ReplayArmband::open(write(&temp, FILE), 0, false).unwrap();
        assert_eq!(replay.len(), 3);

        let running = AtomicBool::new(true);
        let mut events = Vec::new();
        replay.run(&mut |e| events.push(e), &running).unwrap();

        assert_eq!(
            events.last(),
            Some(&DeviceEvent::Disconnected {
                reason: "end of replay file".to_string()
            })
        );
        let samples = samples(events);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[1].channels, [-1, 0, 3, 0, 5, 0, 7, 0]);
    }

    #[test]
    fn test_loop_keeps_timestamps_increasing() {
        let temp = TempDir::new().unwrap();
        let mut replay = ReplayArmband::open(write(&temp, FILE), 0, true).unwrap();

        let running = AtomicBool::new(true);
        let mut events = Vec::new();
        replay
            .run(
                &mut |e| {
                    events.push(e);
                    if events.len() > 7 {
                        running.store(false, Ordering::SeqCst);
                    }
                },
                &running,
            )
            .unwrap();

        let ts: Vec<u64> = samples(events).iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![100, 110, 120, 130, 140, 150, 160]);
    }

    #[test]
    fn test_empty_file_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, &format!("{HEADER}\n"));
        assert!(matches!(
            ReplayArmband::open(path, 0, true),
            Err(DeviceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_bad_value_reports_line() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, &format!("{HEADER}\n1,x,0,0,0,0,0,0,0\n"));
        match ReplayArmband::open(path, 0, false) {
            Err(DeviceError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
