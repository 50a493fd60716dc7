//! Device adapters - sources of armband samples.
//!
//! An adapter runs on the hub thread and reports through a callback until
//! the hub's running flag clears or its input ends.

mod hub;
mod replay;
mod simulated;

pub use hub::DeviceHub;
pub use replay::ReplayArmband;
pub use simulated::SimulatedArmband;

use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use myoconf::{DeviceConfig, DeviceKind};

use crate::error::DeviceError;
use crate::types::Sample;

/// What an adapter reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected { device: String },
    Sample(Sample),
    Disconnected { reason: String },
}

pub trait DeviceAdapter: Send {
    fn name(&self) -> &str;

    /// Produce events until `running` is cleared or the source is exhausted.
    fn run(
        &mut self,
        emit: &mut dyn FnMut(DeviceEvent),
        running: &AtomicBool,
    ) -> Result<(), DeviceError>;
}

/// Build the adapter selected in config.
pub fn from_config(config: &DeviceConfig) -> Result<Box<dyn DeviceAdapter>, DeviceError> {
    match config.kind {
        DeviceKind::Simulated => Ok(Box::new(SimulatedArmband::new(
            config.rate_hz,
            config.seed,
        ))),
        DeviceKind::Replay => {
            let path = config.replay_path.as_ref().ok_or_else(|| DeviceError::Malformed {
                line: 0,
                message: "replay device needs a replay_path".to_string(),
            })?;
            Ok(Box::new(ReplayArmband::open(
                path,
                config.rate_hz,
                config.replay_loop,
            )?))
        }
    }
}

/// Fixed-rate tick source. A rate of zero never waits.
#[derive(Debug)]
pub(crate) struct Pacer {
    period: Option<Duration>,
    next: Instant,
}

impl Pacer {
    pub(crate) fn new(rate_hz: u32) -> Self {
        let period = (rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(rate_hz)));
        Self {
            period,
            next: Instant::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Sleep until the next tick.
    pub(crate) fn wait(&mut self) {
        let Some(period) = self.period else {
            return;
        };

        self.next += period;
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
        } else if now - self.next > Duration::from_secs(1) {
            // fell far behind (suspended host); don't burst to catch up
            self.next = now;
        }
    }
}
