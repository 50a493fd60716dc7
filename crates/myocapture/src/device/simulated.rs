use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::{DeviceAdapter, DeviceEvent, Pacer};
use crate::error::DeviceError;
use crate::types::{Sample, CHANNEL_COUNT};

const NAME: &str = "simulated-armband";

/// Timestamp step used when running unpaced.
const UNPACED_STEP_US: u64 = 5_000;

/// Synthetic armband: noisy baseline with occasional contraction bursts.
///
/// Values stay inside the armband's `-128..=127` range and are fully
/// determined by the seed.
#[derive(Debug)]
pub struct SimulatedArmband {
    rate_hz: u32,
    rng: StdRng,
    limit: Option<u64>,
    /// Remaining burst ticks per channel.
    bursts: [u32; CHANNEL_COUNT],
}

impl SimulatedArmband {
    pub fn new(rate_hz: u32, seed: u64) -> Self {
        Self {
            rate_hz,
            rng: StdRng::seed_from_u64(seed),
            limit: None,
            bursts: [0; CHANNEL_COUNT],
        }
    }

    /// Stop after `samples` samples instead of running until told to.
    pub fn with_limit(mut self, samples: u64) -> Self {
        self.limit = Some(samples);
        self
    }

    fn step_us(&self) -> u64 {
        if self.rate_hz == 0 {
            UNPACED_STEP_US
        } else {
            1_000_000 / u64::from(self.rate_hz)
        }
    }

    fn next_channels(&mut self) -> [i16; CHANNEL_COUNT] {
        let mut channels = [0i16; CHANNEL_COUNT];
        for (i, value) in channels.iter_mut().enumerate() {
            if self.bursts[i] == 0 && self.rng.gen_bool(0.002) {
                self.bursts[i] = self.rng.gen_range(40..200);
            }

            let amplitude = if self.bursts[i] > 0 {
                self.bursts[i] -= 1;
                90.0
            } else {
                6.0
            };

            // sum of uniforms, close enough to gaussian for a test signal
            let noise: f64 = (0..4).map(|_| self.rng.gen_range(-1.0..1.0)).sum::<f64>() / 2.0;
            *value = (noise * amplitude).round().clamp(-128.0, 127.0) as i16;
        }
        channels
    }
}

impl DeviceAdapter for SimulatedArmband {
    fn name(&self) -> &str {
        NAME
    }

    fn run(
        &mut self,
        emit: &mut dyn FnMut(DeviceEvent),
        running: &AtomicBool,
    ) -> Result<(), DeviceError> {
        emit(DeviceEvent::Connected {
            device: NAME.to_string(),
        });

        let step = self.step_us();
        let mut pacer = Pacer::new(self.rate_hz);
        let mut emitted = 0u64;

        while running.load(Ordering::SeqCst) {
            if self.limit.is_some_and(|limit| emitted >= limit) {
                break;
            }

            let channels = self.next_channels();
            emit(DeviceEvent::Sample(Sample::new(emitted * step, channels)));
            emitted += 1;
            pacer.wait();
        }

        debug!(samples = emitted, "simulated armband stopped");
        emit(DeviceEvent::Disconnected {
            reason: "stopped".to_string(),
        });
        Ok(())
    }
}
