//! Domain types for EMG capture.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use myoconf::CHANNEL_COUNT;

/// One reading across all armband channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Device clock, microseconds for the armband.
    pub timestamp: u64,
    pub channels: [i16; CHANNEL_COUNT],
}

impl Sample {
    pub fn new(timestamp: u64, channels: [i16; CHANNEL_COUNT]) -> Self {
        Self {
            timestamp,
            channels,
        }
    }
}

/// Which channels are retained for broadcast and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask([bool; CHANNEL_COUNT]);

impl ChannelMask {
    pub fn new(flags: [bool; CHANNEL_COUNT]) -> Self {
        Self(flags)
    }

    pub fn all() -> Self {
        Self([true; CHANNEL_COUNT])
    }

    pub fn flags(&self) -> [bool; CHANNEL_COUNT] {
        self.0
    }

    pub fn is_selected(&self, channel: usize) -> bool {
        self.0.get(channel).copied().unwrap_or(false)
    }

    pub fn selected_count(&self) -> usize {
        self.0.iter().filter(|&&on| on).count()
    }

    /// Selected channel values in channel order.
    pub fn select(&self, sample: &Sample) -> Vec<i16> {
        sample
            .channels
            .iter()
            .zip(self.0)
            .filter(|(_, on)| *on)
            .map(|(v, _)| *v)
            .collect()
    }

    /// Full-width view with deselected channels blanked out.
    pub fn apply(&self, sample: &Sample) -> [Option<i16>; CHANNEL_COUNT] {
        let mut out = [None; CHANNEL_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            if self.0[i] {
                *slot = Some(sample.channels[i]);
            }
        }
        out
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for on in self.0 {
            f.write_str(if on { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Live feed payload: one per accepted sample, selected channels only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFrame {
    pub timestamp: u64,
    pub channels: Vec<i16>,
}

impl SampleFrame {
    pub fn from_sample(sample: &Sample, mask: &ChannelMask) -> Self {
        Self {
            timestamp: sample.timestamp,
            channels: mask.select(sample),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [bool; 8] = [true, false, true, false, true, true, false, true];

    fn sample() -> Sample {
        Sample::new(42, [1, 2, 3, 4, 5, 6, 7, 8])
    }

    #[test]
    fn test_select_keeps_channel_order() {
        let mask = ChannelMask::new(MASK);
        assert_eq!(mask.select(&sample()), vec![1, 3, 5, 6, 8]);
        assert_eq!(mask.selected_count(), 5);
        assert!(!mask.is_selected(1));
        assert!(!mask.is_selected(99));
    }

    #[test]
    fn test_apply_blanks_deselected() {
        let mask = ChannelMask::new(MASK);
        let applied = mask.apply(&sample());
        assert_eq!(applied[0], Some(1));
        assert_eq!(applied[1], None);
        assert_eq!(applied[7], Some(8));
    }

    #[test]
    fn test_frame_serialization() {
        let frame = SampleFrame::from_sample(&sample(), &ChannelMask::all());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["channels"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_mask_display() {
        assert_eq!(ChannelMask::new(MASK).to_string(), "10101101");
        assert_eq!(
            serde_json::to_string(&ChannelMask::all()).unwrap(),
            "[true,true,true,true,true,true,true,true]"
        );
    }
}
