//! Bridge configuration
//!
//! Channel counts and buffer sizes are fixed before the bridge starts;
//! nothing here is renegotiated while audio is running.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{BridgeError, BridgeResult, Direction};

/// Maximum number of channels per direction
pub const MAX_CHANNELS: usize = 16;

/// Default ring capacity in frames (a little over half a second at 48kHz)
pub const DEFAULT_RING_FRAMES: usize = 30_000;

/// Upper bound for callback periods when the host cannot report one
pub const MAX_PERIOD_FRAMES: usize = 8192;

/// What the real-time side plays when the output ring runs dry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnderrunFill {
    /// Zero the missing frames
    #[default]
    Silence,
    /// Repeat the last frame that was played
    HoldLast,
}

/// Static configuration of an [`AudioBridge`](super::AudioBridge)
///
/// Serialized as part of the application settings. Fields use
/// `#[serde(default)]` so partial settings files still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Channels captured from the host
    pub input_channels: usize,
    /// Channels played to the host
    pub output_channels: usize,
    /// Input ring capacity in frames
    pub input_capacity_frames: usize,
    /// Output ring capacity in frames
    pub output_capacity_frames: usize,
    /// Whether `read_frames` waits until the full request is available
    pub blocking_read: bool,
    /// Whether `write_frames` waits until the full request fits
    pub blocking_write: bool,
    /// Poll interval for blocking transfers, in microseconds
    pub blocking_nap_us: u64,
    /// Preferred callback period in frames (the host may ignore it)
    pub period_frames: usize,
    /// Fill policy for output underruns
    pub underrun_fill: UnderrunFill,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_channels: 1,
            output_channels: 1,
            input_capacity_frames: DEFAULT_RING_FRAMES,
            output_capacity_frames: DEFAULT_RING_FRAMES,
            blocking_read: true,
            blocking_write: true,
            blocking_nap_us: 500,
            period_frames: 512,
            underrun_fill: UnderrunFill::Silence,
        }
    }
}

impl BridgeConfig {
    /// Check channel counts and capacities
    pub fn validate(&self) -> BridgeResult<()> {
        validate_channels(self.input_channels, self.output_channels)?;
        for (label, frames) in [
            ("in", self.input_capacity_frames),
            ("out", self.output_capacity_frames),
        ] {
            if frames == 0 {
                return Err(BridgeError::InvalidCapacity {
                    label: label.to_string(),
                    capacity: 0,
                });
            }
        }
        Ok(())
    }

    pub fn blocking_nap(&self) -> Duration {
        Duration::from_micros(self.blocking_nap_us)
    }
}

/// Check a channel layout against [`MAX_CHANNELS`]
pub fn validate_channels(inputs: usize, outputs: usize) -> BridgeResult<()> {
    for (direction, requested) in [(Direction::Input, inputs), (Direction::Output, outputs)] {
        if requested > MAX_CHANNELS {
            return Err(BridgeError::TooManyChannels {
                direction,
                requested,
                max: MAX_CHANNELS,
            });
        }
    }
    if inputs == 0 && outputs == 0 {
        return Err(BridgeError::NoChannels);
    }
    Ok(())
}
