//! Error types for the audio bridge

use std::fmt;

use thiserror::Error;

/// Stream direction, as seen from the audio host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Samples captured by the host and read by the worker
    Input,
    /// Samples written by the worker and played by the host
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Errors that can occur while configuring or starting the bridge
///
/// Transfer shortfalls are never errors: they are reported through
/// transfer counts and xrun counters instead.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Ring buffer capacity was zero or too large to index
    #[error("Invalid capacity {capacity} for ring buffer '{label}'")]
    InvalidCapacity { label: String, capacity: usize },

    /// More channels requested than the bridge supports
    #[error("Too many {direction} channels: requested {requested}, maximum is {max}")]
    TooManyChannels {
        direction: Direction,
        requested: usize,
        max: usize,
    },

    /// Neither inputs nor outputs were configured
    #[error("At least one input or output channel is required")]
    NoChannels,

    /// Configuration attempted after the bridge was started
    #[error("Bridge is already initialized")]
    AlreadyInitialized,

    /// The external audio subsystem could not be reached
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Registering a host port failed
    #[error("Failed to register port: {0}")]
    PortRegistration(String),

    /// Failed to build an audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Failed to start/play a stream or activate a client
    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Capture and playback devices disagree on the sample rate
    #[error("Sample rate mismatch: input={input}Hz, output={output}Hz")]
    SampleRateMismatch { input: u32, output: u32 },

    /// Tearing down the host session failed
    #[error("Failed to deactivate audio session: {0}")]
    Deactivate(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_distinguish_causes() {
        let absent = BridgeError::BackendUnavailable("JACK server not running".into());
        let config = BridgeError::TooManyChannels {
            direction: Direction::Input,
            requested: 40,
            max: 16,
        };

        assert!(absent.to_string().contains("backend unavailable"));
        assert_eq!(
            config.to_string(),
            "Too many input channels: requested 40, maximum is 16"
        );
    }
}
