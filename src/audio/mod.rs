//! Audio module - moves interleaved frames between an audio host and a worker
//!
//! This module provides:
//! - Lock-free single-producer/single-consumer float ring buffer
//! - Real-time processor that (de)interleaves host channel buffers
//! - Audio bridge owning both rings and the host session
//! - Host backends (cpal, JACK, offline)

pub mod backend;
mod bridge;
mod buffer;
mod config;
mod error;
mod processor;

// Re-export public types
pub use backend::{AudioBackend, AudioSession, ChannelLayout, CpalBackend, HostParams};
pub use backend::{OfflineBackend, OfflineDriver};
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use backend::JackBackend;
pub use bridge::{AudioBridge, FrameStreams};
pub use buffer::{RingBuffer, RingCloser, RingConsumer, RingProducer, DEFAULT_BLOCKING_NAP};
pub use config::{
    validate_channels, BridgeConfig, UnderrunFill, DEFAULT_RING_FRAMES, MAX_CHANNELS,
    MAX_PERIOD_FRAMES,
};
pub use error::{BridgeError, BridgeResult, Direction};
pub use processor::{
    CaptureStage, PlaybackStage, RealtimeProcessor, ShutdownSignal, XrunSnapshot, XrunStats,
};
