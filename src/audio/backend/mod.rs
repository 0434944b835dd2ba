//! Audio host backends
//!
//! A backend connects the bridge to an external audio subsystem:
//! - **cpal**: default input/output devices of the platform host
//! - **JACK** (Linux, `jack-backend` feature): one JACK port per channel
//! - **offline**: no host at all, the caller drives the callback
//!
//! Starting is two-phase. [`AudioBackend::connect`] reaches the host and
//! reports the negotiated [`HostParams`], so the bridge can size its buffers.
//! [`AudioBackend::activate`] then hands over the [`RealtimeProcessor`] and
//! starts the callback.

mod cpal_backend;
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;
mod offline;

pub use cpal_backend::CpalBackend;
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::JackBackend;
pub use offline::{OfflineBackend, OfflineDriver};

use super::error::BridgeResult;
use super::processor::{RealtimeProcessor, ShutdownSignal};

/// Channel counts requested from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub inputs: usize,
    pub outputs: usize,
}

/// Parameters negotiated with the host, queried once at connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostParams {
    pub sample_rate: u32,
    /// Largest callback period the host is expected to deliver
    pub frames_per_period: usize,
}

impl HostParams {
    /// One period of latency, in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.frames_per_period as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// An external audio subsystem the bridge can attach to
pub trait AudioBackend {
    /// Short name for log messages
    fn name(&self) -> &'static str;

    /// Reach the host and register `layout.inputs + layout.outputs` channels
    fn connect(&mut self, client_label: &str, layout: ChannelLayout) -> BridgeResult<HostParams>;

    /// Start invoking `processor` from the host's real-time thread
    ///
    /// `signal` must be triggered if the host shuts down on its own.
    fn activate(
        self,
        processor: RealtimeProcessor,
        signal: ShutdownSignal,
    ) -> BridgeResult<Box<dyn AudioSession>>;
}

/// A running host connection. Dropping it also stops the callback.
pub trait AudioSession {
    /// Stop the callback and release host resources
    fn deactivate(self: Box<Self>) -> BridgeResult<()>;
}
