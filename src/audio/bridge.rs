//! Audio bridge - connects a real-time host callback to a worker thread
//!
//! The bridge owns two ring buffers, one per direction. The host side
//! ([`RealtimeProcessor`]) interleaves captured channels into the input ring
//! and spreads the output ring back over the playback channels. The worker
//! side ([`FrameStreams`]) reads and writes flat interleaved frames at its own
//! pace, blocking by default so it naturally follows the host's clock.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──► configure* ──► initialize ──► read/write frames ──► shutdown
//! ```
//!
//! A host-initiated shutdown (device lost, server gone) triggers the
//! [`ShutdownSignal`]: blocking worker calls return 0 and
//! [`AudioBridge::is_shutting_down`] becomes true.

use std::sync::Arc;

use super::backend::{AudioBackend, AudioSession, ChannelLayout, HostParams};
use super::buffer::{RingBuffer, RingConsumer, RingProducer};
use super::config::{validate_channels, BridgeConfig};
use super::error::{BridgeError, BridgeResult};
use super::processor::{
    CaptureStage, PlaybackStage, RealtimeProcessor, ShutdownSignal, XrunSnapshot, XrunStats,
};

/// Worker-facing ends of the two rings
///
/// `Send`, so a worker thread can borrow it while the thread that owns the
/// bridge (and possibly a non-`Send` host session) stays put.
///
/// Xruns recorded by the real-time side are logged here, at the start of the
/// next [`read_frames`](Self::read_frames) or
/// [`write_frames`](Self::write_frames). A worker that stalls or exits logs
/// nothing further; [`xruns`](Self::xruns) and the bridge's shutdown summary
/// still carry the totals.
pub struct FrameStreams {
    input: RingConsumer,
    output: RingProducer,
    input_channels: usize,
    output_channels: usize,
    stats: Arc<XrunStats>,
    reported: XrunSnapshot,
    signal: ShutdownSignal,
}

impl FrameStreams {
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Read up to `frames` interleaved frames into `buffer`
    ///
    /// `frames` is clamped to what `buffer` can hold. In blocking mode this
    /// returns only once all frames arrived, or early with a smaller count
    /// if the bridge shuts down. In non-blocking mode it returns whatever
    /// whole frames are available.
    pub fn read_frames(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        self.report_xruns();
        let channels = self.input_channels;
        if channels == 0 {
            return 0;
        }
        let frames = frames.min(buffer.len() / channels);

        if !self.input.is_blocking() {
            let count = frames.min(self.input.available_for_read() / channels);
            return self.input.pop(&mut buffer[..count * channels]) / channels;
        }

        // Requests larger than the ring are served in ring-sized pieces.
        let max_chunk = self.input.capacity() / channels;
        let mut done = 0;
        while done < frames {
            let chunk = (frames - done).min(max_chunk);
            if self.input.pop(&mut buffer[done * channels..(done + chunk) * channels]) == 0 {
                break;
            }
            done += chunk;
        }
        done
    }

    /// Write up to `frames` interleaved frames from `buffer`
    ///
    /// Mirrors [`read_frames`](Self::read_frames).
    pub fn write_frames(&mut self, buffer: &[f32], frames: usize) -> usize {
        self.report_xruns();
        let channels = self.output_channels;
        if channels == 0 {
            return 0;
        }
        let frames = frames.min(buffer.len() / channels);

        if !self.output.is_blocking() {
            let count = frames.min(self.output.available_for_write() / channels);
            return self.output.push(&buffer[..count * channels]) / channels;
        }

        let max_chunk = self.output.capacity() / channels;
        let mut done = 0;
        while done < frames {
            let chunk = (frames - done).min(max_chunk);
            if self.output.push(&buffer[done * channels..(done + chunk) * channels]) == 0 {
                break;
            }
            done += chunk;
        }
        done
    }

    /// Frames waiting in the input ring (a racy hint)
    pub fn frames_available_for_read(&self) -> usize {
        match self.input_channels {
            0 => 0,
            channels => self.input.available_for_read() / channels,
        }
    }

    /// Frames of free space in the output ring (a racy hint)
    pub fn frames_available_for_write(&self) -> usize {
        match self.output_channels {
            0 => 0,
            channels => self.output.available_for_write() / channels,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.signal.is_triggered()
    }

    /// Totals so far, whether or not they have been logged yet
    pub fn xruns(&self) -> XrunSnapshot {
        self.stats.snapshot()
    }

    /// Log xruns recorded by the real-time side since the last call
    fn report_xruns(&mut self) {
        let now = self.stats.snapshot();
        if now.dropped_frames > self.reported.dropped_frames {
            log::warn!(
                "Input ring '{}' full: {} frames dropped",
                self.input.label(),
                now.dropped_frames - self.reported.dropped_frames
            );
        }
        if now.missing_frames > self.reported.missing_frames {
            log::warn!(
                "Output ring '{}' empty: {} frames filled",
                self.output.label(),
                now.missing_frames - self.reported.missing_frames
            );
        }
        self.reported = now;
    }
}

struct Running {
    session: Box<dyn AudioSession>,
    streams: FrameStreams,
    host: HostParams,
    signal: ShutdownSignal,
}

enum BridgeState {
    Configuring,
    Running(Box<Running>),
    Stopped(XrunSnapshot),
}

/// Owner of both ring buffers and of the host session
pub struct AudioBridge {
    config: BridgeConfig,
    state: BridgeState,
}

impl AudioBridge {
    /// Create an unstarted bridge
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: BridgeState::Configuring,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Set the channel counts; only allowed before [`initialize`](Self::initialize)
    pub fn configure(&mut self, input_channels: usize, output_channels: usize) -> BridgeResult<()> {
        if !matches!(self.state, BridgeState::Configuring) {
            return Err(BridgeError::AlreadyInitialized);
        }
        validate_channels(input_channels, output_channels)?;
        self.config.input_channels = input_channels;
        self.config.output_channels = output_channels;
        Ok(())
    }

    pub fn input_channels(&self) -> usize {
        self.config.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.config.output_channels
    }

    /// Connect to the host, allocate the rings and start the callback
    ///
    /// Fails without retrying if the host is unavailable; the bridge then
    /// stays unstarted and can be reconfigured.
    pub fn initialize<B: AudioBackend>(&mut self, client_label: &str, mut backend: B) -> BridgeResult<()> {
        if !matches!(self.state, BridgeState::Configuring) {
            return Err(BridgeError::AlreadyInitialized);
        }
        let config = &self.config;
        let (inputs, outputs) = (config.input_channels, config.output_channels);

        log::info!(
            "Initializing bridge '{}' on {} backend ({} in, {} out)",
            client_label,
            backend.name(),
            inputs,
            outputs
        );
        let host = backend.connect(client_label, ChannelLayout { inputs, outputs })?;

        let (in_tx, mut in_rx) =
            RingBuffer::new(ring_samples("in", config.input_capacity_frames, inputs)?, "in")?.split();
        let (mut out_tx, out_rx) =
            RingBuffer::new(ring_samples("out", config.output_capacity_frames, outputs)?, "out")?.split();

        in_rx.set_blocking(config.blocking_read);
        in_rx.set_blocking_nap(config.blocking_nap());
        out_tx.set_blocking(config.blocking_write);
        out_tx.set_blocking_nap(config.blocking_nap());

        for (label, frames) in [
            ("in", config.input_capacity_frames),
            ("out", config.output_capacity_frames),
        ] {
            if frames < host.frames_per_period {
                log::warn!(
                    "Ring '{}' holds {} frames, less than one host period of {}",
                    label,
                    frames,
                    host.frames_per_period
                );
            }
        }

        let stats = Arc::new(XrunStats::default());
        let signal = ShutdownSignal::new(in_tx.closer(), out_tx.closer());
        let processor = RealtimeProcessor::new(
            CaptureStage::new(inputs, in_tx, host.frames_per_period, Arc::clone(&stats)),
            PlaybackStage::new(
                outputs,
                out_rx,
                host.frames_per_period,
                config.underrun_fill,
                Arc::clone(&stats),
            ),
        );

        let session = backend.activate(processor, signal.clone())?;
        log::info!(
            "Bridge running at {} Hz, {} frames per period ({:.1}ms)",
            host.sample_rate,
            host.frames_per_period,
            host.latency_ms()
        );

        self.state = BridgeState::Running(Box::new(Running {
            session,
            streams: FrameStreams {
                input: in_rx,
                output: out_tx,
                input_channels: inputs,
                output_channels: outputs,
                stats,
                reported: XrunSnapshot::default(),
                signal: signal.clone(),
            },
            host,
            signal,
        }));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, BridgeState::Running(_))
    }

    /// Negotiated host parameters, once initialized
    pub fn host_params(&self) -> Option<HostParams> {
        match &self.state {
            BridgeState::Running(running) => Some(running.host),
            _ => None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.host_params().map(|host| host.sample_rate)
    }

    pub fn frames_per_period(&self) -> Option<usize> {
        self.host_params().map(|host| host.frames_per_period)
    }

    /// See [`FrameStreams::read_frames`]. Returns 0 unless running.
    pub fn read_frames(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        self.worker_streams()
            .map_or(0, |streams| streams.read_frames(buffer, frames))
    }

    /// See [`FrameStreams::write_frames`]. Returns 0 unless running.
    pub fn write_frames(&mut self, buffer: &[f32], frames: usize) -> usize {
        self.worker_streams()
            .map_or(0, |streams| streams.write_frames(buffer, frames))
    }

    /// Borrow the worker-facing streams, e.g. to move them into a scoped thread
    pub fn worker_streams(&mut self) -> Option<&mut FrameStreams> {
        match &mut self.state {
            BridgeState::Running(running) => Some(&mut running.streams),
            _ => None,
        }
    }

    /// A handle that stops both directions from any thread
    pub fn shutdown_signal(&self) -> Option<ShutdownSignal> {
        match &self.state {
            BridgeState::Running(running) => Some(running.signal.clone()),
            _ => None,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        match &self.state {
            BridgeState::Configuring => false,
            BridgeState::Running(running) => running.signal.is_triggered(),
            BridgeState::Stopped(_) => true,
        }
    }

    pub fn xruns(&self) -> XrunSnapshot {
        match &self.state {
            BridgeState::Configuring => XrunSnapshot::default(),
            BridgeState::Running(running) => running.streams.xruns(),
            BridgeState::Stopped(totals) => *totals,
        }
    }

    /// Stop the callback and release the host
    ///
    /// Calling this on a bridge that is not running does nothing.
    pub fn shutdown(&mut self) -> BridgeResult<()> {
        let running = match std::mem::replace(&mut self.state, BridgeState::Configuring) {
            BridgeState::Running(running) => running,
            other => {
                log::debug!("Bridge shutdown requested while not running");
                self.state = other;
                return Ok(());
            }
        };

        let Running {
            session,
            streams,
            signal,
            ..
        } = *running;
        signal.trigger();
        let totals = streams.xruns();
        self.state = BridgeState::Stopped(totals);

        log::info!(
            "Bridge stopped ({} overruns / {} frames dropped, {} underruns / {} frames filled)",
            totals.overruns,
            totals.dropped_frames,
            totals.underruns,
            totals.missing_frames
        );
        session.deactivate()
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Bridge shutdown failed: {}", e);
        }
    }
}

/// Ring size in samples; a direction without channels gets a single sample
fn ring_samples(label: &str, frames: usize, channels: usize) -> BridgeResult<usize> {
    if channels == 0 {
        return Ok(1);
    }
    frames
        .checked_mul(channels)
        .ok_or_else(|| BridgeError::InvalidCapacity {
            label: label.to_string(),
            capacity: frames,
        })
}
