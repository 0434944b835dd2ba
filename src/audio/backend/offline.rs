//! Host-less backend driven by the caller
//!
//! Useful wherever there is no audio server: tests, CI and dry runs. The
//! [`OfflineDriver`] plays the role of the host's real-time thread, either
//! one period at a time or from a paced clock thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{AudioBackend, AudioSession, ChannelLayout, HostParams};
use crate::audio::error::{BridgeError, BridgeResult};
use crate::audio::processor::{RealtimeProcessor, ShutdownSignal};

/// Backend half: handed to [`AudioBridge::initialize`](crate::audio::AudioBridge::initialize)
pub struct OfflineBackend {
    params: HostParams,
    activation: Sender<(RealtimeProcessor, ShutdownSignal)>,
    active: Arc<AtomicBool>,
}

/// Host half: invokes the callback
pub struct OfflineDriver {
    params: HostParams,
    activation: Receiver<(RealtimeProcessor, ShutdownSignal)>,
    processor: Option<RealtimeProcessor>,
    signal: Option<ShutdownSignal>,
    active: Arc<AtomicBool>,
}

impl OfflineBackend {
    /// Create a connected backend/driver pair
    ///
    /// # Arguments
    /// * `sample_rate` - Reported to the bridge; also paces [`OfflineDriver::spawn_clock`]
    /// * `frames_per_period` - Nominal callback period
    pub fn new(sample_rate: u32, frames_per_period: usize) -> (Self, OfflineDriver) {
        let params = HostParams {
            sample_rate,
            frames_per_period,
        };
        let (tx, rx) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(false));
        (
            Self {
                params,
                activation: tx,
                active: Arc::clone(&active),
            },
            OfflineDriver {
                params,
                activation: rx,
                processor: None,
                signal: None,
                active,
            },
        )
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn connect(&mut self, client_label: &str, layout: ChannelLayout) -> BridgeResult<HostParams> {
        if self.params.sample_rate == 0 || self.params.frames_per_period == 0 {
            return Err(BridgeError::BackendUnavailable(format!(
                "offline host for '{}' has no clock ({} Hz, {} frames)",
                client_label, self.params.sample_rate, self.params.frames_per_period
            )));
        }
        log::info!(
            "Offline host '{}': {} in, {} out, {} Hz, {} frames per period",
            client_label,
            layout.inputs,
            layout.outputs,
            self.params.sample_rate,
            self.params.frames_per_period
        );
        Ok(self.params)
    }

    fn activate(
        self,
        processor: RealtimeProcessor,
        signal: ShutdownSignal,
    ) -> BridgeResult<Box<dyn AudioSession>> {
        self.active.store(true, Ordering::Release);
        self.activation
            .send((processor, signal))
            .map_err(|_| BridgeError::StreamPlay("offline driver was dropped".to_string()))?;
        Ok(Box::new(OfflineSession {
            active: self.active,
        }))
    }
}

struct OfflineSession {
    active: Arc<AtomicBool>,
}

impl AudioSession for OfflineSession {
    fn deactivate(self: Box<Self>) -> BridgeResult<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for OfflineSession {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

impl OfflineDriver {
    pub fn params(&self) -> HostParams {
        self.params
    }

    /// Whether the bridge has activated this host and not yet stopped it
    pub fn is_active(&mut self) -> bool {
        self.poll_activation();
        self.processor.is_some() && self.active.load(Ordering::Acquire)
    }

    /// Channel layout of the activated processor
    pub fn layout(&mut self) -> Option<ChannelLayout> {
        self.poll_activation();
        self.processor.as_ref().map(|p| ChannelLayout {
            inputs: p.input_channels(),
            outputs: p.output_channels(),
        })
    }

    /// Run one callback period of `frames` frames
    ///
    /// Returns `false` and silences `outputs` when the host is not active.
    pub fn run_period(&mut self, frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
        if !self.is_active() {
            for output in outputs.iter_mut() {
                output.fill(0.0);
            }
            return false;
        }
        match self.processor.as_mut() {
            Some(processor) => {
                processor.on_audio_ready(frames, inputs, outputs);
                true
            }
            None => false,
        }
    }

    /// Simulate the audio server going away
    pub fn host_shutdown(&mut self) {
        self.poll_activation();
        if let Some(signal) = self.signal.take() {
            if signal.trigger() {
                log::warn!("Offline host shut down");
            }
        }
        self.processor = None;
    }

    /// Drive the callback from a background thread at the nominal rate
    ///
    /// Before every period `host` receives the input buffers to fill and the
    /// output buffers rendered by the previous period. The thread exits once
    /// the bridge deactivates the host or the host is shut down.
    pub fn spawn_clock<F>(mut self, mut host: F) -> io::Result<JoinHandle<()>>
    where
        F: FnMut(&mut [Vec<f32>], &[Vec<f32>]) + Send + 'static,
    {
        let frames = self.params.frames_per_period;
        let period = Duration::from_secs_f64(frames as f64 / self.params.sample_rate as f64);

        thread::Builder::new().name("offline-clock".to_string()).spawn(move || {
            let layout = match self.wait_for_activation() {
                Some(layout) => layout,
                None => return,
            };
            let mut inputs = vec![vec![0.0f32; frames]; layout.inputs];
            let mut outputs = vec![vec![0.0f32; frames]; layout.outputs];
            let mut next = Instant::now();

            loop {
                host(&mut inputs, &outputs);
                let ins: Vec<&[f32]> = inputs.iter().map(Vec::as_slice).collect();
                let mut outs: Vec<&mut [f32]> = outputs.iter_mut().map(Vec::as_mut_slice).collect();
                if !self.run_period(frames, &ins, &mut outs) {
                    break;
                }

                next += period;
                if let Some(wait) = next.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
            log::debug!("Offline clock stopped");
        })
    }

    fn wait_for_activation(&mut self) -> Option<ChannelLayout> {
        if self.processor.is_none() {
            let (processor, signal) = self.activation.recv().ok()?;
            self.processor = Some(processor);
            self.signal = Some(signal);
        }
        self.layout()
    }

    fn poll_activation(&mut self) {
        if self.processor.is_some() {
            return;
        }
        match self.activation.try_recv() {
            Ok((processor, signal)) => {
                self.processor = Some(processor);
                self.signal = Some(signal);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
    }
}
