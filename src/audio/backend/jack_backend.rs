//! Native JACK backend for Linux
//!
//! Registers one JACK port per bridge channel (`input_1..`, `output_1..`).
//! JACK hands the process callback one non-interleaved buffer per port,
//! which maps directly onto [`RealtimeProcessor::on_audio_ready`].
//!
//! The client never starts a JACK server on its own; when none is running,
//! [`AudioBackend::connect`] fails with [`BridgeError::BackendUnavailable`].

use jack::{AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, Port, ProcessScope};

use super::{AudioBackend, AudioSession, ChannelLayout, HostParams};
use crate::audio::config::MAX_CHANNELS;
use crate::audio::error::{BridgeError, BridgeResult};
use crate::audio::processor::{RealtimeProcessor, ShutdownSignal};

/// Backend connecting to a running JACK server
#[derive(Default)]
pub struct JackBackend {
    client: Option<Client>,
    inputs: Vec<Port<AudioIn>>,
    outputs: Vec<Port<AudioOut>>,
}

impl JackBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for JackBackend {
    fn name(&self) -> &'static str {
        "jack"
    }

    fn connect(&mut self, client_label: &str, layout: ChannelLayout) -> BridgeResult<HostParams> {
        let (client, status) = Client::new(client_label, ClientOptions::NO_START_SERVER)
            .map_err(|e| {
                BridgeError::BackendUnavailable(format!("JACK server not running? ({})", e))
            })?;
        log::debug!("JACK client status: {:?}", status);

        for i in 0..layout.inputs {
            let port = client
                .register_port(&format!("input_{}", i + 1), AudioIn::default())
                .map_err(|e| BridgeError::PortRegistration(e.to_string()))?;
            self.inputs.push(port);
        }
        for i in 0..layout.outputs {
            let port = client
                .register_port(&format!("output_{}", i + 1), AudioOut::default())
                .map_err(|e| BridgeError::PortRegistration(e.to_string()))?;
            self.outputs.push(port);
        }

        let params = HostParams {
            sample_rate: client.sample_rate() as u32,
            frames_per_period: client.buffer_size() as usize,
        };
        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client.name(),
            params.sample_rate,
            params.frames_per_period,
            params.latency_ms()
        );

        self.client = Some(client);
        Ok(params)
    }

    fn activate(
        self,
        processor: RealtimeProcessor,
        signal: ShutdownSignal,
    ) -> BridgeResult<Box<dyn AudioSession>> {
        let client = self
            .client
            .ok_or_else(|| BridgeError::BackendUnavailable("JACK client not connected".to_string()))?;

        let handler = JackProcessor {
            inputs: self.inputs,
            outputs: self.outputs,
            processor,
        };
        let async_client = client
            .activate_async(JackNotifications { signal }, handler)
            .map_err(|e| BridgeError::StreamPlay(format!("Failed to activate JACK client: {}", e)))?;

        log::info!("JACK client activated");
        Ok(Box::new(JackSession { async_client }))
    }
}

/// JACK process handler; owns the ports and the real-time side of the bridge
struct JackProcessor {
    inputs: Vec<Port<AudioIn>>,
    outputs: Vec<Port<AudioOut>>,
    processor: RealtimeProcessor,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let frames = ps.n_frames() as usize;
        let (n_in, n_out) = (self.inputs.len(), self.outputs.len());

        // Fixed-size tables keep the callback allocation-free.
        let mut inputs: [&[f32]; MAX_CHANNELS] = [Default::default(); MAX_CHANNELS];
        for (slot, port) in inputs.iter_mut().zip(&self.inputs) {
            *slot = port.as_slice(ps);
        }
        let mut outputs: [&mut [f32]; MAX_CHANNELS] = std::array::from_fn(|_| Default::default());
        for (slot, port) in outputs.iter_mut().zip(self.outputs.iter_mut()) {
            *slot = port.as_mut_slice(ps);
        }

        self.processor
            .on_audio_ready(frames, &inputs[..n_in], &mut outputs[..n_out]);
        Control::Continue
    }
}

/// JACK notification handler
struct JackNotifications {
    signal: ShutdownSignal,
}

impl jack::NotificationHandler for JackNotifications {
    unsafe fn shutdown(&mut self, status: ClientStatus, reason: &str) {
        if self.signal.trigger() {
            log::error!("JACK server shut down ({:?}): {}", status, reason);
        }
    }

    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}

/// Keeps the JACK client active
struct JackSession {
    async_client: jack::AsyncClient<JackNotifications, JackProcessor>,
}

impl AudioSession for JackSession {
    fn deactivate(self: Box<Self>) -> BridgeResult<()> {
        self.async_client
            .deactivate()
            .map(|_| log::info!("JACK client deactivated"))
            .map_err(|e| BridgeError::Deactivate(e.to_string()))
    }
}
