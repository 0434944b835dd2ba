//! cpal backend - default platform input/output devices
//!
//! cpal delivers capture and playback on separate callbacks, possibly on
//! separate threads, with interleaved buffers in the device's own channel
//! count and sample format. The processor is therefore split into its
//! capture and playback stages, one per stream. Each ring still has exactly
//! one producer and one consumer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, SampleFormat, SizedSample, Stream, StreamConfig, StreamError,
    SupportedBufferSize, SupportedStreamConfig,
};

use super::{AudioBackend, AudioSession, ChannelLayout, HostParams};
use crate::audio::config::MAX_PERIOD_FRAMES;
use crate::audio::error::{BridgeError, BridgeResult, Direction};
use crate::audio::processor::{CaptureStage, PlaybackStage, RealtimeProcessor, ShutdownSignal};

/// A device plus the stream configuration chosen for it
struct DeviceSetup {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    fixed_period: bool,
}

/// Backend using cpal's default host
pub struct CpalBackend {
    period_frames: usize,
    input: Option<DeviceSetup>,
    output: Option<DeviceSetup>,
}

impl CpalBackend {
    /// # Arguments
    /// * `period_frames` - Preferred callback period; used only when the
    ///   device reports a buffer size range that contains it
    pub fn new(period_frames: usize) -> Self {
        Self {
            period_frames,
            input: None,
            output: None,
        }
    }

    fn setup(&self, device: cpal::Device, supported: SupportedStreamConfig) -> DeviceSetup {
        let requested = self.period_frames as u32;
        let buffer_size = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&requested) => {
                BufferSize::Fixed(requested)
            }
            _ => BufferSize::Default,
        };
        let fixed_period = matches!(buffer_size, BufferSize::Fixed(_));

        DeviceSetup {
            config: StreamConfig {
                channels: supported.channels(),
                sample_rate: supported.sample_rate(),
                buffer_size,
            },
            sample_format: supported.sample_format(),
            device,
            fixed_period,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn connect(&mut self, client_label: &str, layout: ChannelLayout) -> BridgeResult<HostParams> {
        let host = cpal::default_host();
        log::info!("Connecting '{}' to audio host {:?}", client_label, host.id());

        if layout.inputs > 0 {
            let device = host
                .default_input_device()
                .ok_or_else(|| BridgeError::BackendUnavailable("No input device found".to_string()))?;
            let supported = device.default_input_config().map_err(|e| {
                BridgeError::BackendUnavailable(format!("Failed to get input config: {}", e))
            })?;
            log::info!(
                "Using input device: {} ({:?})",
                device.name().unwrap_or_else(|_| "Unknown".to_string()),
                supported
            );
            self.input = Some(self.setup(device, supported));
        }

        if layout.outputs > 0 {
            let device = host
                .default_output_device()
                .ok_or_else(|| BridgeError::BackendUnavailable("No output device found".to_string()))?;
            let supported = device.default_output_config().map_err(|e| {
                BridgeError::BackendUnavailable(format!("Failed to get output config: {}", e))
            })?;
            log::info!(
                "Using output device: {} ({:?})",
                device.name().unwrap_or_else(|_| "Unknown".to_string()),
                supported
            );
            self.output = Some(self.setup(device, supported));
        }

        let sample_rate = match (&self.input, &self.output) {
            (Some(input), Some(output)) => {
                let (input, output) = (input.config.sample_rate.0, output.config.sample_rate.0);
                if input != output {
                    return Err(BridgeError::SampleRateMismatch { input, output });
                }
                output
            }
            (Some(setup), None) | (None, Some(setup)) => setup.config.sample_rate.0,
            (None, None) => {
                return Err(BridgeError::BackendUnavailable(
                    "No channels requested from the audio host".to_string(),
                ))
            }
        };

        let all_fixed = self.input.iter().chain(&self.output).all(|s| s.fixed_period);
        let frames_per_period = if all_fixed {
            self.period_frames
        } else {
            MAX_PERIOD_FRAMES
        };

        Ok(HostParams {
            sample_rate,
            frames_per_period,
        })
    }

    fn activate(
        self,
        processor: RealtimeProcessor,
        signal: ShutdownSignal,
    ) -> BridgeResult<Box<dyn AudioSession>> {
        let (capture, playback) = processor.into_stages();

        let input = match &self.input {
            Some(setup) => Some(build_input(setup, capture, signal.clone())?),
            None => None,
        };
        let output = match &self.output {
            Some(setup) => Some(build_output(setup, playback, signal)?),
            None => None,
        };

        for stream in input.iter().chain(&output) {
            stream
                .play()
                .map_err(|e| BridgeError::StreamPlay(e.to_string()))?;
        }
        log::info!("cpal streams started");

        Ok(Box::new(CpalSession { input, output }))
    }
}

fn build_input(
    setup: &DeviceSetup,
    stage: CaptureStage,
    signal: ShutdownSignal,
) -> BridgeResult<Stream> {
    match setup.sample_format {
        SampleFormat::F32 => input_stream::<f32>(setup, stage, signal),
        SampleFormat::I16 => input_stream::<i16>(setup, stage, signal),
        SampleFormat::U16 => input_stream::<u16>(setup, stage, signal),
        format => Err(BridgeError::UnsupportedFormat(format!("{:?}", format))),
    }
}

fn build_output(
    setup: &DeviceSetup,
    stage: PlaybackStage,
    signal: ShutdownSignal,
) -> BridgeResult<Stream> {
    match setup.sample_format {
        SampleFormat::F32 => output_stream::<f32>(setup, stage, signal),
        SampleFormat::I16 => output_stream::<i16>(setup, stage, signal),
        SampleFormat::U16 => output_stream::<u16>(setup, stage, signal),
        format => Err(BridgeError::UnsupportedFormat(format!("{:?}", format))),
    }
}

fn input_stream<T>(
    setup: &DeviceSetup,
    mut stage: CaptureStage,
    signal: ShutdownSignal,
) -> BridgeResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = setup.config.channels as usize;
    setup
        .device
        .build_input_stream(
            &setup.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                stage.capture_interleaved(data, channels);
            },
            stream_error_handler(Direction::Input, signal),
            None,
        )
        .map_err(|e| BridgeError::StreamBuild(e.to_string()))
}

fn output_stream<T>(
    setup: &DeviceSetup,
    mut stage: PlaybackStage,
    signal: ShutdownSignal,
) -> BridgeResult<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = setup.config.channels as usize;
    setup
        .device
        .build_output_stream(
            &setup.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                stage.render_interleaved(data, channels);
            },
            stream_error_handler(Direction::Output, signal),
            None,
        )
        .map_err(|e| BridgeError::StreamBuild(e.to_string()))
}

/// A lost device ends the session; other stream errors are only logged
fn stream_error_handler(
    direction: Direction,
    signal: ShutdownSignal,
) -> impl FnMut(StreamError) + Send + 'static {
    move |err| match err {
        StreamError::DeviceNotAvailable => {
            if signal.trigger() {
                log::error!("Audio {} device disappeared, shutting down", direction);
            }
        }
        other => log::error!("Audio {} stream error: {}", direction, other),
    }
}

/// Keeps the cpal streams alive. Drop this to stop audio.
struct CpalSession {
    input: Option<Stream>,
    output: Option<Stream>,
}

impl AudioSession for CpalSession {
    fn deactivate(self: Box<Self>) -> BridgeResult<()> {
        let mut result = Ok(());
        for stream in self.input.iter().chain(&self.output) {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause stream: {}", e);
                result = Err(BridgeError::Deactivate(e.to_string()));
            }
        }
        log::info!("cpal streams stopped");
        result
    }
}
