//! audio-bridge - passthrough demo
//!
//! Connects the bridge to the configured audio host and runs one worker
//! thread that copies captured frames to the output with a fixed gain. With
//! the offline backend a clock thread stands in for the host and feeds a
//! sine tone into the inputs.

use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use audio_bridge::audio::{AudioBridge, BridgeError, BridgeResult, CpalBackend, FrameStreams, OfflineBackend};
use audio_bridge::settings::{AppSettings, BackendKind};

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting audio-bridge");

    let settings = AppSettings::load();
    let mut bridge = match AudioBridge::new(settings.bridge.clone()) {
        Ok(bridge) => bridge,
        Err(e) => {
            log::error!("Invalid bridge configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let clock = match start(&mut bridge, &settings) {
        Ok(clock) => clock,
        Err(e) => {
            log::error!("Failed to start audio: {}", e);
            return ExitCode::FAILURE;
        }
    };

    run(&mut bridge, &settings);

    if let Err(e) = bridge.shutdown() {
        log::error!("Failed to stop audio cleanly: {}", e);
    }
    if let Some(clock) = clock {
        if clock.join().is_err() {
            log::error!("Offline clock thread panicked");
        }
    }

    let xruns = bridge.xruns();
    log::info!(
        "Done: {} frames dropped on input, {} frames filled on output",
        xruns.dropped_frames,
        xruns.missing_frames
    );
    ExitCode::SUCCESS
}

/// Initialize the bridge on the configured backend
///
/// Returns the clock thread when the offline backend is used.
fn start(bridge: &mut AudioBridge, settings: &AppSettings) -> BridgeResult<Option<JoinHandle<()>>> {
    let name = settings.client_name.as_str();
    match settings.backend {
        BackendKind::Cpal => {
            bridge.initialize(name, CpalBackend::new(settings.bridge.period_frames))?;
            Ok(None)
        }
        BackendKind::Jack => {
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            {
                bridge.initialize(name, audio_bridge::audio::JackBackend::new())?;
                Ok(None)
            }
            #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
            {
                Err(BridgeError::BackendUnavailable(
                    "built without the jack-backend feature".to_string(),
                ))
            }
        }
        BackendKind::Offline => {
            let (backend, driver) =
                OfflineBackend::new(settings.offline_sample_rate, settings.offline_period_frames);
            bridge.initialize(name, backend)?;

            let step = settings.offline_tone_hz / settings.offline_sample_rate as f32;
            let mut phase = 0.0f32;
            let clock = driver
                .spawn_clock(move |inputs, _outputs| {
                    let frames = inputs.first().map_or(0, Vec::len);
                    for i in 0..frames {
                        let sample = (phase * std::f32::consts::TAU).sin() * 0.5;
                        for channel in inputs.iter_mut() {
                            channel[i] = sample;
                        }
                        phase = (phase + step).fract();
                    }
                })
                .map_err(|e| BridgeError::StreamPlay(format!("Failed to start offline clock: {}", e)))?;
            Ok(Some(clock))
        }
    }
}

/// Run the worker until the configured time is up or the host goes away
fn run(bridge: &mut AudioBridge, settings: &AppSettings) {
    let (Some(signal), Some(streams)) = (bridge.shutdown_signal(), bridge.worker_streams()) else {
        return;
    };
    let run_for = Duration::from_secs_f32(settings.run_seconds.max(0.0));
    let nap = settings.bridge.blocking_nap();

    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("bridge-worker".to_string())
            .spawn_scoped(scope, || amp(streams, settings.gain, settings.worker_chunk(), nap));
        if let Err(e) = worker {
            log::error!("Failed to spawn worker thread: {}", e);
            signal.trigger();
            return;
        }

        let started = Instant::now();
        while started.elapsed() < run_for && !signal.is_triggered() {
            thread::sleep(Duration::from_millis(20));
        }
        if signal.trigger() {
            log::info!("Run time elapsed, stopping");
        } else {
            log::warn!("Audio host stopped the bridge");
        }
    });
}

/// Copy input frames to the output with `gain`
///
/// Output channel `n` takes input channel `n % inputs`; with no inputs the
/// worker plays silence at the host's pace.
fn amp(streams: &mut FrameStreams, gain: f32, chunk: usize, nap: Duration) {
    let (n_in, n_out) = (streams.input_channels(), streams.output_channels());
    let mut input = vec![0.0f32; chunk * n_in];
    let mut output = vec![0.0f32; chunk * n_out];
    let mut processed = 0u64;

    while !streams.is_shutting_down() {
        let frames = if n_in > 0 {
            streams.read_frames(&mut input, chunk)
        } else {
            chunk
        };
        if frames == 0 {
            // Non-blocking read with nothing captured yet.
            thread::sleep(nap);
            continue;
        }

        if n_out > 0 {
            for (frame_in, frame_out) in input
                .chunks_exact(n_in.max(1))
                .zip(output.chunks_exact_mut(n_out))
                .take(frames)
            {
                for (ch, sample) in frame_out.iter_mut().enumerate() {
                    *sample = if n_in > 0 { frame_in[ch % n_in] * gain } else { 0.0 };
                }
            }
            let written = streams.write_frames(&output, frames);
            if written < frames && !streams.is_shutting_down() {
                log::debug!("Output ring short: wrote {} of {} frames", written, frames);
                if written == 0 {
                    thread::sleep(nap);
                }
            }
        }
        processed += frames as u64;
    }
    log::info!("Worker processed {} frames", processed);
}
