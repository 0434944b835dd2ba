//! Real-time side of the bridge
//!
//! Everything in this module runs inside the host's audio callback. It never
//! allocates, never locks and never logs: transfers are index arithmetic plus
//! bulk copies, and shortfalls are recorded in atomic counters that the
//! worker side reports.
//!
//! Ring buffers carry interleaved, frame-major samples
//! (`ch0 f0, ch1 f0, .., chN f0, ch0 f1, ..`). The stages only ever move whole
//! frames, so channel alignment survives overruns and underruns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::{FromSample, Sample};

use super::buffer::{RingCloser, RingConsumer, RingProducer};
use super::config::{UnderrunFill, MAX_CHANNELS};

/// Counters for frames lost at the real-time boundary
#[derive(Debug, Default)]
pub struct XrunStats {
    overruns: AtomicU64,
    dropped_frames: AtomicU64,
    underruns: AtomicU64,
    missing_frames: AtomicU64,
}

impl XrunStats {
    fn record_overrun(&self, frames: usize) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        self.dropped_frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    fn record_underrun(&self, frames: usize) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.missing_frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> XrunSnapshot {
        XrunSnapshot {
            overruns: self.overruns.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            missing_frames: self.missing_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`XrunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XrunSnapshot {
    /// Callbacks that found the input ring full
    pub overruns: u64,
    /// Captured frames discarded because the worker fell behind
    pub dropped_frames: u64,
    /// Callbacks that found the output ring short
    pub underruns: u64,
    /// Played frames synthesized by the underrun fill policy
    pub missing_frames: u64,
}

/// Stops both directions of a bridge
///
/// Triggered by the owning thread on shutdown or by a backend when the host
/// goes away. Closing the rings makes blocking worker calls return 0; the
/// real-time stages stop touching them on their next callback.
#[derive(Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    input: RingCloser,
    output: RingCloser,
}

impl ShutdownSignal {
    pub(crate) fn new(input: RingCloser, output: RingCloser) -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            input,
            output,
        }
    }

    /// Close both rings. Returns `true` for the first trigger only.
    pub fn trigger(&self) -> bool {
        let first = !self.triggered.swap(true, Ordering::AcqRel);
        self.input.close();
        self.output.close();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

/// Host → worker direction: interleave and push into the input ring
pub struct CaptureStage {
    channels: usize,
    ring: RingProducer,
    scratch: Box<[f32]>,
    period_frames: usize,
    stats: Arc<XrunStats>,
}

impl CaptureStage {
    pub(crate) fn new(
        channels: usize,
        ring: RingProducer,
        period_frames: usize,
        stats: Arc<XrunStats>,
    ) -> Self {
        debug_assert!(channels <= MAX_CHANNELS);
        debug_assert!(!ring.is_blocking());
        let period_frames = period_frames.max(1);
        Self {
            channels,
            ring,
            scratch: vec![0.0; period_frames * channels].into_boxed_slice(),
            period_frames,
            stats,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Capture one period of per-channel host buffers
    ///
    /// Channels beyond `inputs.len()` are captured as silence.
    ///
    /// # Panics
    /// If any buffer in `inputs` holds fewer than `frames` samples.
    pub fn capture_planar(&mut self, frames: usize, inputs: &[&[f32]]) {
        if self.channels == 0 || self.ring.is_closed() {
            return;
        }
        let channels = self.channels;

        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(self.period_frames);
            let scratch = &mut self.scratch[..chunk * channels];

            for ch in 0..channels {
                match inputs.get(ch) {
                    Some(input) => {
                        let source = &input[offset..offset + chunk];
                        for (frame, &sample) in scratch.chunks_exact_mut(channels).zip(source) {
                            frame[ch] = sample;
                        }
                    }
                    None => {
                        for frame in scratch.chunks_exact_mut(channels) {
                            frame[ch] = 0.0;
                        }
                    }
                }
            }

            self.push_frames(chunk);
            offset += chunk;
        }
    }

    /// Capture an interleaved host buffer with `device_channels` per frame
    ///
    /// Extra device channels are ignored, missing ones read as silence.
    pub fn capture_interleaved<T>(&mut self, data: &[T], device_channels: usize)
    where
        T: Sample,
        f32: FromSample<T>,
    {
        if self.channels == 0 || device_channels == 0 || self.ring.is_closed() {
            return;
        }
        let channels = self.channels;

        for block in data.chunks(self.period_frames * device_channels) {
            let chunk = block.len() / device_channels;
            let scratch = &mut self.scratch[..chunk * channels];

            for (dst, src) in scratch
                .chunks_exact_mut(channels)
                .zip(block.chunks_exact(device_channels))
            {
                for (ch, slot) in dst.iter_mut().enumerate() {
                    *slot = src.get(ch).map_or(0.0, |&s| s.to_sample::<f32>());
                }
            }

            self.push_frames(chunk);
        }
    }

    /// Push the first `frames` frames of scratch, dropping what doesn't fit
    fn push_frames(&mut self, frames: usize) {
        let room = self.ring.available_for_write() / self.channels;
        let accepted = frames.min(room);
        if accepted > 0 {
            self.ring.push(&self.scratch[..accepted * self.channels]);
        }
        if accepted < frames {
            self.stats.record_overrun(frames - accepted);
        }
    }
}

/// Worker → host direction: pop from the output ring and de-interleave
pub struct PlaybackStage {
    channels: usize,
    ring: RingConsumer,
    scratch: Box<[f32]>,
    period_frames: usize,
    fill: UnderrunFill,
    last_frame: [f32; MAX_CHANNELS],
    stats: Arc<XrunStats>,
}

impl PlaybackStage {
    pub(crate) fn new(
        channels: usize,
        ring: RingConsumer,
        period_frames: usize,
        fill: UnderrunFill,
        stats: Arc<XrunStats>,
    ) -> Self {
        debug_assert!(channels <= MAX_CHANNELS);
        debug_assert!(!ring.is_blocking());
        let period_frames = period_frames.max(1);
        Self {
            channels,
            ring,
            scratch: vec![0.0; period_frames * channels].into_boxed_slice(),
            period_frames,
            fill,
            last_frame: [0.0; MAX_CHANNELS],
            stats,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fill one period of per-channel host buffers
    ///
    /// Buffers beyond the configured channel count are silenced.
    ///
    /// # Panics
    /// If any buffer in `outputs` holds fewer than `frames` samples.
    pub fn render_planar(&mut self, frames: usize, outputs: &mut [&mut [f32]]) {
        let channels = self.channels;

        let mut offset = 0;
        while offset < frames {
            let chunk = (frames - offset).min(self.period_frames);
            self.pull_frames(chunk);
            let scratch = &self.scratch[..chunk * channels];

            for (ch, output) in outputs.iter_mut().enumerate() {
                let dst = &mut output[offset..offset + chunk];
                if ch < channels {
                    for (out, frame) in dst.iter_mut().zip(scratch.chunks_exact(channels)) {
                        *out = frame[ch];
                    }
                } else {
                    dst.fill(0.0);
                }
            }

            offset += chunk;
        }
    }

    /// Fill an interleaved host buffer with `device_channels` per frame
    ///
    /// Device channels beyond the configured count are silenced.
    pub fn render_interleaved<T>(&mut self, data: &mut [T], device_channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        let channels = self.channels;
        if channels == 0 || device_channels == 0 {
            data.fill(T::EQUILIBRIUM);
            return;
        }

        for block in data.chunks_mut(self.period_frames * device_channels) {
            let chunk = block.len() / device_channels;
            self.pull_frames(chunk);
            let scratch = &self.scratch[..chunk * channels];

            for (dst, src) in block
                .chunks_exact_mut(device_channels)
                .zip(scratch.chunks_exact(channels))
            {
                for (ch, out) in dst.iter_mut().enumerate() {
                    *out = if ch < channels {
                        T::from_sample(src[ch])
                    } else {
                        T::EQUILIBRIUM
                    };
                }
            }
        }
    }

    /// Load `frames` frames into scratch, applying the fill policy to any
    /// shortfall
    fn pull_frames(&mut self, frames: usize) {
        let channels = self.channels;
        if channels == 0 || frames == 0 {
            return;
        }
        let wanted = frames * channels;

        if self.ring.is_closed() {
            self.scratch[..wanted].fill(0.0);
            return;
        }

        let available = self.ring.available_for_read() / channels;
        let got = frames.min(available);
        if got > 0 {
            self.ring.pop(&mut self.scratch[..got * channels]);
            self.last_frame[..channels]
                .copy_from_slice(&self.scratch[(got - 1) * channels..got * channels]);
        }

        if got < frames {
            self.stats.record_underrun(frames - got);
            let missing = &mut self.scratch[got * channels..wanted];
            match self.fill {
                UnderrunFill::Silence => missing.fill(0.0),
                UnderrunFill::HoldLast => {
                    for frame in missing.chunks_exact_mut(channels) {
                        frame.copy_from_slice(&self.last_frame[..channels]);
                    }
                }
            }
        }
    }
}

/// The part of the bridge that lives inside the host callback
///
/// Built by [`AudioBridge::initialize`](super::AudioBridge::initialize) and
/// handed to the backend. Hosts with a single duplex callback call
/// [`on_audio_ready`](Self::on_audio_ready); hosts with separate capture and
/// playback callbacks take the two stages apart with
/// [`into_stages`](Self::into_stages).
pub struct RealtimeProcessor {
    capture: CaptureStage,
    playback: PlaybackStage,
}

impl RealtimeProcessor {
    pub(crate) fn new(capture: CaptureStage, playback: PlaybackStage) -> Self {
        Self { capture, playback }
    }

    /// Run one host period
    ///
    /// `inputs[ch]` and `outputs[ch]` must each hold at least `frames`
    /// samples.
    pub fn on_audio_ready(&mut self, frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        self.capture.capture_planar(frames, inputs);
        self.playback.render_planar(frames, outputs);
    }

    pub fn input_channels(&self) -> usize {
        self.capture.channels()
    }

    pub fn output_channels(&self) -> usize {
        self.playback.channels()
    }

    pub fn into_stages(self) -> (CaptureStage, PlaybackStage) {
        (self.capture, self.playback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::RingBuffer;

    /// Capture stage plus the worker end of its ring
    fn capture(channels: usize, ring_frames: usize, period: usize) -> (CaptureStage, RingConsumer, Arc<XrunStats>) {
        let stats = Arc::new(XrunStats::default());
        let (tx, rx) = RingBuffer::new(ring_frames * channels, "in").unwrap().split();
        (CaptureStage::new(channels, tx, period, Arc::clone(&stats)), rx, stats)
    }

    fn playback(
        channels: usize,
        ring_frames: usize,
        period: usize,
        fill: UnderrunFill,
    ) -> (PlaybackStage, RingProducer, Arc<XrunStats>) {
        let stats = Arc::new(XrunStats::default());
        let (tx, rx) = RingBuffer::new(ring_frames * channels, "out").unwrap().split();
        (PlaybackStage::new(channels, rx, period, fill, Arc::clone(&stats)), tx, stats)
    }

    #[test]
    fn test_capture_interleaves_frame_major() {
        let (mut stage, mut rx, _) = capture(3, 16, 8);
        let ch0 = [0.0, 1.0];
        let ch1 = [10.0, 11.0];
        let ch2 = [20.0, 21.0];

        stage.capture_planar(2, &[&ch0, &ch1, &ch2]);

        let mut out = [0.0; 6];
        assert_eq!(rx.pop(&mut out), 6);
        assert_eq!(out, [0.0, 10.0, 20.0, 1.0, 11.0, 21.0]);
    }

    #[test]
    fn test_capture_missing_channel_is_silent() {
        let (mut stage, mut rx, _) = capture(2, 16, 8);
        stage.capture_planar(2, &[&[1.0, 2.0]]);

        let mut out = [9.0; 4];
        rx.pop(&mut out);
        assert_eq!(out, [1.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_capture_overrun_drops_whole_frames() {
        let (mut stage, mut rx, stats) = capture(2, 3, 8);
        let left = [1.0, 2.0, 3.0, 4.0, 5.0];
        let right = [-1.0, -2.0, -3.0, -4.0, -5.0];

        stage.capture_planar(5, &[&left, &right]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.overruns, 1);
        assert_eq!(snapshot.dropped_frames, 2);
        assert_eq!(rx.available_for_read(), 6);

        let mut out = [0.0; 6];
        rx.pop(&mut out);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn test_capture_splits_oversized_period() {
        let (mut stage, mut rx, stats) = capture(1, 64, 4);
        let ramp: Vec<f32> = (0..10).map(|i| i as f32).collect();

        stage.capture_planar(10, &[&ramp]);

        let mut out = [0.0; 10];
        assert_eq!(rx.pop(&mut out), 10);
        assert_eq!(out.to_vec(), ramp);
        assert_eq!(stats.snapshot(), XrunSnapshot::default());
    }

    #[test]
    fn test_capture_interleaved_reshapes_device_channels() {
        let (mut stage, mut rx, _) = capture(1, 16, 8);
        // Stereo device, mono bridge: keep the left channel only.
        stage.capture_interleaved(&[0.5f32, 9.0, -0.5, 9.0], 2);

        let mut out = [0.0; 2];
        assert_eq!(rx.pop(&mut out), 2);
        assert_eq!(out, [0.5, -0.5]);
    }

    #[test]
    fn test_capture_interleaved_converts_integer_samples() {
        let (mut stage, mut rx, _) = capture(1, 16, 8);
        stage.capture_interleaved(&[0i16, i16::MIN], 1);

        let mut out = [1.0; 2];
        rx.pop(&mut out);
        assert_eq!(out, [0.0, -1.0]);
    }

    #[test]
    fn test_closed_capture_is_ignored() {
        let (mut stage, rx, stats) = capture(1, 4, 4);
        rx.close();
        stage.capture_planar(8, &[&[1.0; 8]]);
        assert_eq!(rx.available_for_read(), 0);
        assert_eq!(stats.snapshot().overruns, 0);
    }

    #[test]
    fn test_render_deinterleaves() {
        let (mut stage, mut tx, stats) = playback(2, 16, 8, UnderrunFill::Silence);
        tx.push(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);

        let mut left = [0.0; 3];
        let mut right = [0.0; 3];
        stage.render_planar(3, &mut [&mut left, &mut right]);

        assert_eq!(left, [1.0, 2.0, 3.0]);
        assert_eq!(right, [-1.0, -2.0, -3.0]);
        assert_eq!(stats.snapshot().underruns, 0);
    }

    #[test]
    fn test_render_underrun_fills_silence() {
        let (mut stage, mut tx, stats) = playback(1, 16, 8, UnderrunFill::Silence);
        tx.push(&[0.25, 0.5]);

        let mut out = [9.0; 4];
        stage.render_planar(4, &mut [&mut out]);

        assert_eq!(out, [0.25, 0.5, 0.0, 0.0]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.underruns, 1);
        assert_eq!(snapshot.missing_frames, 2);
    }

    #[test]
    fn test_render_underrun_holds_last_frame() {
        let (mut stage, mut tx, _) = playback(2, 16, 8, UnderrunFill::HoldLast);
        tx.push(&[0.1, 0.2, 0.3, 0.4]);

        let mut left = [0.0; 4];
        let mut right = [0.0; 4];
        stage.render_planar(4, &mut [&mut left, &mut right]);
        assert_eq!(left, [0.1, 0.3, 0.3, 0.3]);
        assert_eq!(right, [0.2, 0.4, 0.4, 0.4]);

        // The held value carries over into the next period.
        stage.render_planar(2, &mut [&mut left[..2], &mut right[..2]]);
        assert_eq!(&left[..2], &[0.3, 0.3]);
        assert_eq!(&right[..2], &[0.4, 0.4]);
    }

    #[test]
    fn test_render_partial_frame_stays_aligned() {
        let (mut stage, mut tx, _) = playback(2, 16, 8, UnderrunFill::Silence);
        // One and a half frames: only the whole frame is played.
        tx.push(&[1.0, 2.0, 3.0]);

        let mut left = [9.0; 2];
        let mut right = [9.0; 2];
        stage.render_planar(2, &mut [&mut left, &mut right]);
        assert_eq!(left, [1.0, 0.0]);
        assert_eq!(right, [2.0, 0.0]);
        assert_eq!(tx.available_for_read(), 1);
    }

    #[test]
    fn test_render_interleaved_silences_extra_device_channels() {
        let (mut stage, mut tx, _) = playback(1, 16, 8, UnderrunFill::Silence);
        tx.push(&[0.5, -0.5]);

        let mut device = [9.0f32; 6];
        stage.render_interleaved(&mut device, 3);
        assert_eq!(device, [0.5, 0.0, 0.0, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_closed_playback_renders_silence() {
        let (mut stage, mut tx, stats) = playback(1, 16, 8, UnderrunFill::HoldLast);
        tx.push(&[1.0, 1.0]);
        tx.close();

        let mut out = [9.0; 2];
        stage.render_planar(2, &mut [&mut out]);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(stats.snapshot().underruns, 0);
    }

    #[test]
    fn test_shutdown_signal_closes_rings_once() {
        let (tx, rx) = RingBuffer::new(4, "a").unwrap().split();
        let (tx2, _rx2) = RingBuffer::new(4, "b").unwrap().split();
        let signal = ShutdownSignal::new(tx.closer(), tx2.closer());

        assert!(!signal.is_triggered());
        assert!(signal.clone().trigger());
        assert!(!signal.trigger());
        assert!(rx.is_closed());
        assert!(tx2.is_closed());
    }
}
