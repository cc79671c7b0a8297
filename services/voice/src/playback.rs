//! Speaker output on a dedicated thread.
//!
//! Scheduled frames are mixed against a sample clock advanced by the audio
//! callback, so a frame placed at `start_at` starts exactly that many
//! seconds into the stream. Frames keep their own sample rate and are
//! interpolated onto the device rate while mixing.

use aijaz_core::{
    SessionError,
    audio::AudioFrame,
    device::{OutputStream, PlaybackId},
};
use anyhow::anyhow;
use cpal::{
    FromSample, Sample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc as std_mpsc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const IDLE_INTERVAL: Duration = Duration::from_millis(20);

struct Voice {
    id: PlaybackId,
    /// Start on the source timeline, in source samples.
    start: f64,
    rate: f64,
    samples: Vec<f32>,
}

impl Voice {
    /// Source position of output frame `t` relative to this voice.
    fn position(&self, t: u64, out_rate: f64) -> f64 {
        t as f64 * self.rate / out_rate - self.start
    }

    /// Linear interpolation between neighbouring samples, treating everything
    /// outside the voice as silence. Adjacent voices therefore sum to one
    /// continuous signal across their boundary.
    fn sample_at(&self, pos: f64) -> f32 {
        let len = self.samples.len() as f64;
        if pos <= -1.0 || pos >= len {
            return 0.0;
        }
        let idx = pos.floor();
        let frac = (pos - idx) as f32;
        let at = |i: f64| -> f32 {
            if i < 0.0 || i >= len {
                0.0
            } else {
                self.samples[i as usize]
            }
        };
        at(idx) * (1.0 - frac) + at(idx + 1.0) * frac
    }
}

/// Sums scheduled mono voices into interleaved output, converting each from
/// its own sample rate to the device rate on the fly.
#[derive(Default)]
pub struct Mixer {
    voices: Vec<Voice>,
    played: u64,
}

impl Mixer {
    /// Queues `samples` recorded at `sample_rate` to start `start_at` seconds
    /// into the stream.
    pub fn add(&mut self, id: PlaybackId, start_at: f64, samples: Vec<f32>, sample_rate: u32) {
        let rate = sample_rate.max(1) as f64;
        let mut start = start_at * rate;
        // Cursor sums drift by float error; keep whole-sample starts exact.
        if (start - start.round()).abs() < 1e-6 {
            start = start.round();
        }
        self.voices.push(Voice {
            id,
            start,
            rate,
            samples,
        });
    }

    pub fn cancel(&mut self, id: PlaybackId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Frames rendered so far.
    pub fn played(&self) -> u64 {
        self.played
    }

    /// Fills `out` at `out_rate` and returns the voices that finished
    /// playing in it.
    pub fn render(&mut self, out: &mut [f32], channels: usize, out_rate: u32) -> Vec<PlaybackId> {
        let channels = channels.max(1);
        let out_rate = out_rate.max(1) as f64;
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.played + i as u64;
            let sum: f32 = self
                .voices
                .iter()
                .map(|v| v.sample_at(v.position(t, out_rate)))
                .sum();
            frame.fill(sum.clamp(-1.0, 1.0));
        }
        self.played += (out.len() / channels) as u64;

        let played = self.played;
        let mut ended = Vec::new();
        self.voices.retain(|v| {
            let done = v.position(played, out_rate) >= v.samples.len() as f64;
            if done {
                ended.push(v.id);
            }
            !done
        });
        ended
    }
}

struct Shared {
    mixer: Mutex<Mixer>,
    /// Mirror of `Mixer::played` readable without the lock.
    clock: AtomicU64,
}

impl Shared {
    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running speaker output owned by its own thread.
pub struct CpalOutput {
    shared: Arc<Shared>,
    rate: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open(
        preferred_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Self, SessionError> {
        let shared = Arc::new(Shared {
            mixer: Mutex::new(Mixer::default()),
            clock: AtomicU64::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("aijaz-playback".to_string())
            .spawn(move || {
                run_playback(preferred_rate, thread_shared, ended, thread_stop, ready_tx)
            })
            .map_err(|e| SessionError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(rate)) => Ok(Self {
                shared,
                rate,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(SessionError::Device(e))
            }
            Err(_) => Err(SessionError::Device(
                "playback thread exited during startup".to_string(),
            )),
        }
    }
}

impl OutputStream for CpalOutput {
    fn current_time(&self) -> f64 {
        self.shared.clock.load(Ordering::Acquire) as f64 / self.rate as f64
    }

    fn schedule(
        &mut self,
        id: PlaybackId,
        frame: Arc<AudioFrame>,
        start_at: f64,
    ) -> anyhow::Result<()> {
        let channels = frame.channels().max(1) as usize;
        let mono: Vec<f32> = if channels == 1 {
            frame.samples().to_vec()
        } else {
            frame
                .samples()
                .chunks(channels)
                .map(|f| f.iter().sum::<f32>() / channels as f32)
                .collect()
        };
        self.shared
            .mixer()
            .add(id, start_at, mono, frame.sample_rate());
        Ok(())
    }

    fn cancel(&mut self, id: PlaybackId) {
        self.shared.mixer().cancel(id);
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("output already closed"))?;
        thread
            .join()
            .map_err(|_| anyhow!("playback thread panicked"))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn run_playback(
    preferred_rate: u32,
    shared: Arc<Shared>,
    ended: mpsc::UnboundedSender<PlaybackId>,
    stop: Arc<AtomicBool>,
    ready: std_mpsc::Sender<Result<u32, String>>,
) {
    let (stream, rate) = match start_stream(preferred_rate, shared, ended) {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(rate));
    info!(rate, "Speaker output started.");

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(IDLE_INTERVAL);
    }
    drop(stream);
    debug!("Speaker output stopped.");
}

fn start_stream(
    preferred_rate: u32,
    shared: Arc<Shared>,
    ended: mpsc::UnboundedSender<PlaybackId>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no speaker available"))?;

    // Play at the session rate when the device allows it.
    let native = device
        .supported_output_configs()?
        .find(|range| {
            range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= preferred_rate
                && range.max_sample_rate().0 >= preferred_rate
        })
        .map(|range| range.with_sample_rate(cpal::SampleRate(preferred_rate)));
    let supported = match native {
        Some(config) => config,
        None => device.default_output_config()?,
    };
    let rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build::<f32>(&device, &config, channels, rate, shared, ended)?,
        cpal::SampleFormat::I16 => build::<i16>(&device, &config, channels, rate, shared, ended)?,
        cpal::SampleFormat::U16 => build::<u16>(&device, &config, channels, rate, shared, ended)?,
        other => return Err(anyhow!("unsupported speaker sample format {other:?}")),
    };
    stream.play()?;
    Ok((stream, rate))
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    rate: u32,
    shared: Arc<Shared>,
    ended: mpsc::UnboundedSender<PlaybackId>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            let finished = {
                let mut mixer = shared.mixer();
                let finished = mixer.render(&mut scratch, channels, rate);
                shared.clock.store(mixer.played(), Ordering::Release);
                finished
            };
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = sample.to_sample::<T>();
            }
            for id in finished {
                let _ = ended.send(id);
            }
        },
        |err| warn!(error = %err, "Speaker stream error."),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Renders at the voices' own rate of 4 Hz so frame `n` starts at `n / 4` seconds.
    const RATE: u32 = 4;

    fn at(frame: u32) -> f64 {
        frame as f64 / RATE as f64
    }

    #[test]
    fn voices_start_on_their_frame() {
        let mut mixer = Mixer::default();
        mixer.add(PlaybackId(1), at(2), vec![0.5, 0.5], RATE);
        let mut out = [0.0f32; 8];
        let ended = mixer.render(&mut out, 2, RATE);
        // Frames 0 and 1 are silent, frames 2 and 3 carry the voice on both channels.
        assert_eq!(out, [0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);
        assert_eq!(ended, vec![PlaybackId(1)]);
        assert_eq!(mixer.played(), 4);
    }

    #[test]
    fn back_to_back_voices_leave_no_gap() {
        let mut mixer = Mixer::default();
        mixer.add(PlaybackId(1), at(0), vec![0.1; 3], RATE);
        mixer.add(PlaybackId(2), at(3), vec![0.2; 3], RATE);
        let mut out = [0.0f32; 6];
        let ended = mixer.render(&mut out, 1, RATE);
        assert_eq!(out, [0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
        assert_eq!(ended, vec![PlaybackId(1), PlaybackId(2)]);
    }

    #[test]
    fn unfinished_voice_spans_callbacks() {
        let mut mixer = Mixer::default();
        mixer.add(PlaybackId(7), at(1), vec![0.3; 4], RATE);
        let mut out = [0.0f32; 3];
        assert!(mixer.render(&mut out, 1, RATE).is_empty());
        assert_eq!(out, [0.0, 0.3, 0.3]);
        assert_eq!(mixer.render(&mut out, 1, RATE), vec![PlaybackId(7)]);
        assert_eq!(out, [0.3, 0.3, 0.0]);
    }

    #[test]
    fn cancelled_voice_is_silent_and_not_reported() {
        let mut mixer = Mixer::default();
        mixer.add(PlaybackId(1), at(0), vec![0.4; 4], RATE);
        mixer.cancel(PlaybackId(1));
        let mut out = [1.0f32; 4];
        assert!(mixer.render(&mut out, 1, RATE).is_empty());
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn overlapping_voices_are_clamped() {
        let mut mixer = Mixer::default();
        mixer.add(PlaybackId(1), at(0), vec![0.8; 2], RATE);
        mixer.add(PlaybackId(2), at(0), vec![0.8; 2], RATE);
        let mut out = [0.0f32; 2];
        mixer.render(&mut out, 1, RATE);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn upsampled_voices_join_without_a_gap() {
        let mut mixer = Mixer::default();
        mixer.add(PlaybackId(1), at(0), vec![0.0, 0.2], RATE);
        mixer.add(PlaybackId(2), at(2), vec![0.4, 0.6], RATE);
        let mut out = [0.0f32; 8];
        let ended = mixer.render(&mut out, 1, RATE * 2);
        // A straight ramp across the boundary, then the tail fades out.
        let expected = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.3];
        for (got, want) in out.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
        assert_eq!(ended, vec![PlaybackId(1), PlaybackId(2)]);
        assert_eq!(mixer.played(), 8);
    }

    #[test]
    fn session_clock_starts_land_on_device_frames() {
        let mut mixer = Mixer::default();
        // Ten 0.1s frames summed the way the scheduler sums durations.
        let start_at = (0..10).map(|_| 0.1f64).sum::<f64>();
        mixer.add(PlaybackId(1), start_at, vec![0.5; 24], 24_000);
        let mut out = vec![0.0f32; 48_000];
        mixer.render(&mut out, 1, 48_000);
        assert_eq!(out[47_998], 0.0);
        // Half a device frame early the first sample is already fading in.
        assert_eq!(out[47_999], 0.25);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1, 48_000);
        assert_eq!(out[0], 0.5);
    }
}
