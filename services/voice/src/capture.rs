//! Microphone capture on a dedicated thread.
//!
//! The cpal stream pushes mono samples into a ring buffer from the audio
//! callback; the capture thread drains it, resamples to the session rate and
//! hands out fixed-size chunks.

use aijaz_core::{
    SessionError,
    audio::{RESAMPLER_CHUNK_SIZE, create_resampler},
    device::{CaptureFormat, InputStream},
};
use anyhow::anyhow;
use cpal::{
    FromSample, Sample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use ringbuf::{
    HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use rubato::{FastFixedIn, Resampler};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// About two seconds of audio at common device rates.
const RING_CAPACITY: usize = 96_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Turns device-rate mono samples into fixed-size chunks at the session rate.
pub struct CapturePump {
    resampler: Option<FastFixedIn<f32>>,
    input: Vec<f32>,
    output: Vec<f32>,
    chunk_size: usize,
}

impl CapturePump {
    pub fn new(device_rate: u32, format: CaptureFormat) -> anyhow::Result<Self> {
        let resampler = if device_rate == format.sample_rate {
            None
        } else {
            Some(create_resampler(
                device_rate as f64,
                format.sample_rate as f64,
                RESAMPLER_CHUNK_SIZE,
            )?)
        };
        Ok(Self {
            resampler,
            input: Vec::new(),
            output: Vec::with_capacity(format.chunk_size * 2),
            chunk_size: format.chunk_size,
        })
    }

    /// Feeds captured samples and returns every chunk that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<Vec<f32>>> {
        match self.resampler.as_mut() {
            None => self.output.extend_from_slice(samples),
            Some(resampler) => {
                self.input.extend_from_slice(samples);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.input.len() < needed {
                        break;
                    }
                    let res = resampler.process(&[&self.input[..needed]], None)?;
                    self.output.extend_from_slice(&res[0]);
                    self.input.drain(..needed);
                }
            }
        }

        let mut ready = Vec::new();
        while self.output.len() >= self.chunk_size {
            ready.push(self.output.drain(..self.chunk_size).collect());
        }
        Ok(ready)
    }
}

/// A running microphone capture owned by its own thread.
pub struct CpalInput {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    pub fn open(
        format: CaptureFormat,
        chunks: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Self, SessionError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("aijaz-capture".to_string())
            .spawn(move || run_capture(format, chunks, thread_stop, ready_tx))
            .map_err(|e| SessionError::Permission(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(SessionError::Permission(
                "capture thread exited during startup".to_string(),
            )),
        }
    }
}

impl InputStream for CpalInput {
    fn stop(&mut self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("capture thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn run_capture(
    format: CaptureFormat,
    chunks: mpsc::UnboundedSender<Vec<f32>>,
    stop: Arc<AtomicBool>,
    ready: std_mpsc::Sender<Result<(), SessionError>>,
) {
    let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
    let (stream, device_rate) = match start_stream(producer) {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(SessionError::Permission(e.to_string())));
            return;
        }
    };
    let mut pump = match CapturePump::new(device_rate, format) {
        Ok(pump) => pump,
        Err(e) => {
            let _ = ready.send(Err(SessionError::Permission(e.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    info!(device_rate, target_rate = format.sample_rate, "Microphone capture started.");

    let mut scratch = vec![0.0f32; RING_CAPACITY / 4];
    while !stop.load(Ordering::Relaxed) {
        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        match pump.push(&scratch[..n]) {
            Ok(ready_chunks) => {
                for chunk in ready_chunks {
                    if chunks.send(chunk).is_err() {
                        debug!("Capture receiver dropped, stopping.");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Dropping captured samples, resampling failed."),
        }
    }
    drop(stream);
    debug!("Microphone capture stopped.");
}

fn start_stream(producer: HeapProd<f32>) -> anyhow::Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no microphone available"))?;
    let supported = device.default_input_config()?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build::<f32>(&device, &config, channels, producer)?,
        cpal::SampleFormat::I16 => build::<i16>(&device, &config, channels, producer)?,
        cpal::SampleFormat::U16 => build::<u16>(&device, &config, channels, producer)?,
        other => return Err(anyhow!("unsupported microphone sample format {other:?}")),
    };
    stream.play()?;
    Ok((stream, device_rate))
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut producer: HeapProd<f32>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                // A full ring means the capture thread fell behind; drop.
                let _ = producer.try_push(sum / channels as f32);
            }
        },
        |err| warn!(error = %err, "Microphone stream error."),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> CaptureFormat {
        CaptureFormat {
            sample_rate: 16_000,
            chunk_size: 4096,
        }
    }

    #[test]
    fn matching_rate_chunks_without_resampling() {
        let mut pump = CapturePump::new(16_000, format()).unwrap();
        assert!(pump.push(&[0.1; 4000]).unwrap().is_empty());
        let chunks = pump.push(&[0.2; 4200]).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4096));
        assert_eq!(chunks[0][0], 0.1);
        assert_eq!(chunks[1][4095], 0.2);
    }

    #[test]
    fn higher_device_rate_is_downsampled() {
        let mut pump = CapturePump::new(48_000, format()).unwrap();
        let mut produced = 0;
        for _ in 0..10 {
            for chunk in pump.push(&[0.0; 4800]).unwrap() {
                assert_eq!(chunk.len(), 4096);
                produced += chunk.len();
            }
        }
        // One second at 48 kHz yields roughly 16k samples, less what is
        // still buffered in the pump.
        assert!(produced >= 12_288, "produced {produced}");
        assert!(produced <= 16_000);
    }
}
