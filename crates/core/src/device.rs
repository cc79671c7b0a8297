//! Audio device seams used by the session manager.
//!
//! Real implementations wrap platform audio APIs; the session only needs a
//! chunked microphone feed and an output with a monotonic clock that can play
//! frames at a given time.

use crate::{audio::AudioFrame, error::SessionError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one scheduled playback on an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

/// Requested microphone format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    /// Samples per delivered chunk, mono.
    pub chunk_size: usize,
}

/// A running microphone capture.
pub trait InputStream: Send {
    /// Stops capture and releases the device.
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// A running output with its own clock.
pub trait OutputStream: Send {
    /// Seconds elapsed on the output clock. Never decreases.
    fn current_time(&self) -> f64;

    /// Plays `frame` starting at `start_at` on the output clock.
    fn schedule(
        &mut self,
        id: PlaybackId,
        frame: Arc<AudioFrame>,
        start_at: f64,
    ) -> anyhow::Result<()>;

    /// Stops a scheduled or playing frame. Unknown ids are ignored.
    fn cancel(&mut self, id: PlaybackId);

    fn close(&mut self) -> anyhow::Result<()>;
}

/// Opens audio devices for a session.
///
/// Opening may block while the platform brings a device up; the session
/// calls these from the blocking thread pool.
pub trait AudioBackend: Send + Sync {
    /// Requests microphone access. Chunks of `format.chunk_size` samples are
    /// delivered on `chunks` until the stream is stopped.
    fn open_input(
        &self,
        format: CaptureFormat,
        chunks: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, SessionError>;

    /// Opens the speaker. Each scheduled playback that finishes naturally is
    /// reported on `ended`.
    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn OutputStream>, SessionError>;
}
