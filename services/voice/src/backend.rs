use crate::{capture::CpalInput, playback::CpalOutput};
use aijaz_core::{
    SessionError,
    device::{AudioBackend, CaptureFormat, InputStream, OutputStream, PlaybackId},
};
use tokio::sync::mpsc;

/// Default system microphone and speaker via cpal.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        format: CaptureFormat,
        chunks: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn InputStream>, SessionError> {
        Ok(Box::new(CpalInput::open(format, chunks)?))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn OutputStream>, SessionError> {
        Ok(Box::new(CpalOutput::open(sample_rate, ended)?))
    }
}
