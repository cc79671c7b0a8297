//! PCM16 framing shared by the live session and one-shot speech playback.
//!
//! Every payload exchanged with Gemini is mono, signed 16-bit little-endian
//! PCM wrapped in base64. Internally audio is carried as normalized `f32`.

use crate::error::SessionError;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of microphone audio sent to the live model.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of audio produced by the live model and by text-to-speech.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Number of samples per captured chunk.
pub const CAPTURE_CHUNK_SIZE: usize = 4096;

/// Input block size used when resampling.
pub const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// One decoded, schedulable unit of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Interleaved samples in [-1, 1].
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A base64 PCM16 chunk tagged with its MIME type, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeAudio {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeAudio {
    /// Quantizes mono `f32` samples and wraps them as `audio/pcm;rate=<rate>`.
    pub fn pcm16(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={sample_rate}"),
            data: encode_pcm16_base64(samples),
        }
    }
}

/// Converts one normalized sample to PCM16.
///
/// Negative values scale by 32768 and positive values by 32767 so that both
/// -1.0 and 1.0 land exactly on the i16 extremes. The result is truncated.
pub fn quantize_sample(sample: f32) -> i16 {
    // NaN compares false everywhere, route it to silence.
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Converts one PCM16 sample back to [-1, 1).
pub fn normalize_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encodes `f32` samples into base64 little-endian PCM16.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| quantize_sample(s).to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes a base64 PCM16 payload into a normalized frame.
///
/// Fails with [`SessionError::Decode`] when the payload is not base64 or its
/// byte length is not a whole number of frames.
pub fn decode_pcm16(
    payload: &str,
    channels: u16,
    sample_rate: u32,
) -> Result<AudioFrame, SessionError> {
    let channels = channels.max(1);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| SessionError::Decode(format!("invalid base64: {e}")))?;

    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(SessionError::Decode(format!(
            "{} bytes is not a whole number of {}-channel PCM16 frames",
            bytes.len(),
            channels
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|c| normalize_sample(i16::from_le_bytes([c[0], c[1]])))
        .collect();
    Ok(AudioFrame::new(samples, channels, sample_rate))
}

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn quantize_hits_both_extremes_without_overflow() {
        assert_eq!(quantize_sample(1.0), i16::MAX);
        assert_eq!(quantize_sample(-1.0), i16::MIN);
        assert_eq!(quantize_sample(2.5), i16::MAX);
        assert_eq!(quantize_sample(-7.0), i16::MIN);
        assert_eq!(quantize_sample(0.0), 0);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn half_scale_survives_a_round_trip() {
        let encoded = encode_pcm16_base64(&[0.5, -0.5, 1.0, -1.0]);
        let frame = decode_pcm16(&encoded, 1, PLAYBACK_SAMPLE_RATE).unwrap();
        let step = 1.0 / 32768.0;
        assert_abs_diff_eq!(frame.samples()[0], 0.5, epsilon = step);
        assert_abs_diff_eq!(frame.samples()[1], -0.5, epsilon = step);
        assert_abs_diff_eq!(frame.samples()[2], 1.0, epsilon = step);
        assert_eq!(frame.samples()[3], -1.0);
    }

    #[test]
    fn decode_reads_little_endian() {
        // 16384 = 0x4000, -32768 = 0x8000
        let frame = decode_pcm16(&b64(&[0x00, 0x40, 0x00, 0x80]), 1, 24_000).unwrap();
        assert_eq!(frame.frame_count(), 2);
        assert_abs_diff_eq!(frame.samples()[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(frame.samples()[1], -1.0, epsilon = 0.0001);
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(matches!(
            decode_pcm16("invalid_base64!", 1, 24_000),
            Err(SessionError::Decode(_))
        ));
        assert!(matches!(
            decode_pcm16(&b64(&[0x00]), 1, 24_000),
            Err(SessionError::Decode(_))
        ));
        // Six bytes is three mono samples but not a whole stereo frame count.
        assert!(decode_pcm16(&b64(&[0; 6]), 2, 24_000).is_err());
        assert!(decode_pcm16(&b64(&[0; 6]), 1, 24_000).is_ok());
    }

    #[test]
    fn frame_duration_follows_rate_and_channels() {
        let mono = AudioFrame::new(vec![0.0; 24_000], 1, 24_000);
        assert_abs_diff_eq!(mono.duration(), 1.0);

        let stereo = AudioFrame::new(vec![0.0; 24_000], 2, 24_000);
        assert_eq!(stereo.frame_count(), 12_000);
        assert_abs_diff_eq!(stereo.duration(), 0.5);

        let empty = decode_pcm16("", 1, 24_000).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.duration(), 0.0);
    }

    #[test]
    fn realtime_audio_is_tagged_with_rate() {
        let chunk = RealtimeAudio::pcm16(&[0.0; 4], CAPTURE_SAMPLE_RATE);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(&chunk.data)
                .unwrap()
                .len(),
            8
        );
    }

    #[test]
    fn create_resampler_accepts_up_and_down_sampling() {
        assert!(create_resampler(16_000.0, 24_000.0, 1024).is_ok());
        assert!(create_resampler(48_000.0, 16_000.0, 1024).is_ok());
    }
}
