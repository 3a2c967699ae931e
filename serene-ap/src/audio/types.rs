//! Core audio data types
//!
//! Defines the encoded payload handed over by the session generator and the
//! decoded buffer the transport controller plays from.

use crate::error::Result;
use base64::Engine as _;
use serene_common::config::{PlaybackConfig, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Bytes per 16-bit PCM sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// PCM layout shared by payloads and the output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,

    /// Interleaved channels per frame
    pub channels: u16,
}

impl AudioFormat {
    /// Format of generated session narration: 24 kHz mono
    pub const SESSION: AudioFormat = AudioFormat {
        sample_rate: DEFAULT_SAMPLE_RATE,
        channels: DEFAULT_CHANNELS,
    };

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Size of one interleaved 16-bit frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::SESSION
    }
}

impl From<&PlaybackConfig> for AudioFormat {
    fn from(config: &PlaybackConfig) -> Self {
        Self::new(config.sample_rate, config.channels)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz, {} ch", self.sample_rate, self.channels)
    }
}

/// One session's audio as raw little-endian 16-bit PCM.
///
/// Already demuxed from its transport encoding. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    bytes: Vec<u8>,
    format: AudioFormat,
}

impl EncodedPayload {
    /// Wrap raw PCM bytes in the session format (24 kHz mono)
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_format(bytes, AudioFormat::SESSION)
    }

    /// Wrap raw PCM bytes declared to be in `format`
    pub fn with_format(bytes: impl Into<Vec<u8>>, format: AudioFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    /// Decode the text-safe transport encoding used by the session generator.
    ///
    /// Standard base64 alphabet; whitespace anywhere in the text (line
    /// wrapping, trailing newline) is ignored.
    ///
    /// # Errors
    /// `Error::Payload` if the text is not valid base64.
    pub fn from_base64(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact.as_bytes())?;
        Ok(Self::from_bytes(bytes))
    }

    /// Read a payload from disk, either raw PCM or base64 text
    pub async fn from_file(path: &std::path::Path, base64_text: bool) -> Result<Self> {
        if base64_text {
            let text = tokio::fs::read_to_string(path).await?;
            Self::from_base64(&text)
        } else {
            let bytes = tokio::fs::read(path).await?;
            Ok(Self::from_bytes(bytes))
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.format.channels
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded audio ready for playback.
///
/// **Format:**
/// - Samples are f32 in [-1.0, 1.0)
/// - Planar: one `Vec<f32>` per channel, each `frame_count` long
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    /// Per-channel sample arrays
    samples: Vec<Vec<f32>>,

    /// Frames per channel
    frame_count: usize,

    /// Frames per second
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Build a buffer from planar channel data.
    ///
    /// All channels must share one length; the shortest one wins otherwise.
    pub fn new(samples: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frame_count = samples.iter().map(Vec::len).min().unwrap_or(0);
        let samples = samples
            .into_iter()
            .map(|mut ch| {
                ch.truncate(frame_count);
                ch
            })
            .collect();

        Self {
            samples,
            frame_count,
            sample_rate,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.samples.len()
    }

    /// Duration in seconds (`frame_count / sample_rate`)
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.samples.get(index).map(Vec::as_slice)
    }

    /// Sample at `frame` on `channel`, or silence past the end
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.samples
            .get(channel)
            .and_then(|ch| ch.get(frame))
            .copied()
            .unwrap_or(0.0)
    }

    /// Frame index for a buffer offset in seconds, clamped to the buffer
    pub fn frame_at(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        let frame = (seconds * self.sample_rate as f64).round() as usize;
        frame.min(self.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_format() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, 24_000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bytes_per_frame(), 2);
        assert_eq!(AudioFormat::new(48_000, 2).bytes_per_frame(), 4);
    }

    #[test]
    fn test_payload_from_base64() {
        // Two samples: 0x0001, 0xFFFF
        let payload = EncodedPayload::from_base64("AQD//w==\n").unwrap();
        assert_eq!(payload.bytes(), &[0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(payload.format(), AudioFormat::SESSION);
    }

    #[test]
    fn test_payload_from_wrapped_base64() {
        let payload = EncodedPayload::from_base64("AQD/\n/w==\r\n").unwrap();
        assert_eq!(payload.len(), 4);
    }

    #[test]
    fn test_payload_invalid_base64() {
        let result = EncodedPayload::from_base64("not base64 !!");
        assert!(matches!(result, Err(crate::Error::Payload(_))));
    }

    #[test]
    fn test_buffer_duration_and_frames() {
        let buffer = DecodedBuffer::new(vec![vec![0.0; 48_000]], 24_000);
        assert_eq!(buffer.frame_count(), 48_000);
        assert_eq!(buffer.duration_seconds(), 2.0);
        assert_eq!(buffer.frame_at(1.0), 24_000);
        assert_eq!(buffer.frame_at(10.0), 48_000);
        assert_eq!(buffer.frame_at(-1.0), 0);
    }

    #[test]
    fn test_buffer_sample_past_end_is_silence() {
        let buffer = DecodedBuffer::new(vec![vec![0.5, -0.5]], 24_000);
        assert_eq!(buffer.sample(0, 1), -0.5);
        assert_eq!(buffer.sample(0, 2), 0.0);
        assert_eq!(buffer.sample(1, 0), 0.0);
    }

    #[test]
    fn test_buffer_uneven_channels_truncated() {
        let buffer = DecodedBuffer::new(vec![vec![0.1; 10], vec![0.2; 8]], 24_000);
        assert_eq!(buffer.frame_count(), 8);
        assert_eq!(buffer.channel(0).unwrap().len(), 8);
    }
}
