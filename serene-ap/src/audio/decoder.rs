//! PCM payload decoder
//!
//! Turns little-endian signed 16-bit interleaved PCM into planar f32 samples.
//! No resampling and no channel mixing: the payload must already be in the
//! output format.
//!
//! Parsing is lenient about length: a trailing partial frame (for instance the
//! odd last byte of a mono payload) is dropped rather than rejected.

use crate::audio::types::{AudioFormat, DecodedBuffer, EncodedPayload, BYTES_PER_SAMPLE};
use crate::error::{Error, Result};
use tracing::debug;

/// Normalisation divisor for 16-bit samples
const I16_SCALE: f32 = 32768.0;

/// Decode a payload for an output configured as `expected`.
///
/// # Errors
/// - `Error::UnsupportedFormat` if the payload's channel count or sample rate
///   differs from `expected`, or either is zero
/// - `Error::Decode` if the payload is empty or holds less than one whole frame
pub fn decode(payload: &EncodedPayload, expected: AudioFormat) -> Result<DecodedBuffer> {
    let format = payload.format();

    if format.channels == 0 || format.sample_rate == 0 {
        return Err(Error::UnsupportedFormat(format!(
            "payload declares {}",
            format
        )));
    }
    if format.channels != expected.channels {
        return Err(Error::UnsupportedFormat(format!(
            "payload has {} channel(s), output expects {}",
            format.channels, expected.channels
        )));
    }
    if format.sample_rate != expected.sample_rate {
        return Err(Error::UnsupportedFormat(format!(
            "payload sample rate {} Hz, output expects {} Hz",
            format.sample_rate, expected.sample_rate
        )));
    }

    decode_pcm16(payload.bytes(), format.sample_rate, format.channels)
}

/// Decode raw interleaved 16-bit little-endian PCM.
///
/// `frame_count = bytes.len() / 2 / channels`; remainder bytes are discarded.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedBuffer> {
    if channels == 0 {
        return Err(Error::UnsupportedFormat("zero channels".to_string()));
    }
    if bytes.is_empty() {
        return Err(Error::Decode("payload is empty".to_string()));
    }

    let channel_count = channels as usize;
    let frame_bytes = BYTES_PER_SAMPLE * channel_count;
    let frame_count = bytes.len() / frame_bytes;

    if frame_count == 0 {
        return Err(Error::Decode(format!(
            "payload of {} byte(s) holds no whole {}-byte frame",
            bytes.len(),
            frame_bytes
        )));
    }

    let dropped = bytes.len() - frame_count * frame_bytes;
    if dropped > 0 {
        debug!("Dropping {} trailing byte(s) of partial frame", dropped);
    }

    let mut planes: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frame_count))
        .collect();

    for frame in bytes.chunks_exact(frame_bytes) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(BYTES_PER_SAMPLE)) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            plane.push(value as f32 / I16_SCALE);
        }
    }

    debug!(
        "Decoded {} frame(s) x {} channel(s) at {} Hz",
        frame_count, channel_count, sample_rate
    );

    Ok(DecodedBuffer::new(planes, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_normalisation() {
        let bytes = pcm(&[0, i16::MIN, i16::MAX, 16384, -16384]);
        let buffer = decode_pcm16(&bytes, 24_000, 1).unwrap();
        let ch = buffer.channel(0).unwrap();

        assert_eq!(ch[0], 0.0);
        assert_eq!(ch[1], -1.0);
        assert_eq!(ch[2], 32767.0 / 32768.0);
        assert_eq!(ch[3], 0.5);
        assert_eq!(ch[4], -0.5);
        assert!(ch.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_even_length_frame_count() {
        let bytes = vec![0u8; 2 * 1200];
        let buffer = decode_pcm16(&bytes, 24_000, 1).unwrap();
        assert_eq!(buffer.frame_count(), 1200);
        assert_eq!(buffer.duration_seconds(), 0.05);
    }

    #[test]
    fn test_odd_trailing_byte_dropped() {
        let mut bytes = pcm(&[100, 200, 300]);
        bytes.push(0x7F);
        let buffer = decode_pcm16(&bytes, 24_000, 1).unwrap();
        assert_eq!(buffer.frame_count(), 3);
    }

    #[test]
    fn test_stereo_deinterleave_and_partial_frame() {
        // L R L R + 2 stray bytes of a third frame
        let mut bytes = pcm(&[16384, -16384, 0, 8192]);
        bytes.extend_from_slice(&[1, 2]);
        let buffer = decode_pcm16(&bytes, 24_000, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.0]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, 0.25]);
    }

    #[test]
    fn test_empty_payload_is_decode_error() {
        let result = decode_pcm16(&[], 24_000, 1);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_single_byte_is_decode_error() {
        let result = decode_pcm16(&[0x01], 24_000, 1);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_channel_mismatch_is_unsupported() {
        let payload = EncodedPayload::with_format(pcm(&[1, 2, 3, 4]), AudioFormat::new(24_000, 2));
        let result = decode(&payload, AudioFormat::SESSION);
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_sample_rate_mismatch_is_unsupported() {
        let payload = EncodedPayload::with_format(pcm(&[1, 2]), AudioFormat::new(44_100, 1));
        let result = decode(&payload, AudioFormat::SESSION);
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_decode_is_repeatable() {
        let payload = EncodedPayload::from_bytes(pcm(&[5, -5, 10]));
        let first = decode(&payload, AudioFormat::SESSION).unwrap();
        let second = decode(&payload, AudioFormat::SESSION).unwrap();
        assert_eq!(first, second);
    }
}
