//! Sample rate conversion using rubato
//!
//! Session audio is decoded at its native rate. When a hardware stream runs
//! at another rate the whole buffer is converted once, before its first run,
//! and the converted copy lives exactly as long as its source buffer.

use crate::audio::types::DecodedBuffer;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

/// Zero frames appended to the input so the interpolator can flush its window
const FLUSH_FRAMES: usize = 16;

/// Convert `buffer` to `output_rate`.
///
/// The result keeps the source duration: it holds
/// `round(frame_count * output_rate / input_rate)` frames, with the
/// interpolator delay removed so output frame 0 lines up with source frame 0.
///
/// # Errors
/// `Error::Resample` if either rate is zero or rubato rejects the conversion.
pub fn resample(buffer: &DecodedBuffer, output_rate: u32) -> Result<DecodedBuffer> {
    let input_rate = buffer.sample_rate();
    if input_rate == 0 || output_rate == 0 {
        return Err(Error::Resample(format!(
            "cannot convert {} Hz to {} Hz",
            input_rate, output_rate
        )));
    }
    if input_rate == output_rate {
        debug!("Sample rate already at {}Hz, skipping resample", output_rate);
        return Ok(buffer.clone());
    }

    let channels = buffer.channel_count();
    let frames = buffer.frame_count();
    if channels == 0 || frames == 0 {
        return Ok(DecodedBuffer::new(vec![Vec::new(); channels], output_rate));
    }

    debug!(
        "Resampling {} frames from {}Hz to {}Hz ({} channels)",
        frames, input_rate, output_rate, channels
    );

    let ratio = output_rate as f64 / input_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;
    let chunk_size = frames + FLUSH_FRAMES;

    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        chunk_size,
        channels,
    )
    .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))?;

    let padded: Vec<Vec<f32>> = (0..channels)
        .map(|ch| {
            let mut samples = Vec::with_capacity(chunk_size);
            samples.extend_from_slice(buffer.channel(ch).unwrap_or(&[]));
            samples.resize(chunk_size, 0.0);
            samples
        })
        .collect();

    let mut output = resampler
        .process(&padded, None)
        .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;

    let delay = resampler.output_delay();
    for samples in output.iter_mut() {
        samples.drain(..delay.min(samples.len()));
        samples.resize(expected, 0.0);
    }

    debug!("Resampled to {} frames (delay {} frames)", expected, delay);
    Ok(DecodedBuffer::new(output, output_rate))
}

struct CacheEntry {
    source: Weak<DecodedBuffer>,
    converted: Arc<DecodedBuffer>,
}

/// Converted copies of live buffers, keyed by the source `Arc`.
///
/// An entry is dropped as soon as its source buffer is gone, so a superseded
/// payload never keeps its converted copy alive past the next lookup or prune.
#[derive(Default)]
pub struct ResampleCache {
    entries: Mutex<Vec<CacheEntry>>,
}

impl ResampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer to render for `source` on a stream running at `output_rate`.
    ///
    /// Returns `source` itself when the rates already match.
    pub fn get_or_convert(
        &self,
        source: &Arc<DecodedBuffer>,
        output_rate: u32,
    ) -> Result<Arc<DecodedBuffer>> {
        if source.sample_rate() == output_rate {
            return Ok(Arc::clone(source));
        }
        if let Some(converted) = self.lookup(source, output_rate) {
            return Ok(converted);
        }

        // Convert without holding the lock; a concurrent miss may also convert
        let converted = Arc::new(resample(source, output_rate)?);

        let mut entries = self.entries();
        if let Some(existing) = find(&entries, source, output_rate) {
            return Ok(existing);
        }
        entries.push(CacheEntry {
            source: Arc::downgrade(source),
            converted: Arc::clone(&converted),
        });
        Ok(converted)
    }

    /// Drop entries whose source buffer has been released
    pub fn prune(&self) {
        self.entries().retain(|entry| entry.source.strong_count() > 0);
    }

    /// Number of converted buffers held after pruning
    pub fn len(&self) -> usize {
        self.prune();
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, source: &Arc<DecodedBuffer>, output_rate: u32) -> Option<Arc<DecodedBuffer>> {
        let mut entries = self.entries();
        entries.retain(|entry| entry.source.strong_count() > 0);
        find(&entries, source, output_rate)
    }

    fn entries(&self) -> MutexGuard<'_, Vec<CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find(
    entries: &[CacheEntry],
    source: &Arc<DecodedBuffer>,
    output_rate: u32,
) -> Option<Arc<DecodedBuffer>> {
    let key = Arc::downgrade(source);
    entries
        .iter()
        .find(|entry| {
            Weak::ptr_eq(&entry.source, &key) && entry.converted.sample_rate() == output_rate
        })
        .map(|entry| Arc::clone(&entry.converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn constant(value: f32, frames: usize, rate: u32) -> DecodedBuffer {
        DecodedBuffer::new(vec![vec![value; frames]], rate)
    }

    fn sine(freq: f32, amplitude: f32, frames: usize, rate: u32) -> DecodedBuffer {
        let samples = (0..frames)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect();
        DecodedBuffer::new(vec![samples], rate)
    }

    #[test]
    fn test_upsample_keeps_duration_and_level() {
        let source = constant(0.25, 2_400, 24_000);
        let converted = resample(&source, 48_000).unwrap();

        assert_eq!(converted.sample_rate(), 48_000);
        assert_eq!(converted.frame_count(), 4_800);
        assert_eq!(converted.duration_seconds(), source.duration_seconds());

        let samples = converted.channel(0).unwrap();
        for (i, sample) in samples[16..samples.len() - 16].iter().enumerate() {
            assert!((sample - 0.25).abs() < 1e-3, "frame {}: {}", i + 16, sample);
        }
    }

    #[test]
    fn test_non_integer_ratio_preserves_tone_amplitude() {
        let source = sine(440.0, 0.5, 24_000, 24_000);
        let converted = resample(&source, 44_100).unwrap();

        assert_eq!(converted.frame_count(), 44_100);
        let samples = converted.channel(0).unwrap();
        let peak = samples[64..samples.len() - 64]
            .iter()
            .fold(0.0f32, |peak, s| peak.max(s.abs()));
        assert!((0.49..=0.51).contains(&peak), "peak {}", peak);
    }

    #[test]
    fn test_stereo_channels_stay_separate() {
        let source = DecodedBuffer::new(vec![vec![0.5; 1_200], vec![-0.5; 1_200]], 24_000);
        let converted = resample(&source, 48_000).unwrap();

        assert_eq!(converted.channel_count(), 2);
        assert!((converted.sample(0, 1_200) - 0.5).abs() < 1e-3);
        assert!((converted.sample(1, 1_200) + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let source = constant(0.0, 10, 24_000);
        assert!(matches!(resample(&source, 0), Err(Error::Resample(_))));
    }

    #[test]
    fn test_cache_passes_through_matching_rate() {
        let cache = ResampleCache::new();
        let source = Arc::new(constant(0.1, 100, 24_000));

        let buffer = cache.get_or_convert(&source, 24_000).unwrap();
        assert!(Arc::ptr_eq(&buffer, &source));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_converts_once_per_source() {
        let cache = ResampleCache::new();
        let source = Arc::new(constant(0.1, 2_400, 24_000));

        let first = cache.get_or_convert(&source, 48_000).unwrap();
        let second = cache.get_or_convert(&source, 48_000).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_releases_converted_copy_with_source() {
        let cache = ResampleCache::new();
        let source = Arc::new(constant(0.1, 2_400, 24_000));
        let converted = cache.get_or_convert(&source, 48_000).unwrap();
        let weak = Arc::downgrade(&converted);
        drop(converted);

        drop(source);
        cache.prune();

        assert!(cache.is_empty());
        assert!(weak.upgrade().is_none());
    }
}
