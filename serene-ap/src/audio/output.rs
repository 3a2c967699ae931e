//! Audio output using cpal
//!
//! Opens one output stream for the lifetime of the device and renders
//! whichever handle is currently installed in its voice slot; silence
//! otherwise. The `cpal::Stream` is owned by a dedicated output thread so the
//! device itself can be shared across tasks.
//!
//! The device clock counts frames written by the output callback, so
//! positions follow the audio actually handed to the hardware. When the
//! hardware refuses the payload rate, buffers are converted with rubato
//! (see `resampler`) and rendered frame for frame.

use crate::audio::device::{
    HandleId, HandleLifecycle, HandlePhase, NaturalEndCallback, OutputDevice, OutputHandle,
    StopReason,
};
use crate::audio::resampler::ResampleCache;
use crate::audio::types::{AudioFormat, DecodedBuffer};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

type VoiceSlot = Arc<Mutex<Option<Arc<CpalVoice>>>>;

/// Parameters of the stream actually opened
#[derive(Debug, Clone)]
struct StreamInfo {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
}

/// Output device backed by the system audio host.
pub struct CpalOutput {
    info: StreamInfo,
    /// Frames written by the output callback since the stream started
    frames_rendered: Arc<AtomicU64>,
    slot: VoiceSlot,
    resampled: ResampleCache,
    /// Stream error flag, set by the cpal error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::OutputUnavailable(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device and start its stream.
    ///
    /// # Arguments
    /// - `device_name`: Optional device name (None = default device)
    /// - `buffer_size`: Optional buffer size in frames (None = device default)
    /// - `preferred`: Format to ask the hardware for (normally the payload format)
    ///
    /// If the requested device is not found the default device is used instead.
    ///
    /// # Errors
    /// `Error::OutputUnavailable` if no device can be opened or the stream fails to start.
    pub fn open(
        device_name: Option<&str>,
        buffer_size: Option<u32>,
        preferred: AudioFormat,
    ) -> Result<Self> {
        let slot: VoiceSlot = Arc::new(Mutex::new(None));
        let error_flag = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU32::new(0));
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<StreamInfo>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let requested = device_name.map(str::to_string);
        let thread_slot = Arc::clone(&slot);
        let thread_error_flag = Arc::clone(&error_flag);
        let thread_error_count = Arc::clone(&error_count);
        let thread_frames = Arc::clone(&frames_rendered);

        let thread = std::thread::Builder::new()
            .name("serene-audio-out".to_string())
            .spawn(move || {
                let opened = open_stream(
                    requested.as_deref(),
                    buffer_size,
                    preferred,
                    thread_slot,
                    thread_frames,
                    thread_error_flag,
                    thread_error_count,
                );
                let stream = match opened {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until shutdown is requested or the sender is dropped
                let _ = shutdown_rx.recv();

                if let Err(e) = stream.pause() {
                    warn!("Failed to pause stream on shutdown: {}", e);
                }
                drop(stream);
                debug!("Audio output thread exiting");
            })
            .map_err(|e| Error::OutputUnavailable(format!("Failed to spawn output thread: {}", e)))?;

        let info = ready_rx.recv().map_err(|_| {
            Error::OutputUnavailable("Output thread exited during startup".to_string())
        })??;

        info!(
            "Audio output ready: {} ({} Hz, {} ch, {:?})",
            info.device_name, info.sample_rate, info.channels, info.sample_format
        );

        Ok(Self {
            info,
            frames_rendered,
            slot,
            resampled: ResampleCache::new(),
            error_flag,
            error_count,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Get sample rate of the hardware stream.
    pub fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    /// Get channel count of the hardware stream.
    pub fn channels(&self) -> u16 {
        self.info.channels
    }

    /// Number of stream errors reported by the host since open
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
        if let Some(thread) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> String {
        self.info.device_name.clone()
    }

    fn now(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.info.sample_rate as f64
    }

    fn check_available(&self) -> Result<()> {
        // Converted copies of released buffers go first
        self.resampled.prune();

        if self.error_flag.load(Ordering::SeqCst) {
            return Err(Error::OutputUnavailable(format!(
                "stream on {} reported {} error(s)",
                self.info.device_name,
                self.error_count()
            )));
        }
        let thread_alive = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false);
        if !thread_alive {
            return Err(Error::OutputUnavailable(
                "audio output thread is not running".to_string(),
            ));
        }
        Ok(())
    }

    fn prepare(&self, buffer: &Arc<DecodedBuffer>) -> Result<()> {
        if buffer.sample_rate() != self.info.sample_rate {
            info!(
                "Converting {:.1}s of audio from {} Hz to device rate {} Hz",
                buffer.duration_seconds(),
                buffer.sample_rate(),
                self.info.sample_rate
            );
        }
        self.resampled
            .get_or_convert(buffer, self.info.sample_rate)
            .map(|_| ())
    }

    fn create_handle(
        &self,
        buffer: Arc<DecodedBuffer>,
        gain: f32,
        on_natural_end: NaturalEndCallback,
    ) -> Result<Box<dyn OutputHandle>> {
        self.check_available()?;

        let buffer = self.resampled.get_or_convert(&buffer, self.info.sample_rate)?;
        let voice = Arc::new(CpalVoice::new(buffer, gain, on_natural_end));

        Ok(Box::new(CpalHandle {
            voice,
            slot: Arc::clone(&self.slot),
        }))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(voice) = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            voice.lifecycle.stop(StopReason::Teardown);
        }
        self.shutdown();
    }
}

/// One playback run rendered by the output callback
struct CpalVoice {
    lifecycle: HandleLifecycle,
    /// Audio at the stream rate
    buffer: Arc<DecodedBuffer>,
    gain: AtomicU32,
    /// Next buffer frame to render
    cursor: AtomicUsize,
}

impl CpalVoice {
    fn new(buffer: Arc<DecodedBuffer>, gain: f32, on_natural_end: NaturalEndCallback) -> Self {
        Self {
            lifecycle: HandleLifecycle::new(on_natural_end),
            buffer,
            gain: AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Fill `data` from the buffer. Returns true once the buffer is exhausted.
    fn render<T>(&self, data: &mut [T], channels: usize) -> bool
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let gain = f32::from_bits(self.gain.load(Ordering::Relaxed));
        let frame_count = self.buffer.frame_count();
        let source_channels = self.buffer.channel_count().max(1);
        let mut cursor = self.cursor.load(Ordering::Acquire);

        for frame in data.chunks_mut(channels) {
            if cursor >= frame_count {
                frame.fill(<T as cpal::Sample>::EQUILIBRIUM);
                continue;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                // Mono sources are duplicated onto every output channel
                let source = ch.min(source_channels - 1);
                let value = (self.buffer.sample(source, cursor) * gain).clamp(-1.0, 1.0);
                *sample = <T as cpal::Sample>::from_sample(value);
            }
            cursor += 1;
        }

        self.cursor.store(cursor, Ordering::Release);
        cursor >= frame_count
    }
}

/// Handle returned by `CpalOutput`
pub struct CpalHandle {
    voice: Arc<CpalVoice>,
    slot: VoiceSlot,
}

impl CpalHandle {
    fn install(&self) {
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&self.voice));
        if let Some(previous) = previous {
            // Only one voice may sound at a time
            previous.lifecycle.stop(StopReason::Superseded);
        }
    }

    fn uninstall(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .map(|current| Arc::ptr_eq(current, &self.voice))
            .unwrap_or(false)
        {
            slot.take();
        }
    }
}

impl OutputHandle for CpalHandle {
    fn id(&self) -> HandleId {
        self.voice.lifecycle.id()
    }

    fn start(&mut self, offset_seconds: f64) -> Result<()> {
        // The voice buffer runs at the stream rate, so this also maps the
        // offset through any rate conversion
        let offset_frames = self.voice.buffer.frame_at(offset_seconds);
        self.voice.cursor.store(offset_frames, Ordering::Release);

        if !self.voice.lifecycle.mark_running() {
            return Err(Error::Internal(format!(
                "handle {} cannot start from phase {:?}",
                self.id(),
                self.voice.lifecycle.phase()
            )));
        }

        self.install();
        debug!(
            "Output handle {} started at frame {}",
            self.id(),
            offset_frames
        );
        Ok(())
    }

    fn set_gain(&self, gain: f32) {
        self.voice
            .gain
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn stop(&mut self, reason: StopReason) {
        if self.voice.lifecycle.stop(reason) {
            self.uninstall();
        }
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.voice.lifecycle.stop_reason()
    }

    fn phase(&self) -> HandlePhase {
        self.voice.lifecycle.phase()
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.stop(StopReason::Teardown);
    }
}

/// Runs on the output thread: pick a device and start its stream
fn open_stream(
    device_name: Option<&str>,
    buffer_size: Option<u32>,
    preferred: AudioFormat,
    slot: VoiceSlot,
    frames_rendered: Arc<AtomicU64>,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
) -> Result<(Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (mut config, sample_format) = get_best_config(&device, preferred)?;

    if let Some(size) = buffer_size {
        config.buffer_size = cpal::BufferSize::Fixed(size);
        debug!("Using requested buffer size: {} frames", size);
    }

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );

    let callback = CallbackState {
        slot,
        frames_rendered,
        error_flag,
        error_count,
    };
    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, callback)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, callback)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, callback)?,
        other => {
            return Err(Error::OutputUnavailable(format!(
                "Unsupported sample format: {:?}",
                other
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::OutputUnavailable(format!("Failed to start stream: {}", e)))?;

    let info = StreamInfo {
        device_name,
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        sample_format,
    };
    Ok((stream, info))
}

fn select_device(host: &cpal::Host, device_name: Option<&str>) -> Result<Device> {
    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::OutputUnavailable(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!(
            "Requested device '{}' not found, falling back to default device",
            name
        );
    }

    host.default_output_device()
        .ok_or_else(|| Error::OutputUnavailable("No default output device found".to_string()))
}

/// Prefer a configuration at the payload rate, f32 first, then any sample format.
/// Falls back to the device default.
fn get_best_config(device: &Device, preferred: AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
    let rate = preferred.sample_rate;
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::OutputUnavailable(format!("Failed to get device configs: {}", e)))?
        .filter(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
        .filter(|c| {
            matches!(
                c.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .collect();

    let chosen = supported
        .iter()
        .find(|c| c.channels() == preferred.channels && c.sample_format() == SampleFormat::F32)
        .or_else(|| supported.iter().find(|c| c.channels() == preferred.channels))
        .or_else(|| supported.iter().find(|c| c.sample_format() == SampleFormat::F32))
        .or_else(|| supported.first());

    if let Some(range) = chosen {
        let sample_format = range.sample_format();
        let config = range.clone().with_sample_rate(cpal::SampleRate(rate)).config();
        return Ok((config, sample_format));
    }

    debug!("Device does not support {} Hz, using its default config", rate);
    let default = device
        .default_output_config()
        .map_err(|e| Error::OutputUnavailable(format!("Failed to get default config: {}", e)))?;

    Ok((default.config(), default.sample_format()))
}

/// Shared state moved into the stream callbacks
struct CallbackState {
    slot: VoiceSlot,
    frames_rendered: Arc<AtomicU64>,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

/// Output callback body: render the installed voice (or silence) and advance
/// the device clock by the frames written.
fn fill_output<T>(slot: &VoiceSlot, frames_rendered: &AtomicU64, data: &mut [T], channels: usize)
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = channels.max(1);
    let mut slot_guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    let finished = match slot_guard.as_ref() {
        Some(voice) => voice.render(data, channels),
        None => {
            data.fill(<T as cpal::Sample>::EQUILIBRIUM);
            false
        }
    };
    frames_rendered.fetch_add((data.len() / channels) as u64, Ordering::Release);

    if finished {
        if let Some(voice) = slot_guard.take() {
            drop(slot_guard);
            voice.lifecycle.finish_natural();
        }
    }
}

fn build_stream<T>(device: &Device, config: &StreamConfig, state: CallbackState) -> Result<Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let CallbackState {
        slot,
        frames_rendered,
        error_flag,
        error_count,
    } = state;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_output(&slot, &frames_rendered, data, channels);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_flag.store(true, Ordering::SeqCst);
                error_count.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::OutputUnavailable(format!("Failed to build stream: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn voice(samples: Vec<f32>, sample_rate: u32) -> CpalVoice {
        CpalVoice::new(
            Arc::new(DecodedBuffer::new(vec![samples], sample_rate)),
            1.0,
            Box::new(|_| {}),
        )
    }

    #[test]
    fn test_render_duplicates_mono_to_stereo() {
        let v = voice(vec![0.5, -0.5], 24_000);
        let mut out = [0.0f32; 4];
        let done = v.render(&mut out, 2);

        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
        assert!(done);
    }

    #[test]
    fn test_render_applies_gain_and_pads_silence() {
        let v = voice(vec![0.8], 24_000);
        v.gain.store(0.5f32.to_bits(), Ordering::Relaxed);
        let mut out = [1.0f32; 3];
        let done = v.render(&mut out, 1);

        assert_eq!(out, [0.4, 0.0, 0.0]);
        assert!(done);
    }

    #[test]
    fn test_render_advances_one_frame_per_output_frame() {
        let v = voice(vec![0.1, 0.2, 0.3, 0.4], 48_000);
        let mut out = [0.0f32; 2];

        assert!(!v.render(&mut out, 1));
        assert_eq!(out, [0.1, 0.2]);
        assert!(v.render(&mut out, 1));
        assert_eq!(out, [0.3, 0.4]);
    }

    #[test]
    fn test_render_i16_output() {
        let v = voice(vec![0.5], 24_000);
        let mut out = [0i16; 1];
        v.render(&mut out, 1);
        assert_eq!(out[0], 16384);
    }

    #[test]
    fn test_start_offset_uses_stream_rate_frames() {
        let slot: VoiceSlot = Arc::new(Mutex::new(None));
        let converted = Arc::new(DecodedBuffer::new(vec![vec![0.0; 96_000]], 48_000));
        let mut handle = CpalHandle {
            voice: Arc::new(CpalVoice::new(converted, 1.0, Box::new(|_| {}))),
            slot: Arc::clone(&slot),
        };

        handle.start(0.5).unwrap();

        assert_eq!(handle.voice.cursor.load(Ordering::Acquire), 24_000);
        assert!(slot.lock().unwrap().is_some());
    }

    #[test]
    fn test_clock_advances_while_idle() {
        let slot: VoiceSlot = Arc::new(Mutex::new(None));
        let frames = AtomicU64::new(0);
        let mut out = [1.0f32; 128];

        fill_output(&slot, &frames, &mut out, 2);

        assert_eq!(frames.load(Ordering::Acquire), 64);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_clock_matches_rendered_position() {
        let ended = Arc::new(AtomicUsize::new(0));
        let ended_clone = Arc::clone(&ended);
        let voice = Arc::new(CpalVoice::new(
            Arc::new(DecodedBuffer::new(vec![vec![0.25; 100]], 24_000)),
            1.0,
            Box::new(move |_| {
                ended_clone.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        assert!(voice.lifecycle.mark_running());
        let slot: VoiceSlot = Arc::new(Mutex::new(Some(Arc::clone(&voice))));
        let frames = AtomicU64::new(0);

        let mut out = [0.0f32; 30];
        fill_output(&slot, &frames, &mut out, 1);
        assert_eq!(frames.load(Ordering::Acquire), 30);
        assert_eq!(voice.cursor.load(Ordering::Acquire), 30);
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        let mut out = [0.0f32; 100];
        fill_output(&slot, &frames, &mut out, 1);
        assert_eq!(frames.load(Ordering::Acquire), 130);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(slot.lock().unwrap().is_none());
    }
}
