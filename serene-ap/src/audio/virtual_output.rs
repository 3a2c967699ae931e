//! Software output device
//!
//! Plays nothing, but keeps time exactly like a sound card would: the device
//! clock is `tokio::time::Instant` and natural end is a timer scheduled for
//! the remaining buffer duration. Under a paused Tokio clock this makes
//! playback fully deterministic; on a normal runtime it is a headless
//! real-time sink.
//!
//! Recent handles are kept for inspection as lifecycle records; a handle's
//! buffer is released as soon as its run stops or ends.

use crate::audio::device::{
    HandleId, HandleLifecycle, HandlePhase, NaturalEndCallback, OutputDevice, OutputHandle,
    StopReason,
};
use crate::audio::types::DecodedBuffer;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Handles kept for inspection; older finished ones are forgotten
const HISTORY_LIMIT: usize = 256;

/// Snapshot of one handle created by a `VirtualOutput`
#[derive(Debug, Clone, PartialEq)]
pub struct HandleRecord {
    pub id: HandleId,
    pub phase: HandlePhase,
    /// Buffer offset passed to `start`, if started
    pub start_offset: Option<f64>,
    pub gain: f32,
    pub stop_reason: Option<StopReason>,
}

/// Clock-accurate output device that renders no sound
#[derive(Clone)]
pub struct VirtualOutput {
    inner: Arc<VirtualInner>,
}

struct VirtualInner {
    epoch: Instant,
    available: AtomicBool,
    voices: Mutex<Vec<Arc<VirtualVoice>>>,
}

struct VirtualVoice {
    lifecycle: HandleLifecycle,
    duration_seconds: f64,
    /// Held only while the handle may still play
    buffer: Mutex<Option<Arc<DecodedBuffer>>>,
    gain: AtomicU32,
    start_offset: Mutex<Option<f64>>,
    end_timer: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualVoice {
    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    fn record(&self) -> HandleRecord {
        HandleRecord {
            id: self.lifecycle.id(),
            phase: self.lifecycle.phase(),
            start_offset: *self
                .start_offset
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            gain: self.gain(),
            stop_reason: self.lifecycle.stop_reason(),
        }
    }

    fn release_buffer(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn holds_buffer(&self) -> bool {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self
            .end_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(VirtualInner {
                epoch: Instant::now(),
                available: AtomicBool::new(true),
                voices: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Simulate the device disappearing (or coming back)
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Recent handles, oldest first
    pub fn handles(&self) -> Vec<HandleRecord> {
        self.voices().iter().map(|v| v.record()).collect()
    }

    /// Number of handles currently producing output
    pub fn running_handle_count(&self) -> usize {
        self.voices()
            .iter()
            .filter(|v| v.lifecycle.phase() == HandlePhase::Running)
            .count()
    }

    /// Most recently created handle
    pub fn last_handle(&self) -> Option<HandleRecord> {
        self.voices().last().map(|v| v.record())
    }

    /// Number of handles still holding a decoded buffer
    pub fn retained_buffer_count(&self) -> usize {
        self.voices().iter().filter(|v| v.holds_buffer()).count()
    }

    fn voices(&self) -> std::sync::MutexGuard<'_, Vec<Arc<VirtualVoice>>> {
        self.inner
            .voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VirtualOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for VirtualOutput {
    fn name(&self) -> String {
        "virtual".to_string()
    }

    fn now(&self) -> f64 {
        self.inner.epoch.elapsed().as_secs_f64()
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::OutputUnavailable(
                "virtual device disabled".to_string(),
            ))
        }
    }

    fn create_handle(
        &self,
        buffer: Arc<DecodedBuffer>,
        gain: f32,
        on_natural_end: NaturalEndCallback,
    ) -> Result<Box<dyn OutputHandle>> {
        self.check_available()?;

        let voice = Arc::new(VirtualVoice {
            lifecycle: HandleLifecycle::new(on_natural_end),
            duration_seconds: buffer.duration_seconds(),
            buffer: Mutex::new(Some(buffer)),
            gain: AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()),
            start_offset: Mutex::new(None),
            end_timer: Mutex::new(None),
        });

        let mut voices = self.voices();
        voices.push(Arc::clone(&voice));
        if voices.len() > HISTORY_LIMIT {
            let mut excess = voices.len() - HISTORY_LIMIT;
            voices.retain(|v| {
                if excess > 0 && !v.lifecycle.phase().is_live() {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        drop(voices);

        debug!("Virtual output created handle {}", voice.lifecycle.id());
        Ok(Box::new(VirtualHandle { voice }))
    }
}

/// Handle returned by `VirtualOutput`
pub struct VirtualHandle {
    voice: Arc<VirtualVoice>,
}

impl OutputHandle for VirtualHandle {
    fn id(&self) -> HandleId {
        self.voice.lifecycle.id()
    }

    fn start(&mut self, offset_seconds: f64) -> Result<()> {
        if !self.voice.lifecycle.mark_running() {
            return Err(Error::Internal(format!(
                "handle {} cannot start from phase {:?}",
                self.id(),
                self.voice.lifecycle.phase()
            )));
        }

        let duration = self.voice.duration_seconds;
        let offset = if offset_seconds.is_finite() {
            offset_seconds.clamp(0.0, duration)
        } else {
            0.0
        };
        *self
            .voice
            .start_offset
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(offset);

        let remaining = Duration::from_secs_f64(duration - offset);
        let voice = Arc::clone(&self.voice);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            if voice.lifecycle.finish_natural() {
                voice.release_buffer();
            }
        });
        *self
            .voice
            .end_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(timer);

        Ok(())
    }

    fn set_gain(&self, gain: f32) {
        self.voice
            .gain
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn stop(&mut self, reason: StopReason) {
        if self.voice.lifecycle.stop(reason) {
            self.voice.cancel_timer();
            self.voice.release_buffer();
        }
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.voice.lifecycle.stop_reason()
    }

    fn phase(&self) -> HandlePhase {
        self.voice.lifecycle.phase()
    }
}

impl Drop for VirtualHandle {
    fn drop(&mut self) {
        self.stop(StopReason::Teardown);
    }
}
