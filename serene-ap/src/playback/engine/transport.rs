//! Transport operations
//!
//! None of these fail: requests that make no sense in the current state are
//! logged and ignored, and device failures are reported as `OutputError`
//! events.

use super::core::PlaybackEngine;
use crate::audio::device::StopReason;
use crate::error::{Error, Result};
use crate::playback::clock::clamp_position;
use crate::playback::state::PlaybackSession;
use serene_common::events::{PlaybackState, PlayerEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl PlaybackEngine {
    /// Start output from the stored position.
    ///
    /// No-op without a buffer or when already playing. A session paused at
    /// the end of its buffer starts again from 0.
    pub async fn play(&self) {
        let mut session = self.inner.session.lock().await;
        self.play_locked(&mut session);
    }

    /// Stop output, keeping the position reached. No-op unless playing.
    pub async fn pause(&self) {
        let mut session = self.inner.session.lock().await;
        self.pause_locked(&mut session);
    }

    /// Move to `target_seconds`, clamped to the buffer.
    ///
    /// While playing, output restarts at the new position; otherwise the
    /// position is stored for the next `play`. No-op without a buffer.
    pub async fn seek(&self, target_seconds: f64) {
        let mut session = self.inner.session.lock().await;
        self.seek_locked(&mut session, target_seconds);
    }

    /// Set the volume, clamped to [0, 1].
    ///
    /// Applies to the running output at once and is kept for later runs.
    pub async fn set_volume(&self, volume: f32) {
        let mut session = self.inner.session.lock().await;
        self.set_volume_locked(&mut session, volume);
    }

    /// Pause if playing, play otherwise
    pub async fn toggle_play_pause(&self) {
        let mut session = self.inner.session.lock().await;
        if session.state == PlaybackState::Playing {
            self.pause_locked(&mut session);
        } else {
            self.play_locked(&mut session);
        }
    }

    /// Seek relative to the current position
    pub async fn skip(&self, delta_seconds: f64) {
        let mut session = self.inner.session.lock().await;
        let current = session.clock.position(self.inner.device.now());
        self.seek_locked(&mut session, current + delta_seconds);
    }

    /// Skip forward by the configured step
    pub async fn skip_forward(&self) {
        self.skip(self.inner.settings.skip_seconds).await;
    }

    /// Skip backward by the configured step
    pub async fn skip_backward(&self) {
        self.skip(-self.inner.settings.skip_seconds).await;
    }

    /// Mute when audible, otherwise restore full volume. Returns the new volume.
    pub async fn toggle_mute(&self) -> f32 {
        let mut session = self.inner.session.lock().await;
        let volume = if session.volume > 0.0 { 0.0 } else { 1.0 };
        self.set_volume_locked(&mut session, volume);
        session.volume
    }

    fn play_locked(&self, session: &mut PlaybackSession) {
        if session.buffer.is_none() {
            warn!("Play ignored: no buffer loaded");
            return;
        }
        if session.state == PlaybackState::Playing {
            warn!("Play ignored: already playing");
            return;
        }

        if session.clock.at_end() {
            debug!("Position at end of buffer, restarting from 0");
            session.clock.set_pause_position(0.0);
        }

        let offset = session.clock.pause_position();
        match self.start_run(session, offset) {
            Ok(()) => {
                self.set_state(session, PlaybackState::Playing);
                info!("Playback started at {:.3}s", offset);
            }
            Err(e) => self.report_output_error(&e),
        }
        self.publish_status(session);
    }

    fn pause_locked(&self, session: &mut PlaybackSession) {
        if session.state != PlaybackState::Playing {
            warn!("Pause ignored: state is {}", session.state);
            return;
        }

        self.cancel_observer();
        let position = session.clock.freeze(self.inner.device.now());
        self.stop_output(session, StopReason::User);
        self.set_state(session, PlaybackState::Paused);
        self.publish_status(session);

        info!("Playback paused at {:.3}s", position);
    }

    fn seek_locked(&self, session: &mut PlaybackSession, target_seconds: f64) {
        if session.buffer.is_none() {
            warn!("Seek ignored: no buffer loaded");
            return;
        }

        let target = clamp_position(target_seconds, session.duration());

        if session.state == PlaybackState::Playing {
            self.cancel_observer();
            self.stop_output(session, StopReason::Seek);
            session.clock.set_pause_position(target);

            if let Err(e) = self.start_run(session, target) {
                self.report_output_error(&e);
                self.set_state(session, PlaybackState::Paused);
            }
        } else {
            session.clock.set_pause_position(target);
        }

        self.inner.events.emit_lossy(PlayerEvent::Seeked {
            position_seconds: target,
            timestamp: chrono::Utc::now(),
        });
        self.publish_status(session);

        info!(
            "Seek to {:.3}s (requested {:.3}s)",
            target, target_seconds
        );
    }

    fn set_volume_locked(&self, session: &mut PlaybackSession, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };

        if let Some(handle) = session.active_output.as_ref() {
            handle.set_gain(volume);
        }
        session.volume = volume;

        self.inner.events.emit_lossy(PlayerEvent::VolumeChanged {
            volume,
            timestamp: chrono::Utc::now(),
        });
        self.publish_status(session);

        debug!("Volume set to {:.2}", volume);
    }

    /// Create and start a handle at `offset`, anchor the clock and start the observer
    fn start_run(&self, session: &mut PlaybackSession, offset: f64) -> Result<()> {
        let buffer = session
            .buffer
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::Internal("no buffer to play".to_string()))?;

        let mut handle =
            self.inner
                .device
                .create_handle(buffer, session.volume, self.natural_end_callback())?;
        handle.start(offset)?;

        session.clock.start_at(self.inner.device.now(), offset);
        debug!("Output handle {} running from {:.3}s", handle.id(), offset);
        session.active_output = Some(handle);
        self.start_observer(session);

        Ok(())
    }
}
