//! Payload loading
//!
//! A load tears down the current run, decodes and prepares the buffer for
//! the device off the async runtime, then installs the result only if no
//! newer load (or shutdown) started in the meantime.

use super::core::PlaybackEngine;
use crate::audio::decoder;
use crate::audio::device::StopReason;
use crate::audio::types::{DecodedBuffer, EncodedPayload};
use crate::error::{Error, Result};
use crate::playback::state::LoadOutcome;
use serene_common::events::{PlaybackState, PlayerEvent};
use std::sync::Arc;
use tracing::{info, warn};

impl PlaybackEngine {
    /// Replace the current buffer with `payload`.
    ///
    /// Stops any running output first. On success the session is `Ready` at
    /// position 0. On failure it is `Idle` with no buffer, a `LoadFailed` event
    /// is emitted and the error is returned; the engine stays usable.
    ///
    /// If another `load` starts before this decode finishes, this result is
    /// dropped and `LoadOutcome::Superseded` is returned.
    ///
    /// # Errors
    /// - `Error::OutputUnavailable` if the device cannot play anything
    /// - `Error::Decode` / `Error::UnsupportedFormat` from the decoder
    /// - `Error::Resample` if the device cannot convert the buffer to its rate
    pub async fn load(&self, payload: EncodedPayload) -> Result<LoadOutcome> {
        let sequence = {
            let mut session = self.inner.session.lock().await;

            self.cancel_observer();
            self.stop_output(&mut session, StopReason::Superseded);
            session.load_seq += 1;
            session.buffer = None;
            session.clock.reset(0.0);
            self.set_state(&mut session, PlaybackState::Loading);
            self.publish_status(&session);

            session.load_seq
        };

        info!(
            "Loading payload #{} ({} bytes, {})",
            sequence,
            payload.len(),
            payload.format()
        );

        let decoded = match self.inner.device.check_available() {
            Ok(()) => {
                let expected = self.inner.settings.format;
                let device = Arc::clone(&self.inner.device);
                tokio::task::spawn_blocking(move || -> Result<Arc<DecodedBuffer>> {
                    let buffer = Arc::new(decoder::decode(&payload, expected)?);
                    device.prepare(&buffer)?;
                    Ok(buffer)
                })
                .await
                .map_err(|e| Error::Internal(format!("Decode task failed: {}", e)))
                .and_then(|result| result)
            }
            Err(e) => Err(e),
        };

        let mut session = self.inner.session.lock().await;

        if session.load_seq != sequence {
            info!(
                "Discarding stale load #{} (current #{})",
                sequence, session.load_seq
            );
            self.inner.events.emit_lossy(PlayerEvent::LoadDiscarded {
                sequence,
                timestamp: chrono::Utc::now(),
            });
            return Ok(LoadOutcome::Superseded);
        }

        match decoded {
            Ok(buffer) => {
                let duration_seconds = buffer.duration_seconds();
                let frame_count = buffer.frame_count();

                session.clock.reset(duration_seconds);
                session.buffer = Some(buffer);
                self.set_state(&mut session, PlaybackState::Ready);

                self.inner.events.emit_lossy(PlayerEvent::Loaded {
                    frame_count,
                    duration_seconds,
                    timestamp: chrono::Utc::now(),
                });
                self.publish_status(&session);

                info!(
                    "Load #{} ready: {} frames, {:.3}s",
                    sequence, frame_count, duration_seconds
                );
                Ok(LoadOutcome::Ready { duration_seconds })
            }
            Err(e) => {
                warn!("Load #{} failed: {}", sequence, e);

                session.buffer = None;
                session.clock.reset(0.0);
                self.set_state(&mut session, PlaybackState::Idle);

                self.inner.events.emit_lossy(PlayerEvent::LoadFailed {
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                self.publish_status(&session);

                Err(e)
            }
        }
    }
}
