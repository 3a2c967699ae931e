//! Core playback engine - construction and lifecycle
//!
//! **Responsibilities:**
//! - PlaybackEngine struct definition and initialization
//! - Helpers shared by the transport operations (state changes, output
//!   teardown, observer control, status publication)
//! - Natural-end notifications from the output device
//! - Shutdown

use crate::audio::device::{HandleId, NaturalEndCallback, OutputDevice, StopReason};
use crate::audio::types::AudioFormat;
use crate::error::Error;
use crate::playback::monitor::PositionObserver;
use crate::playback::state::{PlaybackSession, PlayerStatus};
use serene_common::config::PlaybackConfig;
use serene_common::events::{EventBus, PlaybackState, PlayerEvent};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info};

/// Engine tuning, normally derived from `[playback]` configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Format payloads must be in
    pub format: AudioFormat,

    /// Volume before the first `set_volume`
    pub initial_volume: f32,

    /// Position observer cadence
    pub position_tick: Duration,

    /// Cadence of `PlaybackProgress` events
    pub progress_interval: Duration,

    /// Step used by UI skip controls
    pub skip_seconds: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for EngineSettings {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            format: AudioFormat::from(config),
            initial_volume: config.initial_volume.clamp(0.0, 1.0),
            position_tick: Duration::from_millis(config.position_tick_ms),
            progress_interval: Duration::from_millis(config.progress_event_interval_ms),
            skip_seconds: config.skip_seconds,
        }
    }
}

pub(super) struct EngineInner {
    pub(super) device: Arc<dyn OutputDevice>,
    pub(super) settings: EngineSettings,

    /// Held for the whole of every transport operation
    pub(super) session: Mutex<PlaybackSession>,

    /// Only touched while holding `session`
    pub(super) observer: std::sync::Mutex<PositionObserver>,

    pub(super) status_tx: Arc<watch::Sender<PlayerStatus>>,
    pub(super) events: EventBus,

    /// Natural-end notifications from output handles
    pub(super) natural_end_tx: mpsc::UnboundedSender<HandleId>,
}

/// Transport controller for one playback session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PlaybackEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    /// Create an engine playing through `device`.
    ///
    /// Must be called from within a Tokio runtime: natural-end notifications
    /// are handled on a spawned task.
    pub fn new(device: Arc<dyn OutputDevice>, settings: EngineSettings) -> Self {
        Self::with_event_bus(device, settings, EventBus::default())
    }

    /// Create an engine publishing its events on an existing bus
    pub fn with_event_bus(
        device: Arc<dyn OutputDevice>,
        settings: EngineSettings,
        events: EventBus,
    ) -> Self {
        let session = PlaybackSession::new(settings.initial_volume);
        let (status_tx, _) = watch::channel(session.status(device.now()));
        let (natural_end_tx, natural_end_rx) = mpsc::unbounded_channel();
        let observer = PositionObserver::new(settings.position_tick, settings.progress_interval);

        info!(
            "Creating playback engine on '{}' ({}, volume={:.2}, tick={}ms)",
            device.name(),
            settings.format,
            settings.initial_volume,
            settings.position_tick.as_millis()
        );

        let inner = Arc::new(EngineInner {
            device,
            settings,
            session: Mutex::new(session),
            observer: std::sync::Mutex::new(observer),
            status_tx: Arc::new(status_tx),
            events,
            natural_end_tx,
        });

        tokio::spawn(natural_end_listener(Arc::downgrade(&inner), natural_end_rx));

        Self { inner }
    }

    /// Component teardown: stop output, release the buffer, return to Idle.
    ///
    /// Any load still decoding is discarded when it completes.
    pub async fn shutdown(&self) {
        let mut session = self.inner.session.lock().await;

        self.cancel_observer();
        self.stop_output(&mut session, StopReason::Teardown);
        session.load_seq += 1;
        session.buffer = None;
        session.clock.reset(0.0);
        self.set_state(&mut session, PlaybackState::Idle);
        self.publish_status(&session);

        info!("Playback engine shut down");
    }

    /// Device reported that handle `id` played its buffer to the end.
    ///
    /// Ignored unless `id` is still the active handle of a Playing session,
    /// which makes repeated or late notifications harmless.
    pub(super) async fn handle_natural_end(&self, id: HandleId) {
        let mut session = self.inner.session.lock().await;

        let is_active = session
            .active_output
            .as_ref()
            .map(|handle| handle.id() == id)
            .unwrap_or(false);
        if !is_active || session.state != PlaybackState::Playing {
            debug!("Ignoring natural end of inactive handle {}", id);
            return;
        }

        self.cancel_observer();
        // Handle already ended; dropping it releases it without a second stop
        session.active_output = None;
        session.clock.pin_to_end();
        self.set_state(&mut session, PlaybackState::Paused);

        let duration = session.duration();
        self.inner.events.emit_lossy(PlayerEvent::PlaybackCompleted {
            duration_seconds: duration,
            timestamp: chrono::Utc::now(),
        });
        self.publish_status(&session);

        info!("Playback completed ({:.3}s)", duration);
    }

    pub(super) fn set_state(&self, session: &mut PlaybackSession, new_state: PlaybackState) {
        let old_state = session.state;
        if old_state == new_state {
            return;
        }
        session.state = new_state;

        info!("Playback state changed: {} -> {}", old_state, new_state);
        self.inner.events.emit_lossy(PlayerEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Replace the published status with one computed from `session` now
    pub(super) fn publish_status(&self, session: &PlaybackSession) {
        self.inner
            .status_tx
            .send_replace(session.status(self.inner.device.now()));
    }

    /// Stop and release the active handle, if any
    pub(super) fn stop_output(&self, session: &mut PlaybackSession, reason: StopReason) {
        if let Some(mut handle) = session.active_output.take() {
            handle.stop(reason);
            debug!("Stopped output handle {} ({:?})", handle.id(), reason);
        }
    }

    /// Start the observer on the current run, replacing any previous one
    pub(super) fn start_observer(&self, session: &PlaybackSession) {
        if let Some(snapshot) = session.clock.snapshot() {
            self.inner
                .observer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .start(
                    Arc::clone(&self.inner.device),
                    snapshot,
                    Arc::clone(&self.inner.status_tx),
                    self.inner.events.clone(),
                );
        }
    }

    pub(super) fn cancel_observer(&self) {
        self.inner
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub(super) fn natural_end_callback(&self) -> NaturalEndCallback {
        let tx = self.inner.natural_end_tx.clone();
        Box::new(move |id| {
            // Receiver gone means the engine was dropped
            let _ = tx.send(id);
        })
    }

    pub(super) fn report_output_error(&self, err: &Error) {
        error!("Audio output error: {}", err);
        self.inner.events.emit_lossy(PlayerEvent::OutputError {
            message: err.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.observer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        if let Some(mut handle) = self.session.get_mut().active_output.take() {
            handle.stop(StopReason::Teardown);
        }
    }
}

/// Forwards natural-end notifications to the engine until it is dropped
async fn natural_end_listener(
    engine: Weak<EngineInner>,
    mut natural_end_rx: mpsc::UnboundedReceiver<HandleId>,
) {
    while let Some(id) = natural_end_rx.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        PlaybackEngine { inner }.handle_natural_end(id).await;
    }
    debug!("Natural-end listener stopped");
}
