//! Status accessors

use super::core::{EngineSettings, PlaybackEngine};
use crate::playback::state::PlayerStatus;
use serene_common::events::{EventBus, PlaybackState, PlayerEvent};
use std::sync::PoisonError;
use tokio::sync::{broadcast, watch};

impl PlaybackEngine {
    /// Exact buffer position now, independent of the observer cadence
    pub async fn current_time(&self) -> f64 {
        let session = self.inner.session.lock().await;
        session.clock.position(self.inner.device.now())
    }

    pub async fn state(&self) -> PlaybackState {
        self.inner.session.lock().await.state
    }

    /// Duration of the loaded buffer, 0 when none
    pub async fn duration(&self) -> f64 {
        self.inner.session.lock().await.duration()
    }

    pub async fn volume(&self) -> f32 {
        self.inner.session.lock().await.volume
    }

    /// Stored position used by the next `play`
    pub async fn pause_position(&self) -> f64 {
        self.inner.session.lock().await.clock.pause_position()
    }

    /// Last published status
    pub fn status(&self) -> PlayerStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Receiver of status updates (position updates at observer cadence)
    pub fn subscribe_status(&self) -> watch::Receiver<PlayerStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn device_name(&self) -> String {
        self.inner.device.name()
    }

    pub fn is_observer_running(&self) -> bool {
        self.inner
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_running()
    }

    /// Position ticks published over the engine's lifetime
    pub fn observer_tick_count(&self) -> u64 {
        self.inner
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick_count()
    }
}
