//! Playback session state
//!
//! `PlaybackSession` is only ever touched by the engine while it holds the
//! session lock. `PlayerStatus` is the read-only projection published to
//! observers.

use crate::audio::device::OutputHandle;
use crate::audio::types::DecodedBuffer;
use crate::playback::clock::PlaybackClock;
use serde::{Deserialize, Serialize};
use serene_common::events::PlaybackState;
use std::sync::Arc;

/// Mutable transport state owned by the engine
pub struct PlaybackSession {
    pub state: PlaybackState,

    /// Current decoded buffer (None while Idle or Loading)
    pub buffer: Option<Arc<DecodedBuffer>>,

    /// Run origin and pause position
    pub clock: PlaybackClock,

    /// Stored volume (0.0-1.0)
    pub volume: f32,

    /// The only live output handle, present exactly while Playing
    pub active_output: Option<Box<dyn OutputHandle>>,

    /// Incremented by every load and by shutdown; stale decodes compare against it
    pub load_seq: u64,
}

impl PlaybackSession {
    pub fn new(volume: f32) -> Self {
        Self {
            state: PlaybackState::Idle,
            buffer: None,
            clock: PlaybackClock::default(),
            volume: volume.clamp(0.0, 1.0),
            active_output: None,
            load_seq: 0,
        }
    }

    /// Buffer duration in seconds, 0 when nothing is loaded
    pub fn duration(&self) -> f64 {
        self.buffer
            .as_ref()
            .map(|b| b.duration_seconds())
            .unwrap_or(0.0)
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Status snapshot with the position taken at device time `now`
    pub fn status(&self, now: f64) -> PlayerStatus {
        PlayerStatus {
            state: self.state,
            is_playing: self.is_playing(),
            duration_seconds: self.duration(),
            current_time_seconds: self.clock.position(now),
            volume: self.volume,
        }
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.state)
            .field("duration", &self.duration())
            .field("clock", &self.clock)
            .field("volume", &self.volume)
            .field("active_output", &self.active_output.as_ref().map(|h| h.id()))
            .field("load_seq", &self.load_seq)
            .finish()
    }
}

/// Observable player fields for the UI
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub is_playing: bool,
    pub duration_seconds: f64,
    pub current_time_seconds: f64,
    pub volume: f32,
}

/// Result of a load that did not fail
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOutcome {
    /// Buffer installed; session is Ready
    Ready { duration_seconds: f64 },

    /// A newer load started before this decode finished; result dropped
    Superseded,
}

impl LoadOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadOutcome::Ready { .. })
    }
}
