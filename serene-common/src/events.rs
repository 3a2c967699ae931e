//! Event types for the Serene event system
//!
//! Provides the shared `PlayerEvent` definitions and the `EventBus` that
//! carries them from the playback engine to UI-side subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Transport state of the playback session
///
/// `Ready` and `Paused` are both silent states with a remembered position;
/// `Ready` only means a load has just completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No buffer loaded
    #[default]
    Idle,
    /// Decode in progress
    Loading,
    /// Buffer loaded, not yet played
    Ready,
    /// Output running
    Playing,
    /// Output stopped by pause or natural end
    Paused,
}

impl PlaybackState {
    /// True for the states that keep a decoded buffer without producing sound
    pub fn is_silent_with_buffer(self) -> bool {
        matches!(self, PlaybackState::Ready | PlaybackState::Paused)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Serene player events
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to a UI process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Transport state changed
    StateChanged {
        /// State before change
        old_state: PlaybackState,
        /// State after change
        new_state: PlaybackState,
        /// When state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Payload decoded and installed as the current buffer
    Loaded {
        /// Frames in the decoded buffer
        frame_count: usize,
        /// Buffer duration in seconds
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Payload could not be loaded; session is back to Idle
    LoadFailed {
        /// Human-readable failure
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A decode finished after a newer load started and was dropped
    LoadDiscarded {
        /// Load sequence number of the stale decode
        sequence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic position report while playing
    PlaybackProgress {
        position_seconds: f64,
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Position changed by seek or skip
    Seeked {
        position_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stored volume changed
    VolumeChanged {
        /// New volume (0.0-1.0)
        volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Buffer played to its end without a user stop
    PlaybackCompleted {
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output device refused to create or start a handle
    OutputError {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Event type name as used in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::Loaded { .. } => "Loaded",
            PlayerEvent::LoadFailed { .. } => "LoadFailed",
            PlayerEvent::LoadDiscarded { .. } => "LoadDiscarded",
            PlayerEvent::PlaybackProgress { .. } => "PlaybackProgress",
            PlayerEvent::Seeked { .. } => "Seeked",
            PlayerEvent::VolumeChanged { .. } => "VolumeChanged",
            PlayerEvent::PlaybackCompleted { .. } => "PlaybackCompleted",
            PlayerEvent::OutputError { .. } => "OutputError",
        }
    }

    /// Serialize as one line of JSON for a UI process
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use serene_common::events::{EventBus, PlayerEvent, PlaybackState};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PlayerEvent::StateChanged {
///     old_state: PlaybackState::Ready,
///     new_state: PlaybackState::Playing,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(PlayerEvent::StateChanged { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_state_serializes_lowercase() {
        let json = serde_json::to_string(&PlaybackState::Playing).unwrap();
        assert_eq!(json, "\"playing\"");

        let state: PlaybackState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(state, PlaybackState::Paused);
    }

    #[test]
    fn test_silent_states() {
        assert!(PlaybackState::Ready.is_silent_with_buffer());
        assert!(PlaybackState::Paused.is_silent_with_buffer());
        assert!(!PlaybackState::Playing.is_silent_with_buffer());
        assert!(!PlaybackState::Idle.is_silent_with_buffer());
    }

    #[test]
    fn test_event_tagged_serialization() {
        let event = PlayerEvent::VolumeChanged {
            volume: 0.5,
            timestamp: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "VolumeChanged");
        assert_eq!(value["volume"], 0.5);
        assert_eq!(event.event_type(), "VolumeChanged");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);

        let result = bus.emit(PlayerEvent::LoadDiscarded {
            sequence: 1,
            timestamp: chrono::Utc::now(),
        });
        assert!(result.is_err());

        // Lossy variant never fails
        bus.emit_lossy(PlayerEvent::LoadDiscarded {
            sequence: 2,
            timestamp: chrono::Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PlayerEvent::Seeked {
            position_seconds: 1.0,
            timestamp: chrono::Utc::now(),
        });
        bus.emit_lossy(PlayerEvent::Seeked {
            position_seconds: 2.0,
            timestamp: chrono::Utc::now(),
        });

        match rx.recv().await.unwrap() {
            PlayerEvent::Seeked { position_seconds, .. } => assert_eq!(position_seconds, 1.0),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            PlayerEvent::Seeked { position_seconds, .. } => assert_eq!(position_seconds, 2.0),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
