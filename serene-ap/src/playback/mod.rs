//! Transport control, playback clock and position observation

pub mod clock;
pub mod engine;
pub mod monitor;
pub mod state;

pub use clock::{ClockSnapshot, PlaybackClock};
pub use engine::{EngineSettings, PlaybackEngine};
pub use monitor::PositionObserver;
pub use state::{LoadOutcome, PlayerStatus};
