//! # Serene Audio Player Library (serene-ap)
//!
//! Playback engine for generated wellness-session narration.
//!
//! **Purpose:** Decode a raw 16-bit PCM payload once, then play, pause, seek
//! and change volume on it while observers follow the current position.
//!
//! **Architecture:** `PlaybackEngine` owns the session and talks to an
//! injected `OutputDevice` (cpal hardware or the software `VirtualOutput`);
//! position comes from the device clock, never from accumulated ticks.

pub mod audio;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::PlaybackEngine;
