//! # Serene Common Library
//!
//! Shared code for the Serene wellness-session player including:
//! - Common error type
//! - TOML configuration loading with graceful degradation
//! - Player event types (PlayerEvent enum) and the EventBus
//! - Human-readable clock formatting

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;

pub use error::{Error, Result};
pub use events::{EventBus, PlaybackState, PlayerEvent};
