//! Test helper modules for serene-ap integration tests
//!
//! Provides reusable test infrastructure components:
//! - PCM payload generators with known characteristics
//! - Engine construction against the software output device

#![allow(dead_code)]

pub mod audio_generator;

pub use audio_generator::{base64_payload, pcm_bytes, silent_payload, sine_payload, SESSION_RATE};

use serene_ap::audio::VirtualOutput;
use serene_ap::playback::{EngineSettings, PlaybackEngine};
use std::sync::Arc;

/// Engine on a fresh virtual device, plus the device for inspection
pub fn virtual_engine() -> (PlaybackEngine, VirtualOutput) {
    let device = VirtualOutput::new();
    let engine = PlaybackEngine::new(Arc::new(device.clone()), EngineSettings::default());
    (engine, device)
}
