//! PCM Test Payload Generation Utilities
//!
//! Generates deterministic 16-bit little-endian mono payloads in the session
//! format:
//! - Silent audio (all zeros)
//! - Sine waves at specific frequencies

use base64::Engine as _;
use serene_ap::audio::EncodedPayload;
use std::f32::consts::PI;

/// Session sample rate (24 kHz)
pub const SESSION_RATE: u32 = 24_000;

/// Encode samples as little-endian 16-bit PCM
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn frames_for(seconds: f64) -> usize {
    (seconds * SESSION_RATE as f64).round() as usize
}

/// Silent mono payload of the given duration
pub fn silent_payload(seconds: f64) -> EncodedPayload {
    EncodedPayload::from_bytes(vec![0u8; frames_for(seconds) * 2])
}

/// Mono sine payload at `frequency` Hz and `amplitude` (0.0-1.0)
pub fn sine_payload(seconds: f64, frequency: f32, amplitude: f32) -> EncodedPayload {
    let samples: Vec<i16> = (0..frames_for(seconds))
        .map(|i| {
            let t = i as f32 / SESSION_RATE as f32;
            let value = (2.0 * PI * frequency * t).sin() * amplitude;
            (value * i16::MAX as f32) as i16
        })
        .collect();
    EncodedPayload::from_bytes(pcm_bytes(&samples))
}

/// Base64 text of a silent payload, wrapped at 76 columns like MIME output
pub fn base64_payload(seconds: f64) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(vec![0u8; frames_for(seconds) * 2]);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}
