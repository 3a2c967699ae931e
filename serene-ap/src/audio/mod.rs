//! Audio decoding and output devices

pub mod decoder;
pub mod device;
pub mod output;
pub mod resampler;
pub mod types;
pub mod virtual_output;

pub use decoder::decode;
pub use device::{HandleId, HandlePhase, OutputDevice, OutputHandle, StopReason};
pub use output::CpalOutput;
pub use resampler::ResampleCache;
pub use types::{AudioFormat, DecodedBuffer, EncodedPayload};
pub use virtual_output::VirtualOutput;
