//! Playback engine (transport controller)
//!
//! **Module Structure:**
//! - `core.rs`: Construction, shared helpers, natural-end handling, teardown
//! - `transport.rs`: play, pause, seek, volume and their UI conveniences
//! - `load.rs`: Payload load with last-load-wins sequencing
//! - `diagnostics.rs`: Status and state accessors
//!
//! All transport operations take the session lock for their whole duration,
//! so they are applied one at a time and each sees the result of the last.

mod core;
mod diagnostics;
mod load;
mod transport;

pub use self::core::{EngineSettings, PlaybackEngine};
