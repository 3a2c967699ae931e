//! Output device abstraction
//!
//! The transport controller never talks to a sound card directly. It is
//! handed an `OutputDevice`, asks it for one `OutputHandle` per playback run,
//! and reads positions from the device clock. Real hardware (`CpalOutput`)
//! and the software device (`VirtualOutput`) both implement these traits.

use crate::audio::types::DecodedBuffer;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Identity of one output handle (unique per process)
pub type HandleId = u64;

/// Called once, from the device side, when a handle plays its buffer to the end
pub type NaturalEndCallback = Box<dyn FnOnce(HandleId) + Send + 'static>;

/// Why a handle was stopped by its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// Pause requested by the user
    User,
    /// Replaced by a new handle at a different offset
    Seek,
    /// A new payload was loaded
    Superseded,
    /// Controller shut down or handle dropped
    Teardown,
}

/// Audio sink able to play decoded buffers
pub trait OutputDevice: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> String;

    /// Monotonic device clock in seconds
    fn now(&self) -> f64;

    /// Fails with `Error::OutputUnavailable` when nothing can be played
    fn check_available(&self) -> Result<()>;

    /// Get a freshly decoded buffer ready for this device.
    ///
    /// Runs on a blocking thread during `load`, so expensive per-buffer work
    /// (rate conversion) stays off the async runtime. Does nothing by default.
    fn prepare(&self, _buffer: &Arc<DecodedBuffer>) -> Result<()> {
        Ok(())
    }

    /// Create a stopped handle bound to `buffer`.
    ///
    /// `on_natural_end` fires at most once, only if the handle reaches the end
    /// of the buffer while running. It never fires after `stop`.
    fn create_handle(
        &self,
        buffer: Arc<DecodedBuffer>,
        gain: f32,
        on_natural_end: NaturalEndCallback,
    ) -> Result<Box<dyn OutputHandle>>;
}

/// One playback run of a buffer on a device
pub trait OutputHandle: Send + Sync {
    fn id(&self) -> HandleId;

    /// Begin output at `offset_seconds` into the buffer
    fn start(&mut self, offset_seconds: f64) -> Result<()>;

    /// Change the gain of the running output (0.0-1.0)
    fn set_gain(&self, gain: f32);

    /// Stop output and detach the natural-end callback. Idempotent.
    fn stop(&mut self, reason: StopReason);

    /// Reason recorded by the first `stop`, if any
    fn stop_reason(&self) -> Option<StopReason>;

    /// Current lifecycle phase
    fn phase(&self) -> HandlePhase;
}

/// Lifecycle phase of an output handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlePhase {
    Created,
    Running,
    Stopped,
    Ended,
}

impl HandlePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            PHASE_CREATED => HandlePhase::Created,
            PHASE_RUNNING => HandlePhase::Running,
            PHASE_STOPPED => HandlePhase::Stopped,
            _ => HandlePhase::Ended,
        }
    }

    /// True while the handle may still produce sound
    pub fn is_live(self) -> bool {
        matches!(self, HandlePhase::Created | HandlePhase::Running)
    }
}

const PHASE_CREATED: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_STOPPED: u8 = 2;
const PHASE_ENDED: u8 = 3;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared stop/end bookkeeping for handle implementations.
///
/// Stop and natural end race through a single compare-and-swap on the phase,
/// so exactly one of them wins. The loser is a no-op: a stopped handle never
/// runs its end callback, and an ended handle ignores later stops.
pub struct HandleLifecycle {
    id: HandleId,
    phase: AtomicU8,
    stop_reason: Mutex<Option<StopReason>>,
    on_end: Mutex<Option<NaturalEndCallback>>,
}

impl HandleLifecycle {
    pub fn new(on_end: NaturalEndCallback) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            phase: AtomicU8::new(PHASE_CREATED),
            stop_reason: Mutex::new(None),
            on_end: Mutex::new(Some(on_end)),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn phase(&self) -> HandlePhase {
        HandlePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Created → Running. Returns false if the handle already stopped or ended.
    pub fn mark_running(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_CREATED,
                PHASE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Stop the handle. Returns true only for the call that actually stopped it.
    pub fn stop(&self, reason: StopReason) -> bool {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if current == PHASE_STOPPED || current == PHASE_ENDED {
                return false;
            }
            match self.phase.compare_exchange(
                current,
                PHASE_STOPPED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        *self
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
        // Detach: the callback can no longer fire, drop it now
        self.on_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        trace!("Output handle {} stopped ({:?})", self.id, reason);
        true
    }

    /// Running → Ended, then run the natural-end callback.
    ///
    /// Returns false (and runs nothing) if the handle was stopped first.
    pub fn finish_natural(&self) -> bool {
        if self
            .phase
            .compare_exchange(
                PHASE_RUNNING,
                PHASE_ENDED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        let callback = self
            .on_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(self.id);
        }
        trace!("Output handle {} reached natural end", self.id);
        true
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HandleLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleLifecycle")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("stop_reason", &self.stop_reason())
            .finish()
    }
}
