//! Position observer
//!
//! Republishes the clock position on the status channel once per tick while a
//! run is active, and emits a `PlaybackProgress` event at a slower cadence.
//! The observer only reads: it never mutates session state.
//!
//! Each run is tagged with an id stored in a gate. A tick publishes only while
//! holding the gate with its own id still in it, and `cancel` clears the gate
//! under the same lock, so once `cancel` returns nothing more is published.

use crate::audio::device::OutputDevice;
use crate::playback::clock::ClockSnapshot;
use crate::playback::state::PlayerStatus;
use serene_common::events::{EventBus, PlayerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Cancellable recurring position sampler
pub struct PositionObserver {
    tick_interval: Duration,
    progress_interval: Duration,
    gate: Arc<Mutex<Option<u64>>>,
    task: Option<JoinHandle<()>>,
    next_run: u64,
    ticks: Arc<AtomicU64>,
}

impl PositionObserver {
    pub fn new(tick_interval: Duration, progress_interval: Duration) -> Self {
        Self {
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            progress_interval,
            gate: Arc::new(Mutex::new(None)),
            task: None,
            next_run: 1,
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start sampling `snapshot` against the device clock.
    ///
    /// Any previous run is cancelled first. Must be called from within a Tokio
    /// runtime.
    pub fn start(
        &mut self,
        device: Arc<dyn OutputDevice>,
        snapshot: ClockSnapshot,
        status_tx: Arc<watch::Sender<PlayerStatus>>,
        events: EventBus,
    ) {
        self.cancel();

        let run = self.next_run;
        self.next_run += 1;
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(run);

        let gate = Arc::clone(&self.gate);
        let ticks = Arc::clone(&self.ticks);
        let tick_interval = self.tick_interval;
        let progress_interval = self.progress_interval;

        self.task = Some(tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_progress: Option<Instant> = None;

            loop {
                interval.tick().await;
                let position = snapshot.position_at(device.now());

                let guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if *guard != Some(run) {
                    break;
                }
                status_tx.send_modify(|status| status.current_time_seconds = position);
                ticks.fetch_add(1, Ordering::SeqCst);

                let progress_due = last_progress
                    .map(|at| at.elapsed() >= progress_interval)
                    .unwrap_or(true);
                if progress_due {
                    last_progress = Some(Instant::now());
                    events.emit_lossy(PlayerEvent::PlaybackProgress {
                        position_seconds: position,
                        duration_seconds: snapshot.duration,
                        timestamp: chrono::Utc::now(),
                    });
                }
                drop(guard);

                trace!("Position tick (run {}): {:.3}s", run, position);
            }
        }));

        debug!("Position observer run {} started", run);
    }

    /// Stop sampling. Nothing is published after this returns. Idempotent.
    pub fn cancel(&mut self) {
        let previous = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(run) = previous {
            debug!("Position observer run {} cancelled", run);
        }
    }

    pub fn is_running(&self) -> bool {
        self.gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Ticks published since creation, across all runs
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl Drop for PositionObserver {
    fn drop(&mut self) {
        self.cancel();
    }
}
