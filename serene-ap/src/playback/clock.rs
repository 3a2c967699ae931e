//! Playback clock
//!
//! Buffer position is never accumulated tick by tick. While a run is active it
//! is recomputed from the device clock and a fixed origin (the device time at
//! which buffer offset 0 would have played); otherwise it is the frozen pause
//! position.

/// Anchors of one playback run, handed to the position observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSnapshot {
    /// Device time corresponding to buffer offset 0
    pub origin: f64,

    /// Buffer duration in seconds
    pub duration: f64,
}

impl ClockSnapshot {
    /// Buffer position at device time `now`, clamped to `[0, duration]`
    pub fn position_at(&self, now: f64) -> f64 {
        clamp_position(now - self.origin, self.duration)
    }
}

/// Buffer position bookkeeping for the transport controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackClock {
    /// Set only while a run is active
    origin: Option<f64>,
    pause_position: f64,
    duration: f64,
}

impl PlaybackClock {
    pub fn new(duration: f64) -> Self {
        Self {
            origin: None,
            pause_position: 0.0,
            duration: duration.max(0.0),
        }
    }

    /// Forget the current run and position, adopting a new buffer duration
    pub fn reset(&mut self, duration: f64) {
        *self = Self::new(duration);
    }

    /// Begin a run at `offset` seconds into the buffer.
    ///
    /// Returns the clamped offset actually used.
    pub fn start_at(&mut self, now: f64, offset: f64) -> f64 {
        let offset = clamp_position(offset, self.duration);
        self.origin = Some(now - offset);
        self.pause_position = offset;
        offset
    }

    /// End the current run, keeping the position reached at `now`
    pub fn freeze(&mut self, now: f64) -> f64 {
        if let Some(origin) = self.origin.take() {
            self.pause_position = clamp_position(now - origin, self.duration);
        }
        self.pause_position
    }

    /// Record a position without starting a run
    pub fn set_pause_position(&mut self, position: f64) -> f64 {
        self.origin = None;
        self.pause_position = clamp_position(position, self.duration);
        self.pause_position
    }

    /// End the current run with the position pinned at the buffer end
    pub fn pin_to_end(&mut self) {
        self.origin = None;
        self.pause_position = self.duration;
    }

    pub fn position(&self, now: f64) -> f64 {
        match self.snapshot() {
            Some(snapshot) => snapshot.position_at(now),
            None => self.pause_position,
        }
    }

    pub fn snapshot(&self) -> Option<ClockSnapshot> {
        self.origin.map(|origin| ClockSnapshot {
            origin,
            duration: self.duration,
        })
    }

    pub fn is_running(&self) -> bool {
        self.origin.is_some()
    }

    pub fn origin(&self) -> Option<f64> {
        self.origin
    }

    pub fn pause_position(&self) -> f64 {
        self.pause_position
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// True when the stored position sits at (or past) the buffer end
    pub fn at_end(&self) -> bool {
        self.origin.is_none() && self.duration > 0.0 && self.pause_position >= self.duration
    }
}

/// Clamp a buffer position into `[0, duration]`; non-finite input maps to 0
pub fn clamp_position(position: f64, duration: f64) -> f64 {
    if !position.is_finite() {
        return 0.0;
    }
    position.clamp(0.0, duration.max(0.0))
}
