//! Frame-rate accounting for the freeze watchdog
//!
//! The worker records every delivered frame and ticks the statistics once
//! per watchdog period. A freeze is reported after `freeze_timeout` worth of
//! consecutive empty periods, exactly once; the report distinguishes a
//! consumer that sits on every capture buffer from a device that stopped
//! delivering.

use std::time::Duration;

use tracing::debug;

/// Verdict of a freeze tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeReport {
    /// Every capture buffer is held by the consumer; the camera has nothing
    /// to write into.
    pub consumer_starved: bool,
}

/// Read-and-reset frame counter with freeze latching.
#[derive(Debug, Default)]
pub struct CaptureStatistics {
    frames_this_period: u64,
    empty_for: Duration,
    freeze_reported: bool,
    last_fps: f64,
}

impl CaptureStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart accounting for a new streaming session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_frame(&mut self) {
        self.frames_this_period += 1;
    }

    /// A freeze was already reported this session; ticking has stopped.
    pub fn is_latched(&self) -> bool {
        self.freeze_reported
    }

    /// Frames-per-second sampled at the most recent tick.
    pub fn last_sampled_fps(&self) -> f64 {
        self.last_fps
    }

    /// Close one watchdog period. Returns a report when the frameless time
    /// crosses `freeze_timeout` for the first time.
    pub fn tick(
        &mut self,
        period: Duration,
        freeze_timeout: Duration,
        held_buffers: usize,
        buffer_capacity: usize,
    ) -> Option<FreezeReport> {
        if self.freeze_reported {
            return None;
        }
        self.last_fps = if period.is_zero() {
            0.0
        } else {
            self.frames_this_period as f64 * 1000.0 / period.as_millis() as f64
        };
        debug!(
            fps = self.last_fps,
            held = held_buffers,
            capacity = buffer_capacity,
            "camera fps"
        );
        if self.frames_this_period > 0 {
            self.frames_this_period = 0;
            self.empty_for = Duration::ZERO;
            return None;
        }
        self.empty_for += period;
        if self.empty_for < freeze_timeout {
            return None;
        }
        self.freeze_reported = true;
        Some(FreezeReport {
            consumer_starved: buffer_capacity > 0 && held_buffers == buffer_capacity,
        })
    }
}
