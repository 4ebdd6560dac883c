//! The adaptive delay controller. Observes how late mutations arrive relative
//! to when the turn loop picks them up and widens or narrows the buffering window
//! so slow, jittery clients still get applied in order without everyone paying
//! maximum latency.

use std::time::Duration;

use crate::model::RoomConfig;

const UPPER_THRESHOLD_MS: i64 = 50;
const LOWER_THRESHOLD_MS: i64 = 10;
const GROWTH_FACTOR: f64 = 1.5;
const SHRINK_FACTOR: f64 = 0.8;

/// Tracks recent arrival-to-process latency samples and the current buffer
/// window. `current` is read by the TurnLoop every tick to decide whether a
/// mutation is "due"; it only changes on the `adjust_interval` cadence.
pub struct BufferSizer {
    current_ms: i64,
    min_ms: i64,
    max_ms: i64,
    adjust_interval: Duration,
    samples: Vec<i64>,
    last_adjusted_at: i64,
}

impl BufferSizer {
    pub fn new(config: &RoomConfig) -> Self {
        BufferSizer {
            current_ms: config.buffer_initial_ms.clamp(config.buffer_min_ms, config.buffer_max_ms),
            min_ms: config.buffer_min_ms,
            max_ms: config.buffer_max_ms,
            adjust_interval: config.buffer_adjust_interval,
            samples: Vec::new(),
            last_adjusted_at: 0,
        }
    }

    pub fn current_ms(&self) -> i64 {
        self.current_ms
    }

    /// Records one mutation's `processing_started_at - server_received_timestamp`
    /// lateness. Called once per dequeued mutation each tick.
    pub fn observe(&mut self, lateness_ms: i64) {
        self.samples.push(lateness_ms);
    }

    /// Called every tick with the current time; recomputes `current_ms` at most
    /// once per `adjust_interval`, using the 95th percentile of samples collected
    /// since the last adjustment.
    pub fn maybe_adjust(&mut self, now_ms: i64) {
        if now_ms - self.last_adjusted_at < self.adjust_interval.as_millis() as i64 {
            return;
        }
        self.last_adjusted_at = now_ms;
        if self.samples.is_empty() {
            return;
        }
        self.samples.sort_unstable();
        let idx = ((self.samples.len() as f64) * 0.95).floor() as usize;
        let p95 = self.samples[idx.min(self.samples.len() - 1)];
        self.samples.clear();

        if p95 > UPPER_THRESHOLD_MS {
            self.current_ms = ((self.current_ms as f64 * GROWTH_FACTOR) as i64).min(self.max_ms).max(self.min_ms);
        } else if p95 < LOWER_THRESHOLD_MS {
            self.current_ms = ((self.current_ms as f64 * SHRINK_FACTOR) as i64).max(self.min_ms).min(self.max_ms);
        }
    }
}
