//! Rolling capture-time statistics

use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_WINDOW: usize = 10;

/// Fixed window of elapsed times, overwritten in a circle.
///
/// The window starts zero-filled and the average always divides by the full
/// window size, so the first few readings are biased toward zero.
#[derive(Debug, Clone)]
pub struct TimingTracker {
    samples: Vec<f64>,
    cursor: usize,
}

impl Default for TimingTracker {
    fn default() -> Self {
        Self {
            samples: vec![0.0; DEFAULT_WINDOW],
            cursor: 0,
        }
    }
}

impl TimingTracker {
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(Error::InvalidHistory);
        }
        Ok(Self {
            samples: vec![0.0; window],
            cursor: 0,
        })
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.record_secs(elapsed.as_secs_f64());
    }

    pub fn record_secs(&mut self, elapsed_seconds: f64) {
        self.samples[self.cursor] = elapsed_seconds;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    /// `round(sum(window) / window_size * 1000)`
    pub fn average_ms(&self) -> u64 {
        let sum: f64 = self.samples.iter().sum();
        (sum / self.samples.len() as f64 * 1000.0).round() as u64
    }

    /// `None` while the average is still 0 ms
    pub fn captures_per_second(&self) -> Option<f64> {
        match self.average_ms() {
            0 => None,
            ms => Some(1000.0 / ms as f64),
        }
    }

    pub fn window(&self) -> usize {
        self.samples.len()
    }
}
