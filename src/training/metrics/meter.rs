//! Running averages and timers

use std::time::Instant;

/// Online weighted average of a scalar metric
///
/// `update(value, n)` records `value` as the latest observation and adds
/// `value * n` to the running sum. The average is the plain ratio of sum to
/// count, so it does not depend on the order of updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AverageMeter {
    /// Most recent value
    pub val: f64,
    /// Weighted sum of all values
    pub sum: f64,
    /// Total weight
    pub count: f64,
}

impl AverageMeter {
    /// Create an empty meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all accumulated state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `value` observed over `n` samples
    pub fn update(&mut self, value: f64, n: usize) {
        self.val = value;
        self.sum += value * n as f64;
        self.count += n as f64;
    }

    /// Weighted average, 0.0 before the first update
    pub fn avg(&self) -> f64 {
        if self.count == 0.0 {
            0.0
        } else {
            self.sum / self.count
        }
    }

    /// Whether no update has been recorded
    pub fn is_empty(&self) -> bool {
        self.count == 0.0
    }
}

/// Wall-clock stopwatch
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a timer started now
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Restart the timer
    pub fn tic(&mut self) {
        self.start = Instant::now();
    }

    /// Seconds since the last `tic`
    pub fn toc(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
