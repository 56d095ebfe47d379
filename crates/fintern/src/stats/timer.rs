//! Sweep Timer - Timing Utilities
//!
//! Measures sweep generations from start to clean-up.

use std::time::{Duration, Instant};

/// SweepTimer - timer for measuring a sweep generation
#[derive(Debug, Clone, Copy)]
pub struct SweepTimer {
    start: Instant,
}

impl SweepTimer {
    /// Create new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    /// Get elapsed milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for SweepTimer {
    fn default() -> Self {
        Self::new()
    }
}
