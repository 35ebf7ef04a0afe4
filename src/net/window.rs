//! Rolling latency window.

use std::fmt;

/// Number of samples the window holds.
pub const WINDOW_CAPACITY: usize = 16;

/// Summary of the samples currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub min: u32,
    pub avg: u32,
    pub max: u32,
}

impl fmt::Display for WindowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.min, self.avg, self.max)
    }
}

/// Fixed-capacity ring buffer of round-trip times in milliseconds.
///
/// Holds at most the last [`WINDOW_CAPACITY`] samples; before the first wrap
/// only the samples pushed so far take part in the statistics.
#[derive(Debug, Clone)]
pub struct MovingWindowAverage {
    samples: [u32; WINDOW_CAPACITY],
    cursor: usize,
    full: bool,
}

impl Default for MovingWindowAverage {
    fn default() -> Self {
        Self::new()
    }
}

impl MovingWindowAverage {
    pub fn new() -> Self {
        Self {
            samples: [0; WINDOW_CAPACITY],
            cursor: 0,
            full: false,
        }
    }

    pub fn push(&mut self, sample: u32) {
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % WINDOW_CAPACITY;
        if self.cursor == 0 {
            self.full = true;
        }
    }

    pub fn len(&self) -> usize {
        if self.full {
            WINDOW_CAPACITY
        } else {
            self.cursor
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn held(&self) -> &[u32] {
        &self.samples[..self.len()]
    }

    /// Min, rounded mean and max, or `None` before the first sample.
    pub fn stats(&self) -> Option<WindowStats> {
        let held = self.held();
        let min = *held.iter().min()?;
        let max = *held.iter().max()?;
        let sum: u64 = held.iter().map(|&sample| u64::from(sample)).sum();
        let avg = (sum as f64 / held.len() as f64).round() as u32;
        Some(WindowStats { min, avg, max })
    }
}
