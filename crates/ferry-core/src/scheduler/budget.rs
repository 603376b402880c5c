//! Runtime-adjustable cap on concurrently running transfers.

use crate::config::MAX_CONCURRENT_LIMIT;

/// Concurrency cap for an engine, always within `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimit {
    max: usize,
}

impl ConcurrencyLimit {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.clamp(1, MAX_CONCURRENT_LIMIT),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Update the cap (clamped). Returns the value actually applied.
    pub fn set(&mut self, max: usize) -> usize {
        *self = Self::new(max);
        self.max
    }

    /// Running transfers above the cap that must be stopped.
    pub fn surplus(&self, active: usize) -> usize {
        active.saturating_sub(self.max)
    }
}
