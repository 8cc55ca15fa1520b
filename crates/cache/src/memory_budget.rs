//! Memory budget and pressure levels for the thumbnail cache
//!
//! The budget is a soft limit: the cache evicts to stay under it, and the
//! environment can additionally signal memory pressure at any time, which
//! makes the cache drop entries no caller asked it to drop.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory pressure level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    #[default]
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (> 90% utilization)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Fraction of the budget a cache may keep after a warning at this level
    pub fn retain_fraction(&self) -> f64 {
        match self {
            MemoryPressure::Low => 1.0,
            MemoryPressure::Moderate => 0.75,
            MemoryPressure::High => 0.5,
            MemoryPressure::Critical => 0.0,
        }
    }
}

/// Byte budget for cached thumbnails
///
/// Usage is tracked atomically so pressure can be sampled from any thread
/// without taking the cache lock.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    usage: AtomicUsize,
}

impl MemoryBudget {
    /// Create a budget of `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            usage: AtomicUsize::new(0),
        }
    }

    /// Limit in bytes
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently accounted for
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    /// Utilization ratio (0.0 to 1.0, may exceed 1.0 transiently)
    pub fn utilization(&self) -> f64 {
        let limit = self.limit();
        if limit == 0 {
            0.0
        } else {
            self.usage() as f64 / limit as f64
        }
    }

    /// Current pressure level
    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }

    /// Record a memory allocation
    pub fn record_allocation(&self, bytes: usize) {
        self.usage.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a memory deallocation
    pub fn record_deallocation(&self, bytes: usize) {
        self.usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            })
            .ok();
    }

    /// Forget all recorded usage
    pub fn reset(&self) {
        self.usage.store(0, Ordering::Relaxed);
    }
}
