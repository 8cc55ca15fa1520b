//! Grid Thumbnail Cache Library
//!
//! Memory-bounded, approximate thumbnail cache keyed by grid index.

pub mod memory_budget;
pub mod ram;

pub use memory_budget::{MemoryBudget, MemoryPressure};
pub use ram::{CacheStats, GridIndex, ThumbnailCache};
