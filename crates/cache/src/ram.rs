//! In-memory thumbnail cache
//!
//! Maps grid indices to rendered thumbnails. The cache is approximate: it
//! keeps entries under a soft byte budget by evicting the least recently
//! used ones, and drops more whenever the environment reports memory
//! pressure. A `put` is never durable, so callers must always be ready for
//! a miss.

use crate::memory_budget::{MemoryBudget, MemoryPressure};
use gridthumb_render::Thumbnail;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// Flattened index of a grid cell, used directly as the cache key
pub type GridIndex = usize;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of thumbnails currently cached
    pub entry_count: usize,

    /// Bytes of pixel data currently cached
    pub memory_used: usize,

    /// Soft limit in bytes
    pub memory_limit: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of entries dropped by the cache itself
    pub evictions: u64,

    /// Pressure level of the budget when the snapshot was taken
    pub pressure: MemoryPressure,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    thumbnail: Thumbnail,
    bytes: usize,
    last_used: u64,
}

struct CacheState {
    entries: HashMap<GridIndex, CacheEntry>,

    /// Use tick -> index, oldest first
    recency: BTreeMap<u64, GridIndex>,

    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Mark an entry as most recently used
    fn touch(&mut self, index: GridIndex) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(&index) {
            self.recency.remove(&entry.last_used);
            entry.last_used = tick;
            self.recency.insert(tick, index);
        }
    }

    fn remove(&mut self, index: GridIndex, budget: &MemoryBudget) -> Option<CacheEntry> {
        let entry = self.entries.remove(&index)?;
        self.recency.remove(&entry.last_used);
        budget.record_deallocation(entry.bytes);
        Some(entry)
    }

    /// Evict least recently used entries until usage is at most `target` bytes
    fn evict_down_to(&mut self, budget: &MemoryBudget, target: usize) -> usize {
        let mut evicted = 0;
        while budget.usage() > target {
            let Some((_, index)) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&index) {
                budget.record_deallocation(entry.bytes);
                self.evictions += 1;
                evicted += 1;
                trace!(index, bytes = entry.bytes, "evicted thumbnail");
            }
        }
        evicted
    }
}

/// Thread-safe, memory-bounded thumbnail cache keyed by grid index
///
/// # Example
///
/// ```
/// use gridthumb_cache::ThumbnailCache;
/// use gridthumb_render::{Orientation, Thumbnail};
/// use image::{DynamicImage, RgbaImage};
///
/// let cache = ThumbnailCache::with_mb_limit(64);
/// let thumbnail = Thumbnail::new(
///     DynamicImage::ImageRgba8(RgbaImage::new(96, 128)),
///     1.0,
///     Orientation::NoTransforms,
/// );
///
/// cache.put(42, thumbnail);
///
/// // Entries may vanish at any time, so a hit is never guaranteed
/// if let Some(hit) = cache.get(42) {
///     assert_eq!(hit.dimensions(), (96, 128));
/// }
/// ```
pub struct ThumbnailCache {
    state: Mutex<CacheState>,
    budget: MemoryBudget,
}

impl ThumbnailCache {
    /// Create a cache with a soft limit of `memory_limit` bytes
    pub fn new(memory_limit: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            budget: MemoryBudget::new(memory_limit),
        }
    }

    /// Create a cache with a soft limit in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Look up the thumbnail for `index`
    pub fn get(&self, index: GridIndex) -> Option<Thumbnail> {
        let mut state = self.state.lock();

        let thumbnail = state.entries.get(&index).map(|entry| entry.thumbnail.clone());
        match thumbnail {
            Some(thumbnail) => {
                state.touch(index);
                state.hits += 1;
                Some(thumbnail)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store the thumbnail for `index`, replacing any previous one.
    ///
    /// May evict other entries to stay under the budget. A thumbnail larger
    /// than the whole budget is not stored.
    pub fn put(&self, index: GridIndex, thumbnail: Thumbnail) {
        let bytes = thumbnail.byte_size();
        let limit = self.budget.limit();
        let mut state = self.state.lock();

        state.remove(index, &self.budget);

        if bytes > limit {
            debug!(index, bytes, limit, "thumbnail larger than cache budget, not stored");
            return;
        }

        state.evict_down_to(&self.budget, limit - bytes);

        let tick = state.tick();
        state.entries.insert(
            index,
            CacheEntry {
                thumbnail,
                bytes,
                last_used: tick,
            },
        );
        state.recency.insert(tick, index);
        self.budget.record_allocation(bytes);
    }

    /// Check for an entry without counting a hit or refreshing its recency
    pub fn contains(&self, index: GridIndex) -> bool {
        self.state.lock().entries.contains_key(&index)
    }

    /// Remove the entry for `index`
    pub fn remove(&self, index: GridIndex) -> Option<Thumbnail> {
        let mut state = self.state.lock();
        state
            .remove(index, &self.budget)
            .map(|entry| entry.thumbnail)
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        self.budget.reset();
    }

    /// React to a memory warning from the environment.
    ///
    /// Trims the cache to the fraction of its budget the level allows and
    /// returns the number of entries dropped.
    pub fn handle_memory_pressure(&self, level: MemoryPressure) -> usize {
        let target = (self.budget.limit() as f64 * level.retain_fraction()) as usize;
        let evicted = self.state.lock().evict_down_to(&self.budget, target);
        if evicted > 0 {
            debug!(?level, evicted, "trimmed thumbnail cache under memory pressure");
        }
        evicted
    }

    /// Soft limit in bytes
    pub fn memory_limit(&self) -> usize {
        self.budget.limit()
    }

    /// Bytes currently cached
    pub fn memory_used(&self) -> usize {
        self.budget.usage()
    }

    /// Number of cached thumbnails
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entry_count: state.entries.len(),
            memory_used: self.budget.usage(),
            memory_limit: self.budget.limit(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            pressure: self.budget.pressure(),
        }
    }
}

impl Default for ThumbnailCache {
    /// Create a cache with a default 128MB limit
    fn default() -> Self {
        Self::with_mb_limit(128)
    }
}
