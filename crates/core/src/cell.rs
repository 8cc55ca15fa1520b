//! Recyclable grid cell handles
//!
//! The grid reuses a small pool of cells for thousands of indices. A cell
//! remembers which index it currently shows and a reuse generation that is
//! bumped every time it is recycled, so a render that finishes late can tell
//! whether the cell it was started for still wants it.

use gridthumb_cache::GridIndex;
use gridthumb_render::Thumbnail;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct CellState {
    index: Option<GridIndex>,
    generation: u64,
    thumbnail: Option<Thumbnail>,
}

/// Handle to one on-screen grid cell.
///
/// Clones refer to the same cell.
#[derive(Debug, Clone, Default)]
pub struct GridCell {
    state: Arc<Mutex<CellState>>,
}

impl GridCell {
    /// Create an empty cell that shows no index
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the cell at `index`, returning the generation a binding must
    /// present.
    ///
    /// Moving a cell to a different index recycles it first.
    pub fn assign(&self, index: GridIndex) -> u64 {
        let mut state = self.state.lock();
        if state.index != Some(index) {
            state.thumbnail = None;
            state.generation += 1;
            state.index = Some(index);
        }
        state.generation
    }

    /// Clear the cell before the grid hands it out for another index
    pub fn prepare_for_reuse(&self) {
        let mut state = self.state.lock();
        state.thumbnail = None;
        state.index = None;
        state.generation += 1;
    }

    /// Bind `thumbnail` if the cell still shows `index` at `generation`.
    ///
    /// Returns `false` and leaves the cell untouched otherwise.
    pub fn bind(&self, index: GridIndex, generation: u64, thumbnail: Thumbnail) -> bool {
        let mut state = self.state.lock();
        if state.index != Some(index) || state.generation != generation {
            return false;
        }
        state.thumbnail = Some(thumbnail);
        true
    }

    /// Index the cell currently shows
    pub fn index(&self) -> Option<GridIndex> {
        self.state.lock().index
    }

    /// Current reuse generation
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Bound thumbnail, if any
    pub fn thumbnail(&self) -> Option<Thumbnail> {
        self.state.lock().thumbnail.clone()
    }

    /// Returns true if a thumbnail is bound
    pub fn is_filled(&self) -> bool {
        self.state.lock().thumbnail.is_some()
    }

    /// Returns true if both handles refer to the same cell
    pub fn same_cell(&self, other: &GridCell) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
