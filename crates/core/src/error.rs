//! Errors raised while dispatching thumbnails to cells

use gridthumb_render::{GeometryError, RenderError};
use thiserror::Error;

/// A single cell's thumbnail request could not be served.
///
/// None of these are fatal to the pipeline; the affected cell stays unfilled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The grid geometry is unusable (non-positive tile or pixel size)
    #[error("invalid geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// The thumbnail surface could not be allocated or drawn
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// A render was requested before the viewport width was known
    #[error("tile geometry has not been computed yet")]
    NotReady,

    /// The index is outside the grid
    #[error("index {index} is outside a grid of {item_count} items")]
    IndexOutOfRange { index: usize, item_count: usize },

    /// The result arrived after its cell was recycled or the pipeline was torn down
    #[error("completion for index {index} is stale")]
    StaleCompletion { index: usize },
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
