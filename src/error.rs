//! Error types surfaced to callers of the engine, plus the two internal,
//! locally-recovered error kinds used between `Node` and `Slice`.

use std::fmt;

/// Errors that cross the public API boundary.
#[derive(Debug, thiserror::Error)]
pub enum CeresError {
    /// Requested metric has no node directory.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Requested interval produced no samples at the slice level.
    #[error("no data in requested interval")]
    NoData,

    /// A slice read was requested before its `startTime`.
    #[error("invalid request: read begins before slice start")]
    InvalidRequest,

    /// Node directory content violates an invariant (malformed slice
    /// filename, non-multiple-of-8 slice size, ...).
    #[error("corrupt node {node}: {message}")]
    CorruptNode { node: String, message: String },

    /// The node directory disappeared while it was being enumerated.
    #[error("node deleted during enumeration: {0}")]
    NodeDeleted(String),

    /// Any other filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CeresError>;

/// Internal errors recovered locally by `Node::write`; never returned to
/// callers.
#[derive(Debug)]
pub(crate) enum SliceWriteError {
    /// The write would require padding more than `MAX_SLICE_GAP` samples.
    GapTooLarge,
    /// The slice file disappeared mid-operation.
    Deleted,
    Io(std::io::Error),
}

impl From<std::io::Error> for SliceWriteError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            SliceWriteError::Deleted
        } else {
            SliceWriteError::Io(e)
        }
    }
}

impl fmt::Display for SliceWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceWriteError::GapTooLarge => write!(f, "gap too large for a single slice"),
            SliceWriteError::Deleted => write!(f, "slice deleted"),
            SliceWriteError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for SliceWriteError {}
