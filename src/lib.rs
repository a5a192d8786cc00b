//! A sparse time-series storage engine: a filesystem tree of metric nodes,
//! each backed by fixed-step binary slices of packed big-endian samples.
//!
//! The three layers mirror the on-disk layout: a [`Tree`] resolves dotted
//! metric names to node directories, a [`Node`] owns a metric's metadata and
//! slice set, and a [`Slice`] is one `<startTime>@<timeStep>.slice` file.

mod aggregate;
mod config;
mod error;
mod node;
mod path_util;
mod series;
mod slice;
mod tree;

pub use aggregate::{downsample, mean};
pub use config::{default_slice_caching_behavior, set_default_slice_caching_behavior, SliceCachingBehavior};
pub use error::{CeresError, Result};
pub use node::{Node, NodeMetadata, DEFAULT_TIMESTEP};
pub use series::TimeSeriesData;
pub use slice::{Slice, MAX_SLICE_GAP};
pub use tree::Tree;
