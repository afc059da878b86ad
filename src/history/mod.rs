//! History reconstruction for files and constructs

/// Line-oriented diff rendering
pub mod diff;
/// Commit-pair walking and change-record emission
pub mod tracker;

pub use diff::{DiffLine, DiffLineKind, DiffRenderer};
pub use tracker::HistoryTracker;
