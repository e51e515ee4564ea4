//! FILENAME: core/drill-engine/src/error.rs

use pivot_engine::PivotError;
use thiserror::Error;

/// Failure reported by a `QueryBackend` implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DrillError {
    #[error("No configuration has been applied")]
    NotConfigured,

    #[error("Unknown node: {0:?}")]
    UnknownNode(String),

    #[error("Node {0:?} is at the last grouping level and cannot be expanded")]
    NotExpandable(String),

    #[error("Node {0:?} is already loading")]
    AlreadyLoading(String),

    #[error("Nothing more to load for {0:?}")]
    Exhausted(String),

    #[error("Tree inconsistency: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Pivot(#[from] PivotError),
}
