//! FILENAME: core/pivot-engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PivotError {
    #[error("Column delimiter must not be empty")]
    EmptyDelimiter,

    #[error("Split fields {0:?} require at least one metric")]
    SplitWithoutMetrics(Vec<String>),

    #[error("Field {0} is used both as a grouping and a split field")]
    OverlappingField(String),
}
