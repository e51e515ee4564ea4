//! FILENAME: core/pivot-engine/src/lib.rs
//! Pivot shaping subsystem.
//!
//! Turns backend result sets into displayable pivot grids: multi-level
//! column headers from pivoted column names, group trees from flat rows,
//! and the request model spoken with the query backend. Everything here is
//! pure and synchronous; the stateful lazy-loading controller lives in
//! `drill-engine`.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the pivot IS)
//! - `request`: Backend request/response model (what we ASK for)
//! - `columns`: Column hierarchy from composite names
//! - `grouping`: Row-group tree and the sum-merge rule
//! - `client_pivot`: Cross-tabulation for backends that return raw rows
//! - `shape`: Shape classification and dispatch (WHAT we display)
//! - `autosize`: Column width synthesis

pub mod autosize;
pub mod client_pivot;
pub mod columns;
pub mod definition;
pub mod error;
pub mod grouping;
pub mod request;
pub mod shape;

pub use autosize::{AutoSizeOptions, CellSource, ColumnAutoSizer, FixedWidthMeasure, TextMeasure};
pub use client_pivot::{pivot_rows, PivotMetric};
pub use columns::*;
pub use definition::*;
pub use error::PivotError;
pub use grouping::*;
pub use request::*;
pub use shape::*;

pub use rowset::{Row, Value};
