//! FILENAME: core/drill-engine/src/options.rs

use pivot_engine::{AutoSizeOptions, ColumnOrder, PivotMode, ShapeOptions, DEFAULT_COLUMN_DELIMITER};
use serde::{Deserialize, Serialize};

/// Rows requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Total row ceiling in preview mode.
pub const DEFAULT_PREVIEW_LIMIT: usize = 100;

/// Controller settings. Every field has a default, so partial JSON works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerOptions {
    pub page_size: usize,
    /// Caps every list at `preview_limit` rows and suppresses further paging.
    pub preview: bool,
    pub preview_limit: usize,
    /// Separator between split values in pivoted column names.
    pub column_delimiter: String,
    pub column_order: ColumnOrder,
    /// Whether the backend pivots or returns raw rows.
    pub pivot_mode: PivotMode,
    pub auto_size: AutoSizeOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            page_size: DEFAULT_PAGE_SIZE,
            preview: false,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            column_delimiter: DEFAULT_COLUMN_DELIMITER.to_string(),
            column_order: ColumnOrder::default(),
            pivot_mode: PivotMode::default(),
            auto_size: AutoSizeOptions::default(),
        }
    }
}

impl ControllerOptions {
    /// Row ceiling per list, if any.
    pub fn row_limit(&self) -> Option<usize> {
        self.preview.then_some(self.preview_limit)
    }

    pub fn shape_options(&self) -> ShapeOptions {
        ShapeOptions {
            delimiter: self.column_delimiter.clone(),
            column_order: self.column_order.clone(),
            mode: self.pivot_mode,
        }
    }
}
