//! FILENAME: core/pivot-engine/src/request.rs
//! Query Backend wire model.
//!
//! The backend answers exactly one level of the row tree per request:
//! `group_keys` selects the parent path, `row_group_cols[group_keys.len()]`
//! is the dimension the returned rows discriminate on. Field names follow
//! the backend's camelCase JSON contract.

use std::collections::BTreeMap;

use rowset::{Row, Value};
use serde::{Deserialize, Serialize};

use crate::definition::{PivotConfig, SortDirection};

/// A half-open slice `[start_row, end_row)` of one level's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowWindow {
    pub start_row: usize,
    pub end_row: usize,
}

impl RowWindow {
    pub fn new(start_row: usize, end_row: usize) -> Self {
        RowWindow { start_row, end_row }
    }

    pub fn len(&self) -> usize {
        self.end_row.saturating_sub(self.start_row)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueCol {
    /// Source field to aggregate.
    pub col_id: String,
    pub agg_func: String,
    /// Output column name, when it differs from the source field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ValueCol {
    /// The name the aggregate carries in response rows.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.col_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterModelEntry {
    pub filter: Value,
    #[serde(rename = "type")]
    pub filter_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortModelEntry {
    pub col_id: String,
    pub sort: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HavingEntry {
    pub field: String,
    pub aggregation: String,
    #[serde(rename = "type")]
    pub filter_type: String,
    pub value: Value,
}

/// One pivot-drill request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub row_group_cols: Vec<String>,
    pub group_keys: Vec<String>,
    pub pivot_cols: Vec<String>,
    pub value_cols: Vec<ValueCol>,
    pub filter_model: BTreeMap<String, FilterModelEntry>,
    pub sort_model: Vec<SortModelEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having_model: Option<Vec<HavingEntry>>,
    pub start_row: usize,
    pub end_row: usize,
    /// Asks for the single grand total row instead of a listing.
    #[serde(default, skip_serializing_if = "is_false")]
    pub totals_only: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl QueryRequest {
    /// Builds the request for the level below `group_keys`.
    pub fn for_level(config: &PivotConfig, group_keys: &[String], window: RowWindow) -> Self {
        let value_cols = config
            .values
            .iter()
            .map(|v| ValueCol {
                col_id: v.field.clone(),
                agg_func: v.aggregation.as_str().to_string(),
                alias: v.name.clone(),
            })
            .collect();

        // One entry per field; a later filter on the same field wins.
        let filter_model = config
            .filters
            .iter()
            .map(|f| {
                let filter = if f.filter_type.takes_operand() {
                    f.value.clone()
                } else {
                    Value::Null
                };
                (
                    f.field.clone(),
                    FilterModelEntry {
                        filter,
                        filter_type: f.filter_type.as_str().to_string(),
                    },
                )
            })
            .collect();

        let sort_model = config
            .order_by
            .iter()
            .map(|o| SortModelEntry {
                col_id: o.field.clone(),
                sort: o.direction,
            })
            .collect();

        let having_model = if config.having.is_empty() {
            None
        } else {
            Some(
                config
                    .having
                    .iter()
                    .map(|h| HavingEntry {
                        field: h.field.clone(),
                        aggregation: h.aggregation.as_str().to_string(),
                        filter_type: h.filter_type.as_str().to_string(),
                        value: h.value.clone(),
                    })
                    .collect(),
            )
        };

        QueryRequest {
            row_group_cols: config.rows.clone(),
            group_keys: group_keys.to_vec(),
            pivot_cols: config.columns.clone(),
            value_cols,
            filter_model,
            sort_model,
            having_model,
            start_row: window.start_row,
            end_row: window.end_row,
            totals_only: false,
        }
    }

    /// An ungrouped, unsplit listing of `window` under the configuration's
    /// filters. Client-side totals page through these.
    pub fn ungrouped(config: &PivotConfig, window: RowWindow) -> Self {
        let mut request = Self::for_level(config, &[], window);
        request.row_group_cols.clear();
        request.pivot_cols.clear();
        request.sort_model.clear();
        request.having_model = None;
        request
    }

    /// The request that yields the single grand total row.
    pub fn grand_total(config: &PivotConfig) -> Self {
        let mut request = Self::ungrouped(config, RowWindow::new(0, 1));
        request.totals_only = true;
        request
    }

    pub fn window(&self) -> RowWindow {
        RowWindow::new(self.start_row, self.end_row)
    }

    /// The grouping dimension the response rows discriminate on, or `None`
    /// for a flat (ungrouped) request.
    pub fn level_field(&self) -> Option<&str> {
        self.row_group_cols
            .get(self.group_keys.len())
            .map(String::as_str)
    }
}

/// The backend's answer to a `QueryRequest`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<Row>,
    /// Total rows matched at this level, when the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl QueryResponse {
    pub fn new(rows: Vec<Row>) -> Self {
        QueryResponse { rows, count: None }
    }

    /// A page that filled its window may have more rows behind it.
    pub fn fills(&self, window: RowWindow) -> bool {
        !window.is_empty() && self.rows.len() >= window.len()
    }
}
