//! FILENAME: core/pivot-engine/src/shape.rs
//! Pivot Shape - Decides how a result set is laid out and builds its columns.
//!
//! Three shapes exist:
//! - `Flat`: no split fields. One column per non-grouping field, in backend
//!   field order.
//! - `FlatPivoted`: split fields, no grouping. Columns come from the
//!   backend's composite column names.
//! - `GroupedPivoted`: split and grouping fields. Same columns as
//!   `FlatPivoted`, rows folded into a group tree.
//!
//! A flat shape can still be grouped; callers check the grouping fields
//! independently (`ShapedRows::Grouped`).
//!
//! The cross-tabulation itself normally happens in the backend, keeping the
//! client O(rows). When the backend lacks that capability (`PivotMode::Client`)
//! the raw rows are pivoted by `client_pivot` first, producing the same
//! shape.

use rowset::{Row, Value};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::client_pivot::{pivot_rows, PivotMetric};
use crate::columns::{
    leaf_columns, tree_column, ColumnHierarchyBuilder, ColumnNode, ColumnOrder, LeafColumn,
    DEFAULT_COLUMN_DELIMITER,
};
use crate::error::PivotError;
use crate::grouping::{build_grouped_rows, is_internal_field, GroupRow};

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Flat,
    FlatPivoted,
    GroupedPivoted,
}

/// Where the cross-tabulation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PivotMode {
    /// The backend returns pre-pivoted, aggregated rows.
    #[default]
    Backend,
    /// The backend returns raw rows; the client pivots.
    Client,
}

pub fn classify(grouping_fields: &[String], split_fields: &[String]) -> ShapeKind {
    match (grouping_fields.is_empty(), split_fields.is_empty()) {
        (_, true) => ShapeKind::Flat,
        (true, false) => ShapeKind::FlatPivoted,
        (false, false) => ShapeKind::GroupedPivoted,
    }
}

// ============================================================================
// FIELD KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Number,
    Date,
    Text,
}

/// Name fragments that mark a text field as a date dimension.
const DATE_NAME_HINTS: &[&str] = &["date", "data", "anno", "year", "mese", "month"];

/// Infers a field's kind from a sample value, falling back to name hints
/// for non-numeric values.
pub fn infer_field_kind(name: &str, sample: &Value) -> FieldKind {
    if sample.is_number() {
        return FieldKind::Number;
    }
    let lower = name.to_lowercase();
    if DATE_NAME_HINTS.iter().any(|hint| lower.contains(hint)) {
        FieldKind::Date
    } else {
        FieldKind::Text
    }
}

/// Picks the field used as category axis (chart X axis, flat key column).
/// Prefers the first grouping field, then the first non-numeric field of
/// the sample row, then its first field at all.
pub fn category_field(sample: Option<&Row>, grouping_fields: &[String]) -> Option<String> {
    if let Some(first) = grouping_fields.first() {
        return Some(first.clone());
    }
    let sample = sample?;
    sample
        .iter()
        .find(|(name, value)| !is_internal_field(name) && !value.is_number())
        .or_else(|| sample.iter().find(|(name, _)| !is_internal_field(name)))
        .map(|(name, _)| name.to_string())
}

/// Non-grouping, non-internal field names across `rows`, in first-seen order.
/// For pivoted results these are the composite column names.
pub fn value_fields(rows: &[Row], grouping_fields: &[String]) -> Vec<String> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = Vec::new();
    for row in rows {
        for name in row.keys() {
            if is_internal_field(name) || grouping_fields.iter().any(|g| g == name) {
                continue;
            }
            if seen.insert(name) {
                out.push(name.to_string());
            }
        }
    }
    out
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Options shared by every resolve call of one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShapeOptions {
    pub delimiter: String,
    pub column_order: ColumnOrder,
    pub mode: PivotMode,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        ShapeOptions {
            delimiter: DEFAULT_COLUMN_DELIMITER.to_string(),
            column_order: ColumnOrder::default(),
            mode: PivotMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapedRows {
    Flat(Vec<Row>),
    Grouped(Vec<GroupRow>),
}

/// Rows and columns ready for a rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedShape {
    pub kind: ShapeKind,
    pub rows: ShapedRows,
    pub columns: Vec<ColumnNode>,
    /// Field names the data columns read (metric or composite names).
    pub value_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PivotShapeResolver {
    options: ShapeOptions,
    builder: ColumnHierarchyBuilder,
}

impl PivotShapeResolver {
    pub fn new(options: ShapeOptions) -> Result<Self, PivotError> {
        let builder = ColumnHierarchyBuilder::new(options.delimiter.clone())?
            .with_order(options.column_order.clone());
        Ok(PivotShapeResolver { options, builder })
    }

    pub fn options(&self) -> &ShapeOptions {
        &self.options
    }

    /// Builds the display columns for `names`. The tree column leads when
    /// grouping fields exist. `sample` drives number detection in the flat
    /// shape.
    pub fn columns(
        &self,
        kind: ShapeKind,
        grouping_fields: &[String],
        names: &[String],
        sample: Option<&Row>,
    ) -> Vec<ColumnNode> {
        let mut columns = Vec::with_capacity(names.len() + 1);
        if !grouping_fields.is_empty() {
            columns.push(tree_column(grouping_fields));
        }
        match kind {
            ShapeKind::Flat => {
                columns.extend(names.iter().map(|name| {
                    let sample_value = sample.map_or(&Value::Null, |row| row.value(name));
                    let is_number = infer_field_kind(name, sample_value) == FieldKind::Number;
                    ColumnNode::Leaf(LeafColumn::new(name.clone(), name.clone(), is_number))
                }));
            }
            ShapeKind::FlatPivoted | ShapeKind::GroupedPivoted => {
                columns.extend(self.builder.build(names));
            }
        }
        columns
    }

    /// Classifies `rows` and reshapes them for display.
    pub fn resolve(
        &self,
        rows: Vec<Row>,
        grouping_fields: &[String],
        split_fields: &[String],
        metrics: &[PivotMetric],
    ) -> Result<ResolvedShape, PivotError> {
        if let Some(field) = grouping_fields.iter().find(|f| split_fields.contains(*f)) {
            return Err(PivotError::OverlappingField(field.clone()));
        }

        let rows = match self.options.mode {
            PivotMode::Client if !split_fields.is_empty() => pivot_rows(
                &rows,
                grouping_fields,
                split_fields,
                metrics,
                &self.options.delimiter,
            )?,
            _ => rows,
        };

        let kind = classify(grouping_fields, split_fields);
        let names = value_fields(&rows, grouping_fields);
        let columns = self.columns(kind, grouping_fields, &names, rows.first());

        let rows = if grouping_fields.is_empty() {
            ShapedRows::Flat(rows)
        } else {
            let mut groups = build_grouped_rows(&rows, grouping_fields);
            if kind == ShapeKind::GroupedPivoted {
                let accessors: Vec<&str> = leaf_columns(&columns)
                    .iter()
                    .filter(|leaf| names.contains(&leaf.accessor_key))
                    .map(|leaf| leaf.accessor_key.as_str())
                    .collect();
                fill_missing(&mut groups, &accessors);
            }
            ShapedRows::Grouped(groups)
        };

        Ok(ResolvedShape {
            kind,
            rows,
            columns,
            value_fields: names,
        })
    }
}

/// Gives every group an entry for every pivoted accessor, null when the
/// group has no data for that combination.
fn fill_missing(groups: &mut [GroupRow], accessors: &[&str]) {
    for group in groups {
        for accessor in accessors {
            if !group.values.contains_key(accessor) {
                group.values.insert(*accessor, Value::Null);
            }
        }
        fill_missing(&mut group.children, accessors);
    }
}
