//! FILENAME: core/pivot-engine/src/client_pivot.rs
//! Client Pivot - Cross-tabulates raw rows when the backend cannot.
//!
//! Some backends only return raw, unaggregated rows. In that case the client
//! performs the pivot itself:
//! 1. Group rows by the combination of grouping values
//! 2. Fan out by split-value combination (the column path, e.g. "East|2023")
//! 3. Sum each metric into `"<colPath>|<metric>"`, reading the metric's
//!    source field and naming the output by its display name
//!
//! The output has exactly the shape a pivoting backend returns: one row per
//! grouping combination, every pivoted column present on every row (null
//! where the combination has no data), metric folded into the column name.

use rowset::{Row, Value};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::definition::ValueSpec;
use crate::error::PivotError;
use crate::grouping::{group_label, join_group_key};

/// A metric to sum: read from `field`, written as `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PivotMetric {
    pub field: String,
    pub name: String,
}

impl PivotMetric {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        PivotMetric {
            name: field.clone(),
            field,
        }
    }

    pub fn aliased(field: impl Into<String>, name: impl Into<String>) -> Self {
        PivotMetric {
            field: field.into(),
            name: name.into(),
        }
    }
}

impl From<&ValueSpec> for PivotMetric {
    fn from(spec: &ValueSpec) -> Self {
        PivotMetric::aliased(spec.field.clone(), spec.display_name())
    }
}

impl From<&str> for PivotMetric {
    fn from(field: &str) -> Self {
        PivotMetric::new(field)
    }
}

struct OutputRow<'a> {
    /// Grouping values as first seen for this combination.
    keys: Vec<&'a Value>,
    /// Sum per pivoted column; absent until a number arrives.
    sums: FxHashMap<String, f64>,
}

/// Pivots raw `rows` on `split_fields`, summing `metrics`.
pub fn pivot_rows(
    rows: &[Row],
    grouping_fields: &[String],
    split_fields: &[String],
    metrics: &[PivotMetric],
    delimiter: &str,
) -> Result<Vec<Row>, PivotError> {
    if delimiter.is_empty() {
        return Err(PivotError::EmptyDelimiter);
    }
    if !split_fields.is_empty() && metrics.is_empty() {
        return Err(PivotError::SplitWithoutMetrics(split_fields.to_vec()));
    }
    if let Some(field) = grouping_fields.iter().find(|f| split_fields.contains(*f)) {
        return Err(PivotError::OverlappingField(field.clone()));
    }

    let mut outputs: Vec<OutputRow<'_>> = Vec::new();
    let mut slots: FxHashMap<String, usize> = FxHashMap::default();
    let mut col_paths: Vec<String> = Vec::new();
    let mut known_paths: FxHashSet<String> = FxHashSet::default();

    for row in rows {
        let labels: Vec<String> = grouping_fields
            .iter()
            .map(|f| group_label(row.value(f)))
            .collect();
        let key = join_group_key(&labels);
        let slot = match slots.get(&key) {
            Some(&slot) => slot,
            None => {
                slots.insert(key, outputs.len());
                outputs.push(OutputRow {
                    keys: grouping_fields.iter().map(|f| row.value(f)).collect(),
                    sums: FxHashMap::default(),
                });
                outputs.len() - 1
            }
        };

        let col_path = split_fields
            .iter()
            .map(|f| group_label(row.value(f)))
            .collect::<Vec<_>>()
            .join(delimiter);
        if !split_fields.is_empty() && known_paths.insert(col_path.clone()) {
            col_paths.push(col_path.clone());
        }

        for metric in metrics {
            let Some(n) = row.value(&metric.field).as_number() else {
                continue;
            };
            let column = composite_name(&col_path, &metric.name, split_fields.is_empty(), delimiter);
            *outputs[slot].sums.entry(column).or_insert(0.0) += n;
        }
    }

    // Column order: metric by metric, column paths in first-seen order.
    let mut columns: Vec<String> = Vec::with_capacity(metrics.len() * col_paths.len().max(1));
    for metric in metrics {
        if split_fields.is_empty() {
            columns.push(metric.name.clone());
        } else {
            for path in &col_paths {
                columns.push(composite_name(path, &metric.name, false, delimiter));
            }
        }
    }

    Ok(outputs
        .into_iter()
        .map(|output| {
            let mut out = Row::with_capacity(grouping_fields.len() + columns.len());
            for (field, value) in grouping_fields.iter().zip(output.keys) {
                out.insert(field.clone(), value.clone());
            }
            for column in &columns {
                let value = output
                    .sums
                    .get(column)
                    .map_or(Value::Null, |&sum| Value::Number(sum));
                out.insert(column.clone(), value);
            }
            out
        })
        .collect())
}

fn composite_name(col_path: &str, metric: &str, unsplit: bool, delimiter: &str) -> String {
    if unsplit {
        metric.to_string()
    } else {
        format!("{}{}{}", col_path, delimiter, metric)
    }
}
