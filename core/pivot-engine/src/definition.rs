//! FILENAME: core/pivot-engine/src/definition.rs
//! Pivot Definition - The serializable configuration.
//!
//! This module contains all the types needed to DESCRIBE a pivot view.
//! These structures are designed to be:
//! - Serializable (the surrounding application persists them per report)
//! - Produced by the configuration UI and consumed by the engines
//! - Immutable snapshots of user intent: any change is a full reset

use std::hash::{Hash, Hasher};

use rowset::Value;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::client_pivot::PivotMetric;

// ============================================================================
// AGGREGATION
// ============================================================================

/// Aggregation functions the query backend can apply to a metric.
/// The client tier itself only ever sums (see `grouping`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    #[default]
    Sum,
    Avg,
    Count,
    Min,
    Max,
    CountDistinct,
}

impl AggregationType {
    /// The name sent to the backend as `aggFunc`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Sum => "SUM",
            AggregationType::Avg => "AVG",
            AggregationType::Count => "COUNT",
            AggregationType::Min => "MIN",
            AggregationType::Max => "MAX",
            AggregationType::CountDistinct => "COUNT_DISTINCT",
        }
    }
}

// ============================================================================
// FIELD DEFINITIONS
// ============================================================================

/// A metric placed in the Values area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSpec {
    /// Source field the backend aggregates.
    pub field: String,

    /// The aggregation function to apply.
    #[serde(default)]
    pub aggregation: AggregationType,

    /// Output column name. Defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ValueSpec {
    pub fn new(field: impl Into<String>, aggregation: AggregationType) -> Self {
        ValueSpec {
            field: field.into(),
            aggregation,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The name the metric carries in backend output rows.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.field)
    }
}

/// Sort direction for an ORDER BY entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

// ============================================================================
// FILTER DEFINITIONS
// ============================================================================

/// Comparison applied by a filter or having clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Blank,
    NotBlank,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Equals => "equals",
            FilterType::NotEquals => "notEquals",
            FilterType::Contains => "contains",
            FilterType::NotContains => "notContains",
            FilterType::StartsWith => "startsWith",
            FilterType::EndsWith => "endsWith",
            FilterType::GreaterThan => "greaterThan",
            FilterType::GreaterThanOrEqual => "greaterThanOrEqual",
            FilterType::LessThan => "lessThan",
            FilterType::LessThanOrEqual => "lessThanOrEqual",
            FilterType::Blank => "blank",
            FilterType::NotBlank => "notBlank",
        }
    }

    /// Blank/NotBlank ignore the operand.
    pub fn takes_operand(&self) -> bool {
        !matches!(self, FilterType::Blank | FilterType::NotBlank)
    }
}

/// A row-level filter (SQL WHERE).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub value: Value,
}

/// A filter on an aggregated value (SQL HAVING).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HavingSpec {
    pub field: String,
    #[serde(default)]
    pub aggregation: AggregationType,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub value: Value,
}

// ============================================================================
// MAIN DEFINITION STRUCT
// ============================================================================

/// The complete configuration of a pivot view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotConfig {
    /// Grouping fields (Row area), outer to inner.
    #[serde(default)]
    pub rows: Vec<String>,

    /// Split fields (Column area), outer to inner.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Metrics (Values area).
    #[serde(default)]
    pub values: Vec<ValueSpec>,

    #[serde(default)]
    pub order_by: Vec<OrderBy>,

    #[serde(default)]
    pub filters: Vec<FilterSpec>,

    #[serde(default)]
    pub having: Vec<HavingSpec>,
}

impl PivotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_grouped(&self) -> bool {
        !self.rows.is_empty()
    }

    pub fn is_split(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Metrics as the client pivot sums them, in configuration order.
    pub fn pivot_metrics(&self) -> Vec<PivotMetric> {
        self.values.iter().map(PivotMetric::from).collect()
    }

    /// A stable hash of the whole configuration. Two configurations with the
    /// same fingerprint produce the same requests.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        match serde_json::to_string(self) {
            Ok(encoded) => encoded.hash(&mut hasher),
            // Serialization of plain data cannot fail; fall back to Debug.
            Err(_) => format!("{:?}", self).hash(&mut hasher),
        }
        hasher.finish()
    }
}
