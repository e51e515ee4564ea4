//! FILENAME: core/pivot-engine/src/autosize.rs
//! Column auto-sizing.
//!
//! Leaf width = max(header width, widest sampled cell) + padding, clamped to
//! `[min_width, max_width]`. Group widths are then recomputed as the sum of
//! their children. The sizer remembers the signature (column structure plus
//! caller-supplied data identity) of its last run and does nothing until it
//! changes.

use std::hash::{Hash, Hasher};

use rowset::Row;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

use crate::columns::{apply_leaf_widths, leaf_columns, ColumnNode, TREE_COLUMN_KEY};
use crate::grouping::GroupRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoSizeOptions {
    pub min_width: u32,
    pub max_width: u32,
    /// Added to the measured text width.
    pub padding: u32,
    /// Maximum number of rows inspected per run.
    pub sample_limit: usize,
    /// Average glyph width used by `FixedWidthMeasure`.
    pub char_width: f32,
}

impl Default for AutoSizeOptions {
    fn default() -> Self {
        AutoSizeOptions {
            min_width: 60,
            max_width: 480,
            padding: 24,
            sample_limit: 200,
            char_width: 7.5,
        }
    }
}

/// Measures rendered text width in pixels.
pub trait TextMeasure {
    fn width(&self, text: &str) -> f32;
}

/// Approximates every glyph with the same width.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthMeasure {
    pub char_width: f32,
}

impl TextMeasure for FixedWidthMeasure {
    fn width(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.char_width
    }
}

/// Anything that can render the text of a cell for a given accessor.
pub trait CellSource {
    fn cell_text(&self, accessor: &str) -> Option<String>;
}

impl CellSource for Row {
    fn cell_text(&self, accessor: &str) -> Option<String> {
        self.get(accessor)
            .filter(|value| !value.is_null())
            .map(|value| value.display_value())
    }
}

impl CellSource for GroupRow {
    fn cell_text(&self, accessor: &str) -> Option<String> {
        if accessor == TREE_COLUMN_KEY {
            return Some(self.group_value.clone());
        }
        self.values.cell_text(accessor)
    }
}

impl<T: CellSource + ?Sized> CellSource for &T {
    fn cell_text(&self, accessor: &str) -> Option<String> {
        (**self).cell_text(accessor)
    }
}

// ============================================================================
// SIZER
// ============================================================================

pub struct ColumnAutoSizer<M: TextMeasure = FixedWidthMeasure> {
    options: AutoSizeOptions,
    measure: M,
    last_signature: Option<u64>,
}

impl ColumnAutoSizer<FixedWidthMeasure> {
    pub fn new(options: AutoSizeOptions) -> Self {
        let measure = FixedWidthMeasure {
            char_width: options.char_width,
        };
        Self::with_measure(options, measure)
    }
}

impl Default for ColumnAutoSizer<FixedWidthMeasure> {
    fn default() -> Self {
        Self::new(AutoSizeOptions::default())
    }
}

impl<M: TextMeasure> ColumnAutoSizer<M> {
    pub fn with_measure(options: AutoSizeOptions, measure: M) -> Self {
        ColumnAutoSizer {
            options,
            measure,
            last_signature: None,
        }
    }

    pub fn options(&self) -> &AutoSizeOptions {
        &self.options
    }

    /// Forgets the last signature so the next `resize` always measures.
    pub fn invalidate(&mut self) {
        self.last_signature = None;
    }

    /// Width of every leaf column, keyed by accessor.
    pub fn measure_widths<R: CellSource>(
        &self,
        columns: &[ColumnNode],
        rows: &[R],
    ) -> FxHashMap<String, u32> {
        let sample = &rows[..rows.len().min(self.options.sample_limit)];
        leaf_columns(columns)
            .into_iter()
            .map(|leaf| {
                let widest_cell = sample
                    .iter()
                    .filter_map(|row| row.cell_text(&leaf.accessor_key))
                    .map(|text| self.measure.width(&text))
                    .fold(0.0_f32, f32::max);
                let text_width = self.measure.width(&leaf.header).max(widest_cell);
                (leaf.accessor_key.clone(), self.clamp(text_width))
            })
            .collect()
    }

    fn clamp(&self, text_width: f32) -> u32 {
        let width = text_width.ceil() as u32 + self.options.padding;
        width.clamp(self.options.min_width, self.options.max_width.max(self.options.min_width))
    }

    /// Returns resized columns, or `None` when neither the column structure
    /// nor `data_identity` changed since the last run, or when the widths
    /// come out identical to the current ones.
    pub fn resize<R: CellSource>(
        &mut self,
        columns: &[ColumnNode],
        rows: &[R],
        data_identity: u64,
    ) -> Option<Vec<ColumnNode>> {
        let signature = structure_signature(columns, data_identity);
        if self.last_signature == Some(signature) {
            return None;
        }
        self.last_signature = Some(signature);

        let widths = self.measure_widths(columns, rows);
        let unchanged = leaf_columns(columns)
            .iter()
            .all(|leaf| widths.get(&leaf.accessor_key) == Some(&leaf.size));
        if unchanged {
            return None;
        }

        let mut resized = columns.to_vec();
        apply_leaf_widths(&mut resized, &widths);
        Some(resized)
    }
}

/// Hash of headers and accessors (not sizes) plus the data identity.
fn structure_signature(columns: &[ColumnNode], data_identity: u64) -> u64 {
    fn visit(node: &ColumnNode, hasher: &mut FxHasher) {
        match node {
            ColumnNode::Leaf(leaf) => {
                0u8.hash(hasher);
                leaf.accessor_key.hash(hasher);
                leaf.header.hash(hasher);
            }
            ColumnNode::Group(group) => {
                1u8.hash(hasher);
                group.header.hash(hasher);
                group.children.len().hash(hasher);
                for child in &group.children {
                    visit(child, hasher);
                }
            }
        }
    }

    let mut hasher = FxHasher::default();
    data_identity.hash(&mut hasher);
    for node in columns {
        visit(node, &mut hasher);
    }
    hasher.finish()
}
