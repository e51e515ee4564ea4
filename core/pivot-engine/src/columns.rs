//! FILENAME: core/pivot-engine/src/columns.rs
//! Column Hierarchy - Multi-level column headers from pivoted column names.
//!
//! A backend that pivots on split fields returns one column per combination
//! of split values, named by joining the values with a delimiter, e.g.
//! `"Electronics|2023|Sales"`. This module rebuilds the header tree from
//! those names:
//!
//! ```text
//! ["2023|A", "2023|B", "2024|A"]
//!
//! 2023 ──┬── A   (accessor "2023|A")
//!        └── B   (accessor "2023|B")
//! 2024 ───── A   (accessor "2024|A")
//! ```
//!
//! Internal header nodes become group columns whose width is the sum of
//! their children; terminal segments become leaf columns.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::PivotError;

/// Delimiter the backend uses between split values in pivoted column names.
pub const DEFAULT_COLUMN_DELIMITER: &str = "|";

/// Accessor of the synthetic row-dimension (tree) column.
pub const TREE_COLUMN_KEY: &str = "__group";

/// Width given to leaf columns before auto-sizing.
pub const DEFAULT_LEAF_WIDTH: u32 = 120;

/// Width given to the tree column before auto-sizing.
pub const TREE_COLUMN_WIDTH: u32 = 220;

// ============================================================================
// COLUMN NODES
// ============================================================================

/// A column that reads one field of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafColumn {
    /// Field name looked up in each row.
    pub accessor_key: String,
    /// Display label.
    pub header: String,
    /// Width in pixels.
    pub size: u32,
    /// Whether values should be right-aligned/number formatted.
    pub is_number: bool,
}

impl LeafColumn {
    pub fn new(accessor_key: impl Into<String>, header: impl Into<String>, is_number: bool) -> Self {
        LeafColumn {
            accessor_key: accessor_key.into(),
            header: header.into(),
            size: DEFAULT_LEAF_WIDTH,
            is_number,
        }
    }
}

/// A header spanning several child columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupColumn {
    pub header: String,
    /// Always the sum of the children's sizes.
    pub size: u32,
    pub children: Vec<ColumnNode>,
}

impl GroupColumn {
    pub fn new(header: impl Into<String>, children: Vec<ColumnNode>) -> Self {
        let size = children.iter().map(ColumnNode::size).sum();
        GroupColumn {
            header: header.into(),
            size,
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ColumnNode {
    Leaf(LeafColumn),
    Group(GroupColumn),
}

impl ColumnNode {
    pub fn header(&self) -> &str {
        match self {
            ColumnNode::Leaf(leaf) => &leaf.header,
            ColumnNode::Group(group) => &group.header,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            ColumnNode::Leaf(leaf) => leaf.size,
            ColumnNode::Group(group) => group.size,
        }
    }

    /// Number of header rows this node occupies.
    pub fn depth(&self) -> usize {
        match self {
            ColumnNode::Leaf(_) => 1,
            ColumnNode::Group(group) => {
                1 + group.children.iter().map(ColumnNode::depth).max().unwrap_or(0)
            }
        }
    }

    /// Recomputes group widths bottom-up and returns this node's width.
    pub fn recompute_sizes(&mut self) -> u32 {
        match self {
            ColumnNode::Leaf(leaf) => leaf.size,
            ColumnNode::Group(group) => {
                group.size = group.children.iter_mut().map(ColumnNode::recompute_sizes).sum();
                group.size
            }
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafColumn>) {
        match self {
            ColumnNode::Leaf(leaf) => out.push(leaf),
            ColumnNode::Group(group) => {
                for child in &group.children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut LeafColumn)) {
        match self {
            ColumnNode::Leaf(leaf) => f(leaf),
            ColumnNode::Group(group) => {
                for child in &mut group.children {
                    child.for_each_leaf_mut(f);
                }
            }
        }
    }
}

/// Expands a column tree into its leaf columns, left to right.
pub fn leaf_columns(nodes: &[ColumnNode]) -> Vec<&LeafColumn> {
    let mut out = Vec::new();
    for node in nodes {
        node.collect_leaves(&mut out);
    }
    out
}

/// Number of header rows needed to render `nodes`.
pub fn hierarchy_depth(nodes: &[ColumnNode]) -> usize {
    nodes.iter().map(ColumnNode::depth).max().unwrap_or(0)
}

/// Sets leaf widths by accessor and propagates the sums to every group.
/// Leaves missing from `widths` keep their current size.
pub fn apply_leaf_widths(nodes: &mut [ColumnNode], widths: &FxHashMap<String, u32>) {
    for node in nodes.iter_mut() {
        node.for_each_leaf_mut(&mut |leaf| {
            if let Some(&width) = widths.get(&leaf.accessor_key) {
                leaf.size = width;
            }
        });
        node.recompute_sizes();
    }
}

/// The row-dimension column shown left of the data columns when grouping.
pub fn tree_column(grouping_fields: &[String]) -> ColumnNode {
    ColumnNode::Leaf(LeafColumn {
        accessor_key: TREE_COLUMN_KEY.to_string(),
        header: grouping_fields.join(" / "),
        size: TREE_COLUMN_WIDTH,
        is_number: false,
    })
}

// ============================================================================
// ORDERING AND METRIC LAYOUT
// ============================================================================

/// How sibling header segments are ordered. Ordering never changes shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ColumnOrder {
    /// Sort siblings by segment text.
    #[default]
    Lexicographic,
    /// Keep the order in which segments first appeared in the input.
    FirstSeen,
    /// Rank segments by their position in this list; unlisted segments
    /// follow in lexicographic order.
    Explicit(Vec<String>),
}

impl ColumnOrder {
    fn sort_segments(&self, segments: &mut [(&str, usize)]) {
        match self {
            ColumnOrder::Lexicographic => segments.sort_by(|a, b| a.0.cmp(b.0)),
            ColumnOrder::FirstSeen => segments.sort_by_key(|s| s.1),
            ColumnOrder::Explicit(ranking) => {
                let rank = |segment: &str| {
                    ranking
                        .iter()
                        .position(|r| r == segment)
                        .unwrap_or(usize::MAX)
                };
                segments.sort_by(|a, b| rank(a.0).cmp(&rank(b.0)).then_with(|| a.0.cmp(b.0)));
            }
        }
    }
}

/// Whether the metric is part of the composite names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MetricLayout {
    /// Names already end in the metric segment (backend-pivoted data).
    #[default]
    Folded,
    /// Names stop at the split values; each terminal fans out into one leaf
    /// per metric, read from `"<name><delimiter><metric>"`.
    Open(Vec<String>),
}

// ============================================================================
// TRIE
// ============================================================================

#[derive(Debug, Default)]
struct ColumnTrie<'a> {
    children: Vec<(&'a str, ColumnTrie<'a>)>,
    index: FxHashMap<&'a str, usize>,
    /// The original composite name if some input ends at this node.
    terminal: Option<&'a str>,
}

impl<'a> ColumnTrie<'a> {
    fn insert(&mut self, name: &'a str, delimiter: &str) {
        let mut node = self;
        for segment in name.split(delimiter) {
            let slot = match node.index.get(segment) {
                Some(&slot) => slot,
                None => {
                    let slot = node.children.len();
                    node.index.insert(segment, slot);
                    node.children.push((segment, ColumnTrie::default()));
                    slot
                }
            };
            node = &mut node.children[slot].1;
        }
        node.terminal = Some(name);
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builds column-group trees from delimited composite column names.
#[derive(Debug, Clone)]
pub struct ColumnHierarchyBuilder {
    delimiter: String,
    order: ColumnOrder,
    metrics: MetricLayout,
}

impl ColumnHierarchyBuilder {
    pub fn new(delimiter: impl Into<String>) -> Result<Self, PivotError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(PivotError::EmptyDelimiter);
        }
        Ok(ColumnHierarchyBuilder {
            delimiter,
            order: ColumnOrder::default(),
            metrics: MetricLayout::default(),
        })
    }

    pub fn with_order(mut self, order: ColumnOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricLayout) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Builds the header tree. An empty input yields an empty tree; the
    /// caller then renders only the tree column.
    pub fn build<S: AsRef<str>>(&self, names: &[S]) -> Vec<ColumnNode> {
        let mut trie = ColumnTrie::default();
        for name in names {
            trie.insert(name.as_ref(), &self.delimiter);
        }
        self.convert(&trie)
    }

    fn convert(&self, trie: &ColumnTrie<'_>) -> Vec<ColumnNode> {
        let mut nodes = Vec::with_capacity(trie.children.len());
        for slot in self.ordered_slots(trie) {
            let (segment, child) = &trie.children[slot];
            let mut columns = child
                .terminal
                .map(|name| self.terminal_leaves(segment, name))
                .unwrap_or_default();

            if child.children.is_empty() {
                if self.fans_out_metrics() {
                    nodes.push(ColumnNode::Group(GroupColumn::new(*segment, columns)));
                } else {
                    nodes.append(&mut columns);
                }
            } else {
                // A name that is also a prefix of longer names keeps its own
                // leaves ahead of the nested ones.
                columns.extend(self.convert(child));
                nodes.push(ColumnNode::Group(GroupColumn::new(*segment, columns)));
            }
        }
        nodes
    }

    fn fans_out_metrics(&self) -> bool {
        matches!(&self.metrics, MetricLayout::Open(metrics) if !metrics.is_empty())
    }

    fn ordered_slots(&self, trie: &ColumnTrie<'_>) -> Vec<usize> {
        let mut segments: Vec<(&str, usize)> = trie
            .children
            .iter()
            .enumerate()
            .map(|(slot, (segment, _))| (*segment, slot))
            .collect();
        self.order.sort_segments(&mut segments);
        segments.into_iter().map(|(_, slot)| slot).collect()
    }

    fn terminal_leaves(&self, segment: &str, name: &str) -> Vec<ColumnNode> {
        match &self.metrics {
            MetricLayout::Open(metrics) if !metrics.is_empty() => {
                let mut ranked: Vec<(&str, usize)> = metrics
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (m.as_str(), i))
                    .collect();
                self.order.sort_segments(&mut ranked);
                ranked
                    .into_iter()
                    .map(|(metric, _)| {
                        ColumnNode::Leaf(LeafColumn::new(
                            format!("{}{}{}", name, self.delimiter, metric),
                            metric,
                            true,
                        ))
                    })
                    .collect()
            }
            _ => vec![ColumnNode::Leaf(LeafColumn::new(name, segment, true))],
        }
    }
}

/// Builds a header tree with default ordering for backend-pivoted names.
pub fn build_column_hierarchy<S: AsRef<str>>(
    names: &[S],
    delimiter: &str,
) -> Result<Vec<ColumnNode>, PivotError> {
    Ok(ColumnHierarchyBuilder::new(delimiter)?.build(names))
}
