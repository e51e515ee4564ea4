//! FILENAME: core/drill-engine/src/view.rs
//! Read-only flattened rows handed to the rendering surface.

use pivot_engine::{CellSource, Row, TREE_COLUMN_KEY};

use crate::tree::{NodeId, NodeState, RowTree, TreeEntry};

pub const LOAD_MORE_LABEL: &str = "Load more";
pub const LOADING_LABEL: &str = "Loading...";

#[derive(Debug, Clone, PartialEq)]
pub enum VisibleRow<'a> {
    Group {
        group_key: &'a str,
        group_field: &'a str,
        label: &'a str,
        depth: usize,
        state: NodeState,
        /// False at the last grouping level.
        expandable: bool,
        values: &'a Row,
    },
    /// Trailing "load more" pseudo-row of `parent_key`'s children.
    LoadMore {
        parent_key: &'a str,
        depth: usize,
        current_count: usize,
        loading: bool,
    },
    Flat {
        index: usize,
        values: &'a Row,
    },
}

impl VisibleRow<'_> {
    pub fn depth(&self) -> usize {
        match self {
            VisibleRow::Group { depth, .. } | VisibleRow::LoadMore { depth, .. } => *depth,
            VisibleRow::Flat { .. } => 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, VisibleRow::LoadMore { .. })
    }
}

impl CellSource for VisibleRow<'_> {
    fn cell_text(&self, accessor: &str) -> Option<String> {
        match self {
            VisibleRow::Group { label, values, .. } => {
                if accessor == TREE_COLUMN_KEY {
                    Some(label.to_string())
                } else {
                    values.cell_text(accessor)
                }
            }
            VisibleRow::LoadMore { loading, .. } => {
                if accessor != TREE_COLUMN_KEY {
                    return None;
                }
                let label = if *loading { LOADING_LABEL } else { LOAD_MORE_LABEL };
                Some(label.to_string())
            }
            VisibleRow::Flat { values, .. } => values.cell_text(accessor),
        }
    }
}

/// Depth-first walk of the expanded part of `tree`. Children of collapsed
/// nodes are skipped even when they are loaded.
pub fn flatten_tree(tree: &RowTree, grouping_levels: usize) -> Vec<VisibleRow<'_>> {
    let mut out = Vec::new();
    push_children(tree, NodeId::ROOT, grouping_levels, &mut out);
    out
}

fn push_children<'a>(
    tree: &'a RowTree,
    parent: NodeId,
    grouping_levels: usize,
    out: &mut Vec<VisibleRow<'a>>,
) {
    let Some(node) = tree.get(parent) else {
        return;
    };
    let child_depth = node.path.len();
    for entry in &node.children {
        match *entry {
            TreeEntry::Group(id) => {
                let Some(child) = tree.get(id) else {
                    continue;
                };
                out.push(VisibleRow::Group {
                    group_key: &child.group_key,
                    group_field: child.group_field.as_deref().unwrap_or_default(),
                    label: &child.group_value,
                    depth: child_depth,
                    state: child.state(),
                    expandable: child.path.len() < grouping_levels,
                    values: &child.values,
                });
                if child.expanded {
                    push_children(tree, id, grouping_levels, out);
                }
            }
            TreeEntry::LoadMore { current_count } => out.push(VisibleRow::LoadMore {
                parent_key: &node.group_key,
                depth: child_depth,
                current_count,
                loading: node.loading,
            }),
        }
    }
}

pub fn flatten_rows(rows: &[Row]) -> Vec<VisibleRow<'_>> {
    rows.iter()
        .enumerate()
        .map(|(index, values)| VisibleRow::Flat { index, values })
        .collect()
}
