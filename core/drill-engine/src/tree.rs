//! FILENAME: core/drill-engine/src/tree.rs
//! Row Tree - Arena storage for the lazily loaded group hierarchy.
//!
//! Nodes live in a flat `Vec` and refer to each other by `NodeId`. A side
//! index maps each `group_key` to its handle, so locating the target of a
//! "load more" merge is a hash lookup rather than a walk from the root.
//! Nodes are never removed; a configuration change replaces the whole tree.
//!
//! ```text
//! root ("")
//! ├── North            (children fetched, expanded)
//! │   ├── North|||2023
//! │   ├── North|||2024
//! │   └── [load more @2]
//! └── South            (collapsed, not fetched)
//! ```

use pivot_engine::{group_label, join_group_key, GroupPath, Row, RowWindow, Value};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::DrillError;

// ============================================================================
// HANDLES AND ENTRIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// The synthetic root; its children are the first grouping level.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One slot in a node's ordered child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntry {
    Group(NodeId),
    /// Placeholder for the next page; `current_count` is the number of rows
    /// fetched for the owning node when it was created.
    LoadMore { current_count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Collapsed,
    Loading,
    Expanded,
    ExpandedExhausted,
}

// ============================================================================
// PAGINATION CURSOR
// ============================================================================

/// Position of a node's (or the flat list's) next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub fetched_count: usize,
    pub page_size: usize,
    /// Total row ceiling (preview mode).
    pub limit: Option<usize>,
    pub has_more: bool,
}

impl PageCursor {
    pub fn new(page_size: usize, limit: Option<usize>) -> Self {
        PageCursor {
            fetched_count: 0,
            page_size: page_size.max(1),
            limit,
            has_more: true,
        }
    }

    /// `[fetched, fetched + page_size)`, clipped to the row ceiling.
    pub fn next_window(&self) -> RowWindow {
        let mut end = self.fetched_count.saturating_add(self.page_size);
        if let Some(limit) = self.limit {
            end = end.min(limit);
        }
        RowWindow::new(self.fetched_count, end.max(self.fetched_count))
    }

    pub fn can_fetch(&self) -> bool {
        self.has_more && !self.next_window().is_empty()
    }

    /// Records `returned` rows for `window`. More rows may exist only when
    /// the window came back full and the ceiling was not reached.
    pub fn advance(&mut self, window: RowWindow, returned: usize) -> bool {
        self.fetched_count = window.start_row + returned;
        let at_limit = self.limit.is_some_and(|limit| self.fetched_count >= limit);
        self.has_more = !window.is_empty() && returned >= window.len() && !at_limit;
        self.has_more
    }
}

// ============================================================================
// NODES
// ============================================================================

#[derive(Debug, Clone)]
pub struct TreeNode {
    /// `|||`-joined path; `""` for the root.
    pub group_key: String,
    /// Grouping values from the root to this node.
    pub path: GroupPath,
    /// Grouping field this node discriminates on; `None` for the root.
    pub group_field: Option<String>,
    pub group_value: String,
    /// The backend row this node was created from.
    pub values: Row,
    pub parent: Option<NodeId>,
    pub children: Vec<TreeEntry>,
    pub expanded: bool,
    pub loading: bool,
    /// At least one page has been merged.
    pub loaded: bool,
    pub cursor: PageCursor,
    pub last_error: Option<String>,
}

impl TreeNode {
    fn root(cursor: PageCursor) -> Self {
        TreeNode {
            group_key: String::new(),
            path: GroupPath::new(),
            group_field: None,
            group_value: String::new(),
            values: Row::new(),
            parent: None,
            children: Vec::new(),
            expanded: true,
            loading: false,
            loaded: false,
            cursor,
            last_error: None,
        }
    }

    /// 0-based grouping level; the root reports 0 as well.
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Visibility wins: a collapsed node reports `Collapsed` even while a
    /// fetch for it is in flight.
    pub fn state(&self) -> NodeState {
        if !self.expanded {
            NodeState::Collapsed
        } else if self.loading || !self.loaded {
            NodeState::Loading
        } else if self.cursor.has_more {
            NodeState::Expanded
        } else {
            NodeState::ExpandedExhausted
        }
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(|entry| match entry {
            TreeEntry::Group(id) => Some(*id),
            TreeEntry::LoadMore { .. } => None,
        })
    }

    pub fn placeholder(&self) -> Option<usize> {
        self.children.iter().find_map(|entry| match entry {
            TreeEntry::LoadMore { current_count } => Some(*current_count),
            TreeEntry::Group(_) => None,
        })
    }
}

/// Result of merging one page into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMerge {
    /// Child nodes created.
    pub added: usize,
    pub has_more: bool,
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone)]
pub struct RowTree {
    nodes: Vec<TreeNode>,
    index: FxHashMap<String, NodeId>,
    page_size: usize,
    limit: Option<usize>,
}

impl RowTree {
    pub fn new(page_size: usize, limit: Option<usize>) -> Self {
        let root = TreeNode::root(PageCursor::new(page_size, limit));
        let mut index = FxHashMap::default();
        index.insert(String::new(), NodeId::ROOT);
        RowTree {
            nodes: vec![root],
            index,
            page_size,
            limit,
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn root_mut(&mut self) -> &mut TreeNode {
        &mut self.nodes[0]
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn find(&self, group_key: &str) -> Option<NodeId> {
        self.index.get(group_key).copied()
    }

    /// Node whose grouping values equal `path`; the empty path is the root.
    pub fn locate_by_path<S: AsRef<str>>(&self, path: &[S]) -> Option<NodeId> {
        self.find(&join_group_key(path))
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TreeNode> {
        self.nodes.iter_mut()
    }

    /// Merges a fetched page into `parent`.
    ///
    /// `at` is `None` for the first page (the node must not have been loaded
    /// yet) or the `current_count` of the placeholder being replaced. The
    /// tree is left untouched when the target slot cannot be found.
    /// `returned` is the raw row count the backend delivered for `window`,
    /// which may differ from `rows.len()` when the page was pivoted locally.
    pub fn merge_page(
        &mut self,
        parent: NodeId,
        at: Option<usize>,
        field: &str,
        rows: Vec<Row>,
        window: RowWindow,
        returned: usize,
    ) -> Result<PageMerge, DrillError> {
        let node = self
            .get(parent)
            .ok_or_else(|| DrillError::Inconsistent(format!("no node with id {}", parent.index())))?;

        let slot = match at {
            None if node.loaded => {
                return Err(DrillError::Inconsistent(format!(
                    "first page for {:?} arrived after it was loaded",
                    node.group_key
                )))
            }
            None => node.children.len(),
            Some(current_count) => node
                .children
                .iter()
                .position(|entry| *entry == TreeEntry::LoadMore { current_count })
                .ok_or_else(|| {
                    DrillError::Inconsistent(format!(
                        "no placeholder at {} under {:?}",
                        current_count, node.group_key
                    ))
                })?,
        };
        let replaces = usize::from(at.is_some());

        let mut entries = Vec::with_capacity(rows.len() + 1);
        for row in rows {
            if let Some(id) = self.attach(parent, field, row) {
                entries.push(TreeEntry::Group(id));
            }
        }
        let added = entries.len();

        let node = &mut self.nodes[parent.index()];
        let has_more = node.cursor.advance(window, returned);
        if has_more {
            entries.push(TreeEntry::LoadMore {
                current_count: node.cursor.fetched_count,
            });
        }
        node.children.splice(slot..slot + replaces, entries);
        node.loaded = true;

        Ok(PageMerge { added, has_more })
    }

    /// Creates a child of `parent` for `row`, or folds the row into an
    /// existing sibling with the same key. Returns the new node, if any.
    fn attach(&mut self, parent: NodeId, field: &str, row: Row) -> Option<NodeId> {
        let label = group_label(row.value(field));
        let mut path = self.nodes[parent.index()].path.clone();
        path.push(label.clone());
        let group_key = join_group_key(path.as_slice());

        if let Some(existing) = self.find(&group_key) {
            merge_values(&mut self.nodes[existing.index()].values, &row);
            return None;
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(TreeNode {
            group_key: group_key.clone(),
            path,
            group_field: Some(field.to_string()),
            group_value: label,
            values: row,
            parent: Some(parent),
            children: Vec::new(),
            expanded: false,
            loading: false,
            loaded: false,
            cursor: PageCursor::new(self.page_size, self.limit),
            last_error: None,
        });
        self.index.insert(group_key, id);
        Some(id)
    }
}

/// Folds `incoming` into `target` under the sum-or-omit rule used for
/// group aggregates: numbers add up, nulls never overwrite a value, and a
/// field holding a number on one side and text on the other is dropped.
/// Matching text (the group labels) keeps the first value.
pub(crate) fn merge_values(target: &mut Row, incoming: &Row) {
    for (field, value) in incoming.iter() {
        let merged = match (target.get(field), value) {
            (Some(Value::Number(a)), Value::Number(b)) => Some(Value::Number(a + b)),
            (None, _) => Some(value.clone()),
            (Some(existing), _) if existing.is_null() => Some(value.clone()),
            (Some(_), Value::Null) => continue,
            (Some(existing), _) if existing.is_number() != value.is_number() => None,
            _ => continue,
        };
        match merged {
            Some(merged) => {
                target.insert(field, merged);
            }
            None => {
                target.remove(field);
            }
        }
    }
}
