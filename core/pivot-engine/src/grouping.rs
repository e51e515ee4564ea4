//! FILENAME: core/pivot-engine/src/grouping.rs
//! Grouped Data - Builds the row-group tree from flat rows.
//!
//! Algorithm:
//! 1. Partition rows by the value of the grouping field at the current depth,
//!    keeping partitions in order of first occurrence.
//! 2. Emit one `GroupRow` per partition, keyed by the `|||`-joined path of
//!    grouping values from the root.
//! 3. Recurse into each partition until the last grouping field.
//!
//! Merge rule: every group carries, for each non-grouping field, the SUM of
//! that field over the rows it covers, provided every non-null value seen is
//! numeric. Fields with any non-numeric value are omitted. The client never
//! re-applies AVG/MIN/MAX; values that need those semantics come
//! pre-aggregated from the backend.

use rowset::{Row, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;

/// Separator between grouping values in a group key.
pub const GROUP_KEY_SEPARATOR: &str = "|||";

/// Label used for null, missing and empty grouping values.
pub const EMPTY_GROUP_LABEL: &str = "N/A";

/// Fields starting with this prefix are bookkeeping and never aggregated.
pub const INTERNAL_FIELD_PREFIX: &str = "__";

/// Path of grouping values from the root to a node.
pub type GroupPath = SmallVec<[String; 4]>;

/// Normalized grouping label for a value. Null, missing and `""` all map to
/// the same sentinel so they form a single group.
pub fn group_label(value: &Value) -> String {
    if value.is_blank() {
        EMPTY_GROUP_LABEL.to_string()
    } else {
        value.display_value()
    }
}

/// Joins grouping values into a group key. Identical paths always produce
/// identical keys.
pub fn join_group_key<S: AsRef<str>>(path: &[S]) -> String {
    let mut key = String::new();
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            key.push_str(GROUP_KEY_SEPARATOR);
        }
        key.push_str(segment.as_ref());
    }
    key
}

pub fn is_internal_field(field: &str) -> bool {
    field.starts_with(INTERNAL_FIELD_PREFIX)
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum FieldSum {
    /// Only nulls so far.
    Empty,
    Sum(f64),
    /// A non-numeric value was seen; the field is dropped.
    Mixed,
}

impl FieldSum {
    fn add(self, value: &Value) -> Self {
        match (self, value) {
            (state, Value::Null) => state,
            (FieldSum::Mixed, _) => FieldSum::Mixed,
            (FieldSum::Empty, Value::Number(n)) => FieldSum::Sum(*n),
            (FieldSum::Sum(total), Value::Number(n)) => FieldSum::Sum(total + n),
            (_, _) => FieldSum::Mixed,
        }
    }
}

/// Sums every summable field across `rows`, skipping `excluded` fields and
/// internal fields. A field is summable when at least one value is numeric
/// and no non-null value is anything else. Output keeps first-seen order.
pub fn aggregate_rows<'a, I>(rows: I, excluded: &[String]) -> Row
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut order: Vec<(&'a str, FieldSum)> = Vec::new();
    let mut slots: FxHashMap<&'a str, usize> = FxHashMap::default();

    for row in rows {
        for (field, value) in row.iter() {
            if is_internal_field(field) || excluded.iter().any(|f| f == field) {
                continue;
            }
            let slot = *slots.entry(field).or_insert_with(|| {
                order.push((field, FieldSum::Empty));
                order.len() - 1
            });
            order[slot].1 = order[slot].1.add(value);
        }
    }

    order
        .into_iter()
        .filter_map(|(field, sum)| match sum {
            FieldSum::Sum(total) => Some((field, Value::Number(total))),
            _ => None,
        })
        .collect()
}

// ============================================================================
// GROUP ROWS
// ============================================================================

/// A synthetic row standing for one distinct grouping value at one depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRow {
    /// `|||`-joined path of grouping values; unique within a tree.
    pub group_key: String,
    /// The grouping field this node discriminates on.
    pub group_field: String,
    /// Normalized grouping value (`N/A` for blanks).
    pub group_value: String,
    /// 0-based grouping level.
    pub depth: usize,
    /// Child groups; empty at the last grouping level.
    pub children: Vec<GroupRow>,
    /// Summed values of the rows this group covers.
    pub values: Row,
    /// Indices of the input rows this group covers.
    pub members: Vec<usize>,
}

impl GroupRow {
    pub fn is_leaf_level(&self) -> bool {
        self.children.is_empty()
    }

    pub fn value(&self, field: &str) -> &Value {
        self.values.value(field)
    }
}

/// Groups `rows` by `grouping_fields`, outer to inner. Returns no groups
/// when there are no grouping fields.
pub fn build_grouped_rows(rows: &[Row], grouping_fields: &[String]) -> Vec<GroupRow> {
    if grouping_fields.is_empty() {
        return Vec::new();
    }
    let members: Vec<usize> = (0..rows.len()).collect();
    let mut path = GroupPath::new();
    build_level(rows, &members, grouping_fields, 0, &mut path)
}

fn build_level(
    rows: &[Row],
    members: &[usize],
    grouping_fields: &[String],
    depth: usize,
    path: &mut GroupPath,
) -> Vec<GroupRow> {
    let field = &grouping_fields[depth];

    let mut partitions: Vec<(String, Vec<usize>)> = Vec::new();
    let mut slots: FxHashMap<String, usize> = FxHashMap::default();
    for &index in members {
        let label = group_label(rows[index].value(field));
        match slots.get(&label) {
            Some(&slot) => partitions[slot].1.push(index),
            None => {
                slots.insert(label.clone(), partitions.len());
                partitions.push((label, vec![index]));
            }
        }
    }

    partitions
        .into_iter()
        .map(|(label, indices)| {
            path.push(label.clone());
            let group_key = join_group_key(path.as_slice());
            let values = aggregate_rows(indices.iter().map(|&i| &rows[i]), grouping_fields);
            let children = if depth + 1 < grouping_fields.len() {
                build_level(rows, &indices, grouping_fields, depth + 1, path)
            } else {
                Vec::new()
            };
            path.pop();

            GroupRow {
                group_key,
                group_field: field.clone(),
                group_value: label,
                depth,
                children,
                values,
                members: indices,
            }
        })
        .collect()
}

// ============================================================================
// EXPANSION
// ============================================================================

/// Keys of every expandable group above `depth`, i.e. the expanded set that
/// shows the tree down to grouping level `depth`.
pub fn expand_to_depth(groups: &[GroupRow], depth: usize) -> FxHashSet<String> {
    fn walk(groups: &[GroupRow], depth: usize, out: &mut FxHashSet<String>) {
        for group in groups {
            if group.depth < depth && !group.children.is_empty() {
                out.insert(group.group_key.clone());
                walk(&group.children, depth, out);
            }
        }
    }
    let mut out = FxHashSet::default();
    walk(groups, depth, &mut out);
    out
}

/// Flattens the tree in display order, descending only into expanded groups.
pub fn visible_group_rows<'a>(
    groups: &'a [GroupRow],
    expanded: &FxHashSet<String>,
) -> Vec<&'a GroupRow> {
    fn walk<'a>(groups: &'a [GroupRow], expanded: &FxHashSet<String>, out: &mut Vec<&'a GroupRow>) {
        for group in groups {
            out.push(group);
            if expanded.contains(&group.group_key) {
                walk(&group.children, expanded, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(groups, expanded, &mut out);
    out
}

/// All groups at the last grouping level, left to right.
pub fn leaf_level_groups(groups: &[GroupRow]) -> Vec<&GroupRow> {
    let mut out = Vec::new();
    let mut stack: Vec<&GroupRow> = groups.iter().rev().collect();
    while let Some(group) = stack.pop() {
        if group.is_leaf_level() {
            out.push(group);
        } else {
            stack.extend(group.children.iter().rev());
        }
    }
    out
}
