//! FILENAME: core/drill-engine/src/controller.rs
//! Lazy Tree Controller - Owns the row tree and decides what to fetch next.
//!
//! The controller never talks to the backend itself. Every operation that
//! needs data returns a `FetchTicket`; the caller sends `ticket.request()`
//! to its backend and hands the outcome back through `apply`. Tickets carry
//! the configuration generation they were issued under, so results that
//! arrive after a reset are discarded instead of merged.
//!
//! Per node:
//!
//! ```text
//!            expand (not loaded)          page < window
//! COLLAPSED ─────────────────────> LOADING ─────────────> EXPANDED_EXHAUSTED
//!     ^  ^                          │  ^
//!     │  │ expand (loaded)          │  │ load more
//!     │  └─ collapse ── EXPANDED <──┘  │
//!     │                    └───────────┘
//!     └── fetch failure on first page
//! ```
//!
//! Without grouping fields there is no tree: a single flat list grows as the
//! rendering surface scrolls towards its end.

use pivot_engine::{
    category_field, classify, is_internal_field, pivot_rows, CellSource, ColumnAutoSizer,
    ColumnNode, PivotConfig, PivotError, PivotMode, PivotShapeResolver, QueryRequest,
    QueryResponse, Row, RowWindow, ShapeKind, TextMeasure, Value,
};
use rustc_hash::FxHashSet;

use crate::error::{BackendError, DrillError};
use crate::options::ControllerOptions;
use crate::tree::{merge_values, NodeId, NodeState, PageCursor, RowTree, TreeNode};
use crate::view::{flatten_rows, flatten_tree, VisibleRow};
use crate::{log_debug, log_error, log_info, log_warn};

// ============================================================================
// TICKETS AND OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    /// Children of a tree node; `NodeId::ROOT` for the first level.
    Node(NodeId),
    Flat,
    GrandTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    FirstPage,
    /// Replaces the placeholder created at `current_count` rows.
    LoadMore { current_count: usize },
}

/// An issued, not yet applied fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    generation: u64,
    target: FetchTarget,
    kind: FetchKind,
    request: QueryRequest,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self) -> FetchTarget {
        self.target
    }

    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }
}

/// Where a failure is shown. A root failure blocks the whole view; a node
/// failure only its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    Root,
    Node(String),
    Flat,
    GrandTotal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { added: usize, has_more: bool },
    /// Issued under an earlier configuration; nothing changed.
    Stale,
    /// The fetch failed; the target is back in its pre-fetch state.
    Failed { scope: ErrorScope, message: String },
    /// The merge target no longer matches; nothing changed.
    Ignored(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootStatus<'a> {
    Unconfigured,
    Loading,
    Ready,
    Failed(&'a str),
}

// ============================================================================
// FLAT LIST
// ============================================================================

#[derive(Debug, Clone)]
struct FlatList {
    rows: Vec<Row>,
    cursor: PageCursor,
    loading: bool,
    loaded: bool,
    last_error: Option<String>,
}

impl FlatList {
    fn new(cursor: PageCursor) -> Self {
        FlatList {
            rows: Vec::new(),
            cursor,
            loading: false,
            loaded: false,
            last_error: None,
        }
    }
}

// ============================================================================
// GRAND TOTAL
// ============================================================================

#[derive(Debug, Clone)]
struct GrandTotal {
    row: Option<Row>,
    /// Raw pages summed so far while a client-side total is in progress.
    partial: Option<Row>,
    cursor: PageCursor,
    loading: bool,
    last_error: Option<String>,
}

impl GrandTotal {
    fn new(cursor: PageCursor) -> Self {
        GrandTotal {
            row: None,
            partial: None,
            cursor,
            loading: false,
            last_error: None,
        }
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct LazyTreeController {
    options: ControllerOptions,
    resolver: PivotShapeResolver,
    config: PivotConfig,
    fingerprint: Option<u64>,
    /// Bumped on every reset; gates `apply`.
    generation: u64,
    /// Bumped on every data change; the auto-sizer's data identity.
    revision: u64,
    tree: RowTree,
    flat: FlatList,
    kind: ShapeKind,
    value_fields: Vec<String>,
    known_fields: FxHashSet<String>,
    columns: Vec<ColumnNode>,
    total: GrandTotal,
}

impl LazyTreeController {
    pub fn new(options: ControllerOptions) -> Result<Self, DrillError> {
        let resolver = PivotShapeResolver::new(options.shape_options())?;
        let limit = options.row_limit();
        Ok(LazyTreeController {
            tree: RowTree::new(options.page_size, limit),
            flat: FlatList::new(PageCursor::new(options.page_size, limit)),
            total: GrandTotal::new(PageCursor::new(options.page_size, limit)),
            options,
            resolver,
            config: PivotConfig::default(),
            fingerprint: None,
            generation: 0,
            revision: 0,
            kind: ShapeKind::Flat,
            value_fields: Vec::new(),
            known_fields: FxHashSet::default(),
            columns: Vec::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Applies a configuration. Any change resets the tree and returns the
    /// first-level fetch; an identical configuration returns `None`.
    pub fn configure(&mut self, config: PivotConfig) -> Result<Option<FetchTicket>, DrillError> {
        self.validate(&config)?;
        let fingerprint = config.fingerprint();
        if self.fingerprint == Some(fingerprint) {
            log_debug!("DRILL", "configuration unchanged ({:016x})", fingerprint);
            return Ok(None);
        }
        self.config = config;
        self.fingerprint = Some(fingerprint);
        Ok(Some(self.reset()))
    }

    /// Resets with the current configuration, e.g. after a root failure.
    pub fn reload(&mut self) -> Result<FetchTicket, DrillError> {
        if self.fingerprint.is_none() {
            return Err(DrillError::NotConfigured);
        }
        Ok(self.reset())
    }

    fn validate(&self, config: &PivotConfig) -> Result<(), PivotError> {
        if let Some(field) = config.rows.iter().find(|f| config.columns.contains(*f)) {
            return Err(PivotError::OverlappingField(field.clone()));
        }
        if self.options.pivot_mode == PivotMode::Client
            && config.is_split()
            && config.values.is_empty()
        {
            return Err(PivotError::SplitWithoutMetrics(config.columns.clone()));
        }
        Ok(())
    }

    fn reset(&mut self) -> FetchTicket {
        self.generation += 1;
        self.revision += 1;

        let limit = self.options.row_limit();
        self.tree = RowTree::new(self.options.page_size, limit);
        self.flat = FlatList::new(PageCursor::new(self.options.page_size, limit));
        self.kind = classify(&self.config.rows, &self.config.columns);
        self.value_fields.clear();
        self.known_fields.clear();
        self.columns = self.resolver.columns(self.kind, &self.config.rows, &[], None);
        self.total = GrandTotal::new(PageCursor::new(self.options.page_size, limit));

        log_info!(
            "DRILL",
            "reset generation={} fingerprint={:016x} shape={:?}",
            self.generation,
            self.fingerprint.unwrap_or_default(),
            self.kind
        );

        if self.config.is_grouped() {
            let root = self.tree.root_mut();
            root.loading = true;
            let window = root.cursor.next_window();
            self.issue(FetchTarget::Node(NodeId::ROOT), FetchKind::FirstPage, &[], window)
        } else {
            self.flat.loading = true;
            let window = self.flat.cursor.next_window();
            self.issue(FetchTarget::Flat, FetchKind::FirstPage, &[], window)
        }
    }

    fn issue(
        &self,
        target: FetchTarget,
        kind: FetchKind,
        group_keys: &[String],
        window: RowWindow,
    ) -> FetchTicket {
        let request = QueryRequest::for_level(&self.config, group_keys, window);
        self.ticket(target, kind, request)
    }

    fn ticket(&self, target: FetchTarget, kind: FetchKind, request: QueryRequest) -> FetchTicket {
        log_debug!(
            "FETCH",
            "issue gen={} target={:?} kind={:?} keys={:?} window={}..{}",
            self.generation,
            target,
            kind,
            request.group_keys,
            request.start_row,
            request.end_row
        );
        FetchTicket {
            generation: self.generation,
            target,
            kind,
            request,
        }
    }

    // ------------------------------------------------------------------------
    // Node operations
    // ------------------------------------------------------------------------

    fn node_id(&self, group_key: &str) -> Result<NodeId, DrillError> {
        self.tree
            .find(group_key)
            .ok_or_else(|| DrillError::UnknownNode(group_key.to_string()))
    }

    /// Shows a node's children, fetching the first page only if the node
    /// was never loaded. Re-expanding a loaded node is a pure state flip.
    pub fn expand(&mut self, group_key: &str) -> Result<Option<FetchTicket>, DrillError> {
        let id = self.node_id(group_key)?;
        let levels = self.config.rows.len();
        let node = self
            .tree
            .get_mut(id)
            .ok_or_else(|| DrillError::UnknownNode(group_key.to_string()))?;

        if node.is_root() {
            return Ok(None);
        }
        if node.path.len() >= levels {
            return Err(DrillError::NotExpandable(group_key.to_string()));
        }
        if node.loading {
            if node.expanded {
                return Err(DrillError::AlreadyLoading(group_key.to_string()));
            }
            // Collapsed while its first page is still in flight.
            node.expanded = true;
            return Ok(None);
        }

        node.expanded = true;
        if node.loaded {
            return Ok(None);
        }
        node.loading = true;
        let path = node.path.to_vec();
        let window = node.cursor.next_window();
        Ok(Some(self.issue(FetchTarget::Node(id), FetchKind::FirstPage, &path, window)))
    }

    /// Hides a node's children; they stay in memory.
    pub fn collapse(&mut self, group_key: &str) -> Result<(), DrillError> {
        let id = self.node_id(group_key)?;
        if let Some(node) = self.tree.get_mut(id) {
            if !node.is_root() {
                node.expanded = false;
            }
        }
        Ok(())
    }

    pub fn toggle(&mut self, group_key: &str) -> Result<Option<FetchTicket>, DrillError> {
        let id = self.node_id(group_key)?;
        let expanded = self
            .tree
            .get(id)
            .is_some_and(|node| node.expanded && !node.is_root());
        if expanded {
            self.collapse(group_key)?;
            Ok(None)
        } else {
            self.expand(group_key)
        }
    }

    /// Fetches the page behind a node's placeholder (`""` is the root, or
    /// the flat list when there is no grouping). A second request while one
    /// is in flight for the same target is refused.
    pub fn load_more(&mut self, group_key: &str) -> Result<FetchTicket, DrillError> {
        if !self.config.is_grouped() {
            return self.flat_next_page(group_key);
        }

        let id = self.node_id(group_key)?;
        let node = self
            .tree
            .get_mut(id)
            .ok_or_else(|| DrillError::UnknownNode(group_key.to_string()))?;
        if node.loading {
            return Err(DrillError::AlreadyLoading(group_key.to_string()));
        }
        let current_count = match node.placeholder() {
            Some(count) if node.cursor.can_fetch() => count,
            _ => return Err(DrillError::Exhausted(group_key.to_string())),
        };

        node.loading = true;
        let path = node.path.to_vec();
        let window = node.cursor.next_window();
        Ok(self.issue(
            FetchTarget::Node(id),
            FetchKind::LoadMore { current_count },
            &path,
            window,
        ))
    }

    /// Infinite scroll for the flat list: fetches the next page once the
    /// last visible row is within one page of the end of the loaded rows.
    pub fn on_scroll(&mut self, last_visible_index: usize) -> Option<FetchTicket> {
        if self.config.is_grouped() || self.fingerprint.is_none() {
            return None;
        }
        let loaded = self.flat.rows.len();
        if last_visible_index.saturating_add(self.flat.cursor.page_size) < loaded {
            return None;
        }
        self.flat_next_page("").ok()
    }

    fn flat_next_page(&mut self, label: &str) -> Result<FetchTicket, DrillError> {
        if self.fingerprint.is_none() {
            return Err(DrillError::NotConfigured);
        }
        if self.flat.loading || !self.flat.loaded {
            return Err(DrillError::AlreadyLoading(label.to_string()));
        }
        if !self.flat.cursor.can_fetch() {
            return Err(DrillError::Exhausted(label.to_string()));
        }
        self.flat.loading = true;
        let current_count = self.flat.cursor.fetched_count;
        let window = self.flat.cursor.next_window();
        Ok(self.issue(
            FetchTarget::Flat,
            FetchKind::LoadMore { current_count },
            &[],
            window,
        ))
    }

    /// Requests the ungrouped total row for the current configuration.
    ///
    /// A pivoting backend answers with the total row itself. When the client
    /// pivots, the raw rows are listed page by page and summed; each call
    /// fetches the next page until `apply` reports `has_more: false`.
    pub fn request_grand_total(&mut self) -> Result<FetchTicket, DrillError> {
        if self.fingerprint.is_none() {
            return Err(DrillError::NotConfigured);
        }
        if self.total.loading {
            return Err(DrillError::AlreadyLoading("grand total".to_string()));
        }
        self.total.loading = true;

        if self.options.pivot_mode == PivotMode::Backend {
            let request = QueryRequest::grand_total(&self.config);
            return Ok(self.ticket(FetchTarget::GrandTotal, FetchKind::FirstPage, request));
        }

        let kind = if self.total.partial.is_some() {
            FetchKind::LoadMore {
                current_count: self.total.cursor.fetched_count,
            }
        } else {
            self.total.cursor = PageCursor::new(self.options.page_size, self.options.row_limit());
            FetchKind::FirstPage
        };
        let request = QueryRequest::ungrouped(&self.config, self.total.cursor.next_window());
        Ok(self.ticket(FetchTarget::GrandTotal, kind, request))
    }

    /// Switches preview mode. A change resets a configured view under the
    /// new row ceiling and returns its first fetch.
    pub fn set_preview(&mut self, preview: bool) -> Option<FetchTicket> {
        if self.options.preview == preview {
            return None;
        }
        self.options.preview = preview;
        log_info!("DRILL", "preview {}", if preview { "on" } else { "off" });
        self.fingerprint?;
        Some(self.reset())
    }

    // ------------------------------------------------------------------------
    // Applying results
    // ------------------------------------------------------------------------

    /// Merges a completed fetch. Never fails: errors become scoped state.
    pub fn apply(
        &mut self,
        ticket: FetchTicket,
        result: Result<QueryResponse, BackendError>,
    ) -> ApplyOutcome {
        if ticket.generation != self.generation {
            log_debug!(
                "FETCH",
                "discarding stale result gen={} (current {}) target={:?}",
                ticket.generation,
                self.generation,
                ticket.target
            );
            return ApplyOutcome::Stale;
        }
        match ticket.target {
            FetchTarget::Node(id) => self.apply_node(id, &ticket, result),
            FetchTarget::Flat => self.apply_flat(&ticket, result),
            FetchTarget::GrandTotal => self.apply_grand_total(&ticket, result),
        }
    }

    fn apply_node(
        &mut self,
        id: NodeId,
        ticket: &FetchTicket,
        result: Result<QueryResponse, BackendError>,
    ) -> ApplyOutcome {
        let Some(level) = self.tree.get(id).map(|node| node.path.len()) else {
            let message = format!("node {} vanished before its page arrived", id.index());
            log_warn!("TREE", "{}", message);
            return ApplyOutcome::Ignored(message);
        };
        let Some(field) = self.config.rows.get(level).cloned() else {
            return self.ignore_node(id, format!("no grouping field below level {}", level));
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => return self.fail_node(id, ticket.kind, err.into()),
        };
        let window = ticket.request.window();
        let (rows, returned) = match self.shape_page(response.rows, Some(&field), window) {
            Ok(shaped) => shaped,
            Err(err) => return self.fail_node(id, ticket.kind, err.into()),
        };

        let fresh = self.unseen_fields(&rows);
        let at = match ticket.kind {
            FetchKind::FirstPage => None,
            FetchKind::LoadMore { current_count } => Some(current_count),
        };
        let merge = match self.tree.merge_page(id, at, &field, rows, window, returned) {
            Ok(merge) => merge,
            Err(err) => return self.ignore_node(id, err.to_string()),
        };

        if let Some(node) = self.tree.get_mut(id) {
            node.loading = false;
            node.last_error = None;
            log_info!(
                "FETCH",
                "applied {:?} rows={} has_more={}",
                node.group_key,
                merge.added,
                merge.has_more
            );
        }
        self.commit_fields(fresh);
        self.revision += 1;
        ApplyOutcome::Applied {
            added: merge.added,
            has_more: merge.has_more,
        }
    }

    /// Tree-consistency failure: clear the loading flag, change nothing else.
    fn ignore_node(&mut self, id: NodeId, message: String) -> ApplyOutcome {
        if let Some(node) = self.tree.get_mut(id) {
            node.loading = false;
        }
        log_warn!("TREE", "{}", message);
        ApplyOutcome::Ignored(message)
    }

    fn fail_node(&mut self, id: NodeId, kind: FetchKind, err: DrillError) -> ApplyOutcome {
        let message = err.to_string();
        let Some(node) = self.tree.get_mut(id) else {
            return ApplyOutcome::Ignored(message);
        };
        node.loading = false;
        if kind == FetchKind::FirstPage && !node.is_root() {
            node.expanded = false;
        }
        node.last_error = Some(message.clone());
        let scope = scope_of(node);
        log_error!("FETCH", "{:?} failed: {}", scope, message);
        ApplyOutcome::Failed { scope, message }
    }

    fn apply_flat(
        &mut self,
        ticket: &FetchTicket,
        result: Result<QueryResponse, BackendError>,
    ) -> ApplyOutcome {
        let slot_matches = match ticket.kind {
            FetchKind::FirstPage => !self.flat.loaded,
            FetchKind::LoadMore { current_count } => {
                self.flat.loaded && current_count == self.flat.cursor.fetched_count
            }
        };
        if !slot_matches {
            self.flat.loading = false;
            let message = format!("flat page {:?} does not follow the loaded rows", ticket.kind);
            log_warn!("TREE", "{}", message);
            return ApplyOutcome::Ignored(message);
        }

        let window = ticket.request.window();
        let shaped = result
            .map_err(DrillError::from)
            .and_then(|response| {
                self.shape_page(response.rows, None, window)
                    .map_err(DrillError::from)
            });
        let (rows, returned) = match shaped {
            Ok(shaped) => shaped,
            Err(err) => {
                let message = err.to_string();
                self.flat.loading = false;
                self.flat.last_error = Some(message.clone());
                log_error!("FETCH", "flat page failed: {}", message);
                return ApplyOutcome::Failed {
                    scope: ErrorScope::Flat,
                    message,
                };
            }
        };

        let fresh = self.unseen_fields(&rows);
        let fold_into_first = self.options.pivot_mode == PivotMode::Client && self.config.is_split();
        // A locally pivoted flat list is a single total row; later pages
        // fold into it.
        let added = if fold_into_first && !self.flat.rows.is_empty() {
            let first = &mut self.flat.rows[0];
            for row in &rows {
                merge_values(first, row);
            }
            0
        } else {
            let added = rows.len();
            self.flat.rows.extend(rows);
            added
        };

        self.flat.loading = false;
        self.flat.loaded = true;
        self.flat.last_error = None;
        let has_more = self.flat.cursor.advance(window, returned);
        log_info!("FETCH", "applied flat rows={} has_more={}", added, has_more);

        self.commit_fields(fresh);
        self.revision += 1;
        ApplyOutcome::Applied { added, has_more }
    }

    fn apply_grand_total(
        &mut self,
        ticket: &FetchTicket,
        result: Result<QueryResponse, BackendError>,
    ) -> ApplyOutcome {
        self.total.loading = false;
        if self.options.pivot_mode == PivotMode::Client {
            return self.apply_total_page(ticket, result);
        }

        match result {
            Ok(response) => {
                let row = response.rows.into_iter().next();
                let added = usize::from(row.is_some());
                self.total.row = row;
                self.total.last_error = None;
                self.revision += 1;
                ApplyOutcome::Applied {
                    added,
                    has_more: false,
                }
            }
            Err(err) => self.fail_total(err.into()),
        }
    }

    /// Sums one page of raw rows into the running client-side total.
    fn apply_total_page(
        &mut self,
        ticket: &FetchTicket,
        result: Result<QueryResponse, BackendError>,
    ) -> ApplyOutcome {
        let expected = match ticket.kind {
            FetchKind::FirstPage => 0,
            FetchKind::LoadMore { current_count } => current_count,
        };
        let in_progress = self.total.partial.is_some();
        if expected != self.total.cursor.fetched_count
            || in_progress != (ticket.kind != FetchKind::FirstPage)
        {
            let message = format!("total page {:?} does not follow the summed rows", ticket.kind);
            log_warn!("TREE", "{}", message);
            return ApplyOutcome::Ignored(message);
        }

        let window = ticket.request.window();
        let metrics = self.config.pivot_metrics();
        let page = result.map_err(DrillError::from).and_then(|response| {
            let mut rows = response.rows;
            rows.truncate(window.len());
            let returned = rows.len();
            let summed = pivot_rows(&rows, &[], &[], &metrics, &self.options.column_delimiter)?;
            Ok((summed.into_iter().next(), returned))
        });
        let (page_total, returned) = match page {
            Ok(page) => page,
            Err(err) => {
                self.total.partial = None;
                return self.fail_total(err);
            }
        };

        let mut total = self.total.partial.take().unwrap_or_default();
        if let Some(page_total) = page_total {
            merge_values(&mut total, &page_total);
        }
        let has_more = self.total.cursor.advance(window, returned);
        log_debug!("FETCH", "total page rows={} has_more={}", returned, has_more);
        if has_more {
            self.total.partial = Some(total);
        } else {
            self.total.row = (!total.is_empty()).then_some(total);
            self.total.last_error = None;
            self.revision += 1;
        }
        ApplyOutcome::Applied {
            added: returned,
            has_more,
        }
    }

    fn fail_total(&mut self, err: DrillError) -> ApplyOutcome {
        let message = err.to_string();
        self.total.last_error = Some(message.clone());
        log_error!("FETCH", "grand total failed: {}", message);
        ApplyOutcome::Failed {
            scope: ErrorScope::GrandTotal,
            message,
        }
    }

    /// Clips a page to its window and, for backends that return raw rows,
    /// pivots it. Returns the shaped rows and the raw row count.
    fn shape_page(
        &self,
        mut rows: Vec<Row>,
        level_field: Option<&str>,
        window: RowWindow,
    ) -> Result<(Vec<Row>, usize), PivotError> {
        rows.truncate(window.len());
        let returned = rows.len();
        if self.options.pivot_mode == PivotMode::Client
            && (self.config.is_split() || level_field.is_some())
        {
            let grouping: Vec<String> = level_field.map(str::to_string).into_iter().collect();
            rows = pivot_rows(
                &rows,
                &grouping,
                &self.config.columns,
                &self.config.pivot_metrics(),
                &self.options.column_delimiter,
            )?;
        }
        Ok((rows, returned))
    }

    // ------------------------------------------------------------------------
    // Columns
    // ------------------------------------------------------------------------

    fn unseen_fields(&self, rows: &[Row]) -> Vec<String> {
        let mut fresh: Vec<String> = Vec::new();
        for row in rows {
            for name in row.keys() {
                if is_internal_field(name)
                    || self.config.rows.iter().any(|f| f == name)
                    || self.known_fields.contains(name)
                    || fresh.iter().any(|f| f == name)
                {
                    continue;
                }
                fresh.push(name.to_string());
            }
        }
        fresh
    }

    /// Registers newly seen value fields and rebuilds the column hierarchy.
    /// Pivoted shapes also get a null for every missing accessor on every
    /// loaded row, so each leaf column resolves everywhere.
    fn commit_fields(&mut self, fresh: Vec<String>) {
        if fresh.is_empty() {
            return;
        }
        log_debug!("DRILL", "new value fields {:?}", fresh);
        self.known_fields.extend(fresh.iter().cloned());
        self.value_fields.extend(fresh);

        let sample = self.sample_row().cloned();
        self.columns =
            self.resolver
                .columns(self.kind, &self.config.rows, &self.value_fields, sample.as_ref());

        if self.kind != ShapeKind::Flat {
            let fields = &self.value_fields;
            for node in self.tree.nodes_mut().filter(|node| !node.is_root()) {
                fill_missing(&mut node.values, fields);
            }
            for row in &mut self.flat.rows {
                fill_missing(row, fields);
            }
        }
    }

    fn sample_row(&self) -> Option<&Row> {
        if self.config.is_grouped() {
            let first = self.tree.root().child_nodes().next()?;
            self.tree.get(first).map(|node| &node.values)
        } else {
            self.flat.rows.first()
        }
    }

    /// Re-measures column widths from the visible rows. Returns whether the
    /// columns changed.
    pub fn autosize<M: TextMeasure>(&mut self, sizer: &mut ColumnAutoSizer<M>) -> bool {
        let resized = {
            let rows = self.visible_rows();
            sizer.resize(&self.columns, &rows, self.revision)
        };
        match resized {
            Some(columns) => {
                self.columns = columns;
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------------

    /// The currently visible rows, in display order.
    pub fn visible_rows(&self) -> Vec<VisibleRow<'_>> {
        if self.config.is_grouped() {
            flatten_tree(&self.tree, self.config.rows.len())
        } else {
            flatten_rows(&self.flat.rows)
        }
    }

    pub fn root_status(&self) -> RootStatus<'_> {
        if self.fingerprint.is_none() {
            return RootStatus::Unconfigured;
        }
        let (loading, loaded, error) = if self.config.is_grouped() {
            let root = self.tree.root();
            (root.loading, root.loaded, root.last_error.as_deref())
        } else {
            (self.flat.loading, self.flat.loaded, self.flat.last_error.as_deref())
        };
        match (loading, loaded, error) {
            (true, _, _) => RootStatus::Loading,
            (false, false, Some(message)) => RootStatus::Failed(message),
            (false, false, None) => RootStatus::Loading,
            (false, true, _) => RootStatus::Ready,
        }
    }

    pub fn last_error(&self, scope: &ErrorScope) -> Option<&str> {
        match scope {
            ErrorScope::Root => self.tree.root().last_error.as_deref(),
            ErrorScope::Node(key) => self
                .tree
                .find(key)
                .and_then(|id| self.tree.get(id))
                .and_then(|node| node.last_error.as_deref()),
            ErrorScope::Flat => self.flat.last_error.as_deref(),
            ErrorScope::GrandTotal => self.total.last_error.as_deref(),
        }
    }

    pub fn node(&self, group_key: &str) -> Option<&TreeNode> {
        self.tree.find(group_key).and_then(|id| self.tree.get(id))
    }

    pub fn node_state(&self, group_key: &str) -> Option<NodeState> {
        self.node(group_key).map(TreeNode::state)
    }

    /// Cell text of `group_key`'s row, mainly for tests and tooltips.
    pub fn node_cell(&self, group_key: &str, accessor: &str) -> Option<String> {
        self.node(group_key)
            .and_then(|node| node.values.cell_text(accessor))
    }

    /// Field used as the category axis for charts and flat keys.
    pub fn category_field(&self) -> Option<String> {
        category_field(self.sample_row(), &self.config.rows)
    }

    pub fn tree(&self) -> &RowTree {
        &self.tree
    }

    pub fn flat_rows(&self) -> &[Row] {
        &self.flat.rows
    }

    pub fn columns(&self) -> &[ColumnNode] {
        &self.columns
    }

    pub fn value_fields(&self) -> &[String] {
        &self.value_fields
    }

    pub fn shape_kind(&self) -> ShapeKind {
        self.kind
    }

    /// The total row, once complete.
    pub fn grand_total(&self) -> Option<&Row> {
        self.total.row.as_ref()
    }

    pub fn config(&self) -> &PivotConfig {
        &self.config
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

fn scope_of(node: &TreeNode) -> ErrorScope {
    if node.is_root() {
        ErrorScope::Root
    } else {
        ErrorScope::Node(node.group_key.clone())
    }
}

fn fill_missing(row: &mut Row, fields: &[String]) {
    for field in fields {
        if !row.contains_key(field) {
            row.insert(field.as_str(), Value::Null);
        }
    }
}
