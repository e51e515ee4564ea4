//! FILENAME: core/drill-engine/src/lib.rs
//! On-demand hierarchical loading of pivot rows.
//!
//! Builds on `pivot-engine` shaping and adds the stateful side: a row tree
//! whose levels are fetched from a query backend as the user expands nodes,
//! paginated per node, reset whenever the configuration changes.
//!
//! Layers:
//! - `tree`: Arena storage, pagination cursors, page merge
//! - `controller`: State machine issuing and applying fetch tickets
//! - `view`: Flattened read-only rows for the rendering surface
//! - `backend`: Backend trait and async session driver

pub mod backend;
pub mod controller;
pub mod error;
pub mod logging;
pub mod options;
pub mod tree;
pub mod view;

pub use backend::{DrillSession, QueryBackend};
pub use controller::{
    ApplyOutcome, ErrorScope, FetchKind, FetchTarget, FetchTicket, LazyTreeController,
    RootStatus,
};
pub use error::{BackendError, DrillError};
pub use options::ControllerOptions;
pub use tree::{NodeId, NodeState, PageCursor, RowTree, TreeEntry, TreeNode};
pub use view::VisibleRow;
