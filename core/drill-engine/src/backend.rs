//! FILENAME: core/drill-engine/src/backend.rs
//! Query backend seam and the async session that drives the controller.
//!
//! `DrillSession` holds the controller behind a `tokio::sync::Mutex`. The
//! lock is taken to issue a ticket, released while the backend works, and
//! taken again to apply the result, so fetches for different nodes overlap
//! and the controller's generation check decides what survives a reset.

use std::future::Future;

use pivot_engine::{PivotConfig, QueryRequest, QueryResponse};
use tokio::sync::Mutex;

use crate::controller::{ApplyOutcome, FetchTicket, LazyTreeController};
use crate::error::{BackendError, DrillError};
use crate::options::ControllerOptions;
use crate::{log_debug, log_warn};

/// Answers one level of the row tree per request.
pub trait QueryBackend: Send + Sync {
    fn fetch(
        &self,
        request: QueryRequest,
    ) -> impl Future<Output = Result<QueryResponse, BackendError>> + Send;
}

pub struct DrillSession<B> {
    backend: B,
    controller: Mutex<LazyTreeController>,
}

impl<B: QueryBackend> DrillSession<B> {
    pub fn new(backend: B, options: ControllerOptions) -> Result<Self, DrillError> {
        Ok(DrillSession {
            backend,
            controller: Mutex::new(LazyTreeController::new(options)?),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Applies a configuration and loads the first level. Returns `None`
    /// when the configuration did not change.
    pub async fn configure(&self, config: PivotConfig) -> Result<Option<ApplyOutcome>, DrillError> {
        let ticket = self.controller.lock().await.configure(config)?;
        match ticket {
            Some(ticket) => Ok(Some(self.run(ticket).await)),
            None => Ok(None),
        }
    }

    pub async fn reload(&self) -> Result<ApplyOutcome, DrillError> {
        let ticket = self.controller.lock().await.reload()?;
        Ok(self.run(ticket).await)
    }

    /// Expands a node, fetching its children on first use. A node that is
    /// already loading is left alone.
    pub async fn expand(&self, group_key: &str) -> Result<Option<ApplyOutcome>, DrillError> {
        let ticket = self.controller.lock().await.expand(group_key);
        match ignore_busy(ticket)? {
            Some(ticket) => Ok(Some(self.run(ticket).await)),
            None => Ok(None),
        }
    }

    pub async fn collapse(&self, group_key: &str) -> Result<(), DrillError> {
        self.controller.lock().await.collapse(group_key)
    }

    pub async fn toggle(&self, group_key: &str) -> Result<Option<ApplyOutcome>, DrillError> {
        let ticket = self.controller.lock().await.toggle(group_key);
        match ignore_busy(ticket)? {
            Some(ticket) => Ok(Some(self.run(ticket).await)),
            None => Ok(None),
        }
    }

    /// Loads the page behind a placeholder. A second click while the first
    /// is in flight is ignored.
    pub async fn load_more(&self, group_key: &str) -> Result<Option<ApplyOutcome>, DrillError> {
        let ticket = self.controller.lock().await.load_more(group_key);
        match ignore_busy(ticket.map(Some))? {
            Some(ticket) => Ok(Some(self.run(ticket).await)),
            None => Ok(None),
        }
    }

    /// Flat-mode scroll notification.
    pub async fn scroll(&self, last_visible_index: usize) -> Option<ApplyOutcome> {
        let ticket = self.controller.lock().await.on_scroll(last_visible_index)?;
        Some(self.run(ticket).await)
    }

    /// Loads the grand total row, fetching as many pages as the total needs.
    pub async fn grand_total(&self) -> Result<Option<ApplyOutcome>, DrillError> {
        loop {
            let ticket = self.controller.lock().await.request_grand_total();
            let Some(ticket) = ignore_busy(ticket.map(Some))? else {
                return Ok(None);
            };
            let outcome = self.run(ticket).await;
            if !matches!(outcome, ApplyOutcome::Applied { has_more: true, .. }) {
                return Ok(Some(outcome));
            }
        }
    }

    /// Switches preview mode, reloading the first level when it changes.
    pub async fn set_preview(&self, preview: bool) -> Option<ApplyOutcome> {
        let ticket = self.controller.lock().await.set_preview(preview)?;
        Some(self.run(ticket).await)
    }

    /// Read-only access for rendering.
    pub async fn read<R>(&self, f: impl FnOnce(&LazyTreeController) -> R) -> R {
        let controller = self.controller.lock().await;
        f(&controller)
    }

    /// Mutable access for local-only operations such as auto-sizing.
    pub async fn update<R>(&self, f: impl FnOnce(&mut LazyTreeController) -> R) -> R {
        let mut controller = self.controller.lock().await;
        f(&mut controller)
    }

    async fn run(&self, ticket: FetchTicket) -> ApplyOutcome {
        let result = self.backend.fetch(ticket.request().clone()).await;
        let outcome = self.controller.lock().await.apply(ticket, result);
        if let ApplyOutcome::Ignored(reason) = &outcome {
            log_warn!("DRILL", "result ignored: {}", reason);
        }
        outcome
    }
}

fn ignore_busy(
    ticket: Result<Option<FetchTicket>, DrillError>,
) -> Result<Option<FetchTicket>, DrillError> {
    match ticket {
        Err(DrillError::AlreadyLoading(key)) => {
            log_debug!("DRILL", "ignoring request for {:?} while it loads", key);
            Ok(None)
        }
        other => other,
    }
}
