//! Settle-once status propagation.
//!
//! Connections report how each direction finished through a one-shot
//! broadcast cell: the first settlement wins, later attempts are no-ops,
//! and any number of observers can await or poll the outcome.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Terminal status of a connection or one of its directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseStatus {
    /// The direction (or connection) completed cleanly.
    Success,
    /// The direction (or connection) failed, with a reason string.
    Error(String),
}

impl CloseStatus {
    /// Build an error status from any displayable reason.
    pub fn error(reason: impl Into<String>) -> Self {
        CloseStatus::Error(reason.into())
    }

    /// Check whether this status is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, CloseStatus::Error(_))
    }
}

impl std::fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseStatus::Success => write!(f, "success"),
            CloseStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// One-shot broadcast cell with idempotent resolution.
///
/// Built on `tokio::sync::watch`: `settle` publishes a value exactly once,
/// `wait` suspends until a value is published, and `get` observes without
/// suspending. A second `settle` attempt is a no-op and returns false.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<Option<CloseStatus>>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Settle the cell. Returns true if this call won the settlement.
    pub fn settle(&self, status: CloseStatus) -> bool {
        let mut slot = Some(status);
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = slot.take();
                true
            } else {
                false
            }
        })
    }

    /// Observe the settled value without suspending.
    pub fn get(&self) -> Option<CloseStatus> {
        self.tx.borrow().clone()
    }

    /// Check whether the cell has settled.
    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Suspend until the cell settles, then return the value.
    pub async fn wait(&self) -> CloseStatus {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(status) = rx.borrow_and_update().clone() {
                return status;
            }
            if rx.changed().await.is_err() {
                // Sender dropped unsettled; only reachable if the owning
                // connection was torn down without resolving.
                return CloseStatus::error("status cell dropped");
            }
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
