//! Control loop
//!
//! Each iteration fetches a fresh snapshot, decides only when the cluster is
//! idle, resizes only when the decision changes the size, then sleeps. A
//! failed iteration is reported and the loop carries on.

mod history;
mod r#loop;
mod snapshot;

pub use history::{DecisionLog, TickRecord, DEFAULT_HISTORY_CAPACITY};
pub use r#loop::{ControlLoop, ControlLoopBuilder, LoopConfig};
pub use snapshot::fetch_snapshot;

use crate::engine::Decision;
use serde::Serialize;

/// What one iteration of the loop did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The snapshot could not be fetched
    FetchFailed { error: String },
    /// A change is already in flight
    NotQuiescent { size: String, state: String },
    /// The observed size is missing from the catalog
    UnknownSize { size: String },
    /// The engine kept the current size
    Unchanged { decision: Decision },
    /// A resize was accepted by the control plane
    Resized { decision: Decision },
    /// The control plane rejected or failed the resize
    ResizeFailed { decision: Decision, error: String },
    /// A resize was warranted but dry-run mode is on
    DryRun { decision: Decision },
}

impl TickOutcome {
    /// The decision taken this tick, if the loop got that far
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            TickOutcome::Unchanged { decision }
            | TickOutcome::Resized { decision }
            | TickOutcome::ResizeFailed { decision, .. }
            | TickOutcome::DryRun { decision } => Some(decision),
            _ => None,
        }
    }

    /// Size the cluster reported this tick, if the fetch succeeded
    pub fn observed_size(&self) -> Option<&str> {
        match self {
            TickOutcome::FetchFailed { .. } => None,
            TickOutcome::NotQuiescent { size, .. } | TickOutcome::UnknownSize { size } => {
                Some(size)
            }
            TickOutcome::Unchanged { decision }
            | TickOutcome::Resized { decision }
            | TickOutcome::ResizeFailed { decision, .. }
            | TickOutcome::DryRun { decision } => Some(&decision.current),
        }
    }
}
