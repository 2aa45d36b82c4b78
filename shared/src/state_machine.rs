//! Queue Item Lifecycle
//!
//! Defines the legal status transitions of a queued command. Terminal
//! statuses are final.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Admitted, waiting for the processing loop
    Pending,
    /// Handed to the driver
    Executing,
    /// Driver reported success
    Completed,
    /// Driver reported failure, timed out, or the execution faulted
    Failed,
}

/// Events that move an item through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Removed from the pending queue by the processing loop
    Dequeued,
    /// Execution finished with `success = true`
    Succeeded,
    /// Execution finished with `success = false` or faulted
    Failed,
}

impl ItemStatus {
    /// Completed and Failed accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    /// Check if moving from `self` to `next` is legal
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;

        matches!(
            (self, next),
            (Pending, Executing) | (Executing, Completed) | (Executing, Failed)
        )
    }
}

/// Get the next status for a given event, if the transition is valid
pub fn next_status(current: ItemStatus, event: StatusEvent) -> Option<ItemStatus> {
    use ItemStatus::*;

    match (current, event) {
        (Pending, StatusEvent::Dequeued) => Some(Executing),
        (Executing, StatusEvent::Succeeded) => Some(Completed),
        (Executing, StatusEvent::Failed) => Some(Failed),
        _ => None,
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Executing => write!(f, "executing"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}
