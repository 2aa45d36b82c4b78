//! Queue items and their lifecycle

use crate::command::{Command, ExecutionResult};
use dispatch_shared::state_machine::{next_status, StatusEvent};
use dispatch_shared::{CompletionReport, ItemStatus};
use serde::Serialize;

/// One admitted command plus its lifecycle status and eventual result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub command: Command,
    pub priority: i64,
    pub enqueued_at_ms: u64,
    pub status: ItemStatus,
    /// Set exactly once, when the item reaches a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

/// Attempted a lifecycle transition the state machine forbids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ItemStatus,
    pub event: StatusEvent,
}

impl QueueItem {
    pub(crate) fn new(id: String, command: Command, priority: i64, enqueued_at_ms: u64) -> Self {
        Self {
            id,
            command,
            priority,
            enqueued_at_ms,
            status: ItemStatus::Pending,
            result: None,
        }
    }

    /// Pending -> Executing
    pub(crate) fn mark_executing(&mut self) -> Result<(), InvalidTransition> {
        self.status = self.next(StatusEvent::Dequeued)?;
        Ok(())
    }

    /// Executing -> Completed/Failed, recording the result
    pub(crate) fn finish(&mut self, result: ExecutionResult) -> Result<(), InvalidTransition> {
        let event = if result.success {
            StatusEvent::Succeeded
        } else {
            StatusEvent::Failed
        };
        self.status = self.next(event)?;
        self.result = Some(result);
        Ok(())
    }

    fn next(&self, event: StatusEvent) -> Result<ItemStatus, InvalidTransition> {
        next_status(self.status, event).ok_or(InvalidTransition {
            from: self.status,
            event,
        })
    }

    /// Summary pushed to the control server once the item is terminal
    pub fn completion_report(&self) -> Option<CompletionReport> {
        let result = self.result.as_ref()?;
        Some(CompletionReport {
            queue_id: self.id.clone(),
            status: self.status,
            success: result.success,
            error: result.error_message.clone(),
            elapsed_ms: result.elapsed_ms,
            completed_at_ms: result.completed_at_ms,
        })
    }
}
