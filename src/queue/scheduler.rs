//! Command scheduler - admits commands and drains them one at a time
//!
//! Two entry points:
//! - [`CommandScheduler::execute_now`] runs a command immediately, bypassing the queue
//! - [`CommandScheduler::enqueue`] admits a command into the priority queue and
//!   makes sure a processing loop is running
//!
//! Both share the executor's driver lock, so only one command ever executes
//! against the browser context at a time.

use super::history::History;
use super::item::QueueItem;
use super::priority::PendingQueue;
use super::status::StatusReporter;
use crate::command::{
    Command, CommandExecutor, CommandParser, CommandValidator, ExecutionResult, ParseError,
};
use dispatch_shared::{now_ms, ItemStatus};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a command was refused at admission
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Queue is full ({max} pending commands); retry later")]
    Capacity { max: usize },

    #[error("Failed to parse command: {0}")]
    Parse(#[from] ParseError),
}

/// Queue sizing
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of pending (not yet dequeued) items
    pub max_queue_size: usize,
    /// Number of terminal items retained for history queries
    pub history_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: dispatch_shared::limits::DEFAULT_MAX_QUEUE_SIZE,
            history_capacity: dispatch_shared::limits::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Processing loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Everything guarded by the queue mutex
#[derive(Debug)]
pub(super) struct QueueState {
    pub(super) pending: PendingQueue,
    pub(super) executing: Option<QueueItem>,
    pub(super) history: History,
    pub(super) loop_state: LoopState,
    pub(super) completed_total: u64,
    pub(super) failed_total: u64,
}

pub(super) struct SchedulerInner {
    executor: Arc<CommandExecutor>,
    pub(super) state: Mutex<QueueState>,
    max_queue_size: usize,
    loop_watch: watch::Sender<LoopState>,
    completions: broadcast::Sender<QueueItem>,
}

impl SchedulerInner {
    /// Claim the processing loop. Returns true if the caller must spawn it.
    fn start_if_idle(&self, state: &mut QueueState) -> bool {
        match state.loop_state {
            LoopState::Running => false,
            LoopState::Idle => {
                self.set_loop_state(state, LoopState::Running);
                true
            }
        }
    }

    fn set_loop_state(&self, state: &mut QueueState, next: LoopState) {
        state.loop_state = next;
        self.loop_watch.send_replace(next);
    }
}

#[derive(Clone)]
pub struct CommandScheduler {
    inner: Arc<SchedulerInner>,
}

impl CommandScheduler {
    pub fn new(executor: Arc<CommandExecutor>, config: QueueConfig) -> Self {
        let (loop_watch, _) = watch::channel(LoopState::Idle);
        let (completions, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(SchedulerInner {
                executor,
                state: Mutex::new(QueueState {
                    pending: PendingQueue::new(),
                    executing: None,
                    history: History::new(config.history_capacity),
                    loop_state: LoopState::Idle,
                    completed_total: 0,
                    failed_total: 0,
                }),
                max_queue_size: config.max_queue_size,
                loop_watch,
                completions,
            }),
        }
    }

    /// Validate and parse an inbound message
    fn admit(message: &Value) -> Result<Command, DispatchError> {
        let validation = CommandValidator::validate(message);
        for warning in &validation.warnings {
            warn!(%warning, "command validation warning");
        }
        if !validation.is_valid {
            debug!(errors = ?validation.errors, "command rejected");
            return Err(DispatchError::Validation(validation.errors));
        }

        Ok(CommandParser::parse(message)?)
    }

    /// Validate, parse and execute a command right away
    ///
    /// Invalid commands never reach the driver.
    pub async fn execute_now(&self, message: &Value) -> Result<ExecutionResult, DispatchError> {
        let command = Self::admit(message)?;
        info!(kind = %command.kind(), "executing command immediately");
        Ok(run_guarded(&self.inner.executor, &command).await)
    }

    /// Admit a command into the priority queue and return its queue ID
    ///
    /// Starts the processing loop if none is running.
    pub async fn enqueue(&self, message: &Value, priority: i64) -> Result<String, DispatchError> {
        let command = Self::admit(message)?;

        let mut state = self.inner.state.lock().await;
        if state.pending.len() >= self.inner.max_queue_size {
            warn!(max = self.inner.max_queue_size, "queue full, rejecting command");
            return Err(DispatchError::Capacity {
                max: self.inner.max_queue_size,
            });
        }

        let id = Uuid::new_v4().to_string();
        let kind = command.kind();
        state
            .pending
            .push(QueueItem::new(id.clone(), command, priority, now_ms()));
        let pending = state.pending.len();
        let start = self.inner.start_if_idle(&mut state);
        drop(state);

        info!(queue_id = %id, %kind, priority, pending, "command enqueued");

        if start {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                process_queue(inner).await;
            });
        }

        Ok(id)
    }

    /// Copy of a tracked item (pending, executing or in history)
    pub async fn find(&self, id: &str) -> Option<QueueItem> {
        let state = self.inner.state.lock().await;
        state
            .pending
            .find(id)
            .or_else(|| state.executing.as_ref().filter(|item| item.id == id))
            .or_else(|| state.history.find(id))
            .cloned()
    }

    /// Subscribe to items as they reach a terminal status
    pub fn completions(&self) -> broadcast::Receiver<QueueItem> {
        self.inner.completions.subscribe()
    }

    /// Resolve once no processing loop is running
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.loop_watch.subscribe();
        let _ = rx.wait_for(|state| *state == LoopState::Idle).await;
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(self.inner.clone())
    }
}

/// Drain the pending queue one item at a time, then stop
async fn process_queue(inner: Arc<SchedulerInner>) {
    debug!("queue processing loop started");

    loop {
        let item = {
            let mut state = inner.state.lock().await;
            let Some(mut item) = state.pending.pop() else {
                inner.set_loop_state(&mut state, LoopState::Idle);
                break;
            };
            if let Err(e) = item.mark_executing() {
                error!(queue_id = %item.id, ?e, "refusing to execute item");
                continue;
            }
            state.executing = Some(item.clone());
            item
        };

        debug!(queue_id = %item.id, kind = %item.command.kind(), priority = item.priority, "dequeued");
        let result = run_guarded(&inner.executor, &item.command).await;

        let mut item = item;
        let mut state = inner.state.lock().await;
        state.executing = None;

        if let Err(e) = item.finish(result) {
            error!(queue_id = %item.id, ?e, "dropping item with invalid transition");
            continue;
        }
        match item.status {
            ItemStatus::Completed => state.completed_total += 1,
            _ => state.failed_total += 1,
        }
        if let Some(evicted) = state.history.record(item.clone()) {
            debug!(queue_id = %evicted.id, "evicted from history");
        }
        drop(state);

        info!(queue_id = %item.id, status = %item.status, "queue item finished");
        // No subscribers is fine
        let _ = inner.completions.send(item);
    }

    debug!("queue drained, processing loop stopped");
}

/// Execute, converting a fault inside the execution call into a failed result
async fn run_guarded(executor: &CommandExecutor, command: &Command) -> ExecutionResult {
    match AssertUnwindSafe(executor.execute(command)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(kind = %command.kind(), %message, "execution fault");
            ExecutionResult::failure(format!("execution fault: {}", message), 0)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
