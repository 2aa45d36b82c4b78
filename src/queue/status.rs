//! Read-only queue snapshots plus history maintenance

use super::item::QueueItem;
use super::scheduler::{LoopState, SchedulerInner};
use dispatch_shared::ItemStatus;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Point-in-time counts across pending, executing and history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub is_processing: bool,
    /// Lifetime totals; unaffected by history eviction or clearing
    pub completed_total: u64,
    pub failed_total: u64,
}

#[derive(Clone)]
pub struct StatusReporter {
    inner: Arc<SchedulerInner>,
}

impl StatusReporter {
    pub(super) fn new(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let state = self.inner.state.lock().await;

        let pending = state.pending.len();
        let executing = usize::from(state.executing.is_some());
        let completed = state
            .history
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
            .count();
        let failed = state.history.len() - completed;

        QueueStatus {
            pending,
            executing,
            completed,
            failed,
            total: pending + executing + state.history.len(),
            is_processing: state.loop_state == LoopState::Running,
            completed_total: state.completed_total,
            failed_total: state.failed_total,
        }
    }

    /// Up to `limit` terminal items, most recently finished first
    pub async fn get_history(&self, limit: usize) -> Vec<QueueItem> {
        self.inner.state.lock().await.history.recent(limit)
    }

    /// Drop every Completed and Failed item; returns how many were purged
    pub async fn clear_completed(&self) -> usize {
        let purged = self.inner.state.lock().await.history.clear();
        info!(purged, "cleared finished queue items");
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::{scheduler_with, tagged, RecordingDriver};
    use crate::queue::QueueConfig;
    use serde_json::json;

    fn failing(tag: &str) -> serde_json::Value {
        json!({"kind": "SCREENSHOT", "payload": {"tag": tag, "fail": true}})
    }

    #[tokio::test]
    async fn test_counts_and_clear() {
        let scheduler = scheduler_with(Arc::new(RecordingDriver::default()), QueueConfig::default());
        let reporter = scheduler.reporter();

        for tag in ["a", "b", "c"] {
            scheduler.enqueue(&tagged(tag), 0).await.unwrap();
        }
        for tag in ["d", "e"] {
            scheduler.enqueue(&failing(tag), 0).await.unwrap();
        }
        scheduler.wait_idle().await;

        let status = reporter.get_queue_status().await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.executing, 0);
        assert_eq!(status.completed, 3);
        assert_eq!(status.failed, 2);
        assert_eq!(status.total, 5);
        assert!(!status.is_processing);

        assert_eq!(reporter.clear_completed().await, 5);
        assert!(reporter.get_history(10).await.is_empty());

        let status = reporter.get_queue_status().await;
        assert_eq!(status.completed + status.failed, 0);
        assert_eq!(status.completed_total, 3);
        assert_eq!(status.failed_total, 2);

        assert_eq!(reporter.clear_completed().await, 0);
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let scheduler = scheduler_with(Arc::new(RecordingDriver::default()), QueueConfig::default());
        let mut ids = Vec::new();
        for tag in ["a", "b", "c"] {
            ids.push(scheduler.enqueue(&tagged(tag), 0).await.unwrap());
        }
        scheduler.wait_idle().await;

        let history = scheduler.reporter().get_history(2).await;
        let got: Vec<_> = history.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(got, vec![ids[2].as_str(), ids[1].as_str()]);
        assert!(history.iter().all(|item| item.result.is_some()));
    }

    #[tokio::test]
    async fn test_history_capacity_keeps_lifetime_totals() {
        let config = QueueConfig {
            history_capacity: 2,
            ..QueueConfig::default()
        };
        let scheduler = scheduler_with(Arc::new(RecordingDriver::default()), config);
        for tag in ["a", "b", "c", "d"] {
            scheduler.enqueue(&tagged(tag), 0).await.unwrap();
        }
        scheduler.wait_idle().await;

        let status = scheduler.reporter().get_queue_status().await;
        assert_eq!(status.completed, 2);
        assert_eq!(status.completed_total, 4);
    }

    #[tokio::test]
    async fn test_status_while_executing() {
        let driver = Arc::new(RecordingDriver::gated());
        let scheduler = scheduler_with(driver.clone(), QueueConfig::default());
        let reporter = scheduler.reporter();

        scheduler.enqueue(&tagged("blocker"), 0).await.unwrap();
        driver.started.notified().await;
        scheduler.enqueue(&tagged("next"), 0).await.unwrap();

        let status = reporter.get_queue_status().await;
        assert_eq!(status.executing, 1);
        assert_eq!(status.pending, 1);
        assert!(status.is_processing);

        // Clearing never touches pending or executing items
        assert_eq!(reporter.clear_completed().await, 0);
        assert_eq!(reporter.get_queue_status().await.pending, 1);

        driver.release();
        scheduler.wait_idle().await;
        assert_eq!(reporter.get_queue_status().await.completed, 2);
    }
}
