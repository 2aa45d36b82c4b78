//! Timeout tracking for outstanding requests and agent liveness

use super::dispatcher::{PendingRequest, RequestDispatcher};
use crate::session::SessionManager;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::warn;

/// Expires unanswered requests and drops dead agent sessions
///
/// Expired commands are reported, never retried: the agent may already have
/// run them, and a re-send could execute them twice.
pub struct TimeoutTracker {
    dispatcher: Arc<RequestDispatcher>,
    sessions: Arc<SessionManager>,
    check_interval: Duration,
}

/// Outcome of one sweep
#[derive(Debug, Default)]
pub struct Sweep {
    pub expired: Vec<PendingRequest>,
    pub dead_agents: Vec<String>,
}

impl TimeoutTracker {
    pub fn new(dispatcher: Arc<RequestDispatcher>, sessions: Arc<SessionManager>) -> Self {
        Self {
            dispatcher,
            sessions,
            check_interval: Duration::from_millis(1000), // Check every second
        }
    }

    pub async fn sweep(&self) -> Sweep {
        let expired = self.dispatcher.expire_timed_out().await;
        for request in &expired {
            println!(
                "!!! Request {} ({:?}, seq={}) to {} got no response in time (not retried)",
                request.request_id, request.kind, request.sequence_id, request.agent_id
            );
        }

        let dead_agents = self.sessions.remove_dead_sessions().await;
        for agent_id in &dead_agents {
            warn!(%agent_id, "agent heartbeat timed out, session removed");
        }

        Sweep {
            expired,
            dead_agents,
        }
    }

    /// Start the monitoring loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AgentSession;
    use dispatch_shared::Query;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_sweep_expires_requests_and_dead_agents() {
        let sessions = Arc::new(SessionManager::with_heartbeat_timeout(Duration::from_millis(20)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        let mut handle = AgentSession::new(server_side, peer).get_handle();
        handle.agent_id = "agent-a".into();
        sessions.register(handle).await;

        let dispatcher = Arc::new(RequestDispatcher::new(
            sessions.clone(),
            Duration::from_millis(10),
        ));
        dispatcher.send_query("agent-a", Query::Status).await.unwrap();

        let tracker = TimeoutTracker::new(dispatcher.clone(), sessions.clone());
        let first = tracker.sweep().await;
        assert!(first.expired.is_empty());
        assert!(first.dead_agents.is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = tracker.sweep().await;
        assert_eq!(second.expired.len(), 1);
        assert_eq!(second.dead_agents, vec!["agent-a"]);
        assert_eq!(dispatcher.pending_count().await, 0);
        assert_eq!(sessions.count().await, 0);
    }
}
