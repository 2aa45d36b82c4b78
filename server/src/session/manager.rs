//! Session manager for tracking all connected agents

use super::connection::{AgentInfo, SessionHandle};
use dispatch_shared::{limits, Envelope, Heartbeat};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Manages all active agent sessions
pub struct SessionManager {
    /// Map of agent_id -> session
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    heartbeat_timeout: Duration,
}

struct SessionEntry {
    handle: SessionHandle,
    info: AgentInfo,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_heartbeat_timeout(Duration::from_millis(limits::HEARTBEAT_TIMEOUT_MS))
    }

    pub fn with_heartbeat_timeout(heartbeat_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            heartbeat_timeout,
        }
    }

    /// Register an agent session, replacing any older session with the same ID
    pub async fn register(&self, handle: SessionHandle) {
        let agent_id = handle.agent_id.clone();
        if agent_id.is_empty() {
            return; // Can't register without agent ID
        }

        let info = AgentInfo::new(agent_id.clone(), handle.addr);
        let entry = SessionEntry { handle, info };

        let mut sessions = self.sessions.write().await;
        sessions.insert(agent_id, entry);
    }

    /// Unregister an agent session, but only if it is still the one at `addr`
    ///
    /// A reconnecting agent may already have registered a newer session.
    pub async fn unregister(&self, agent_id: &str, addr: SocketAddr) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(agent_id) {
            Some(entry) if entry.handle.addr == addr => {
                sessions.remove(agent_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(agent_id).map(|e| e.handle.clone())
    }

    /// Send a message to a specific agent
    pub async fn send_to(&self, agent_id: &str, envelope: &Envelope) -> anyhow::Result<()> {
        let handle = self
            .get(agent_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("Agent not connected: {}", agent_id))?;
        handle.send(envelope).await
    }

    /// Broadcast a message to all connected agents
    pub async fn broadcast(&self, envelope: &Envelope) {
        let handles: Vec<SessionHandle> = {
            let sessions = self.sessions.read().await;
            sessions.values().map(|e| e.handle.clone()).collect()
        };
        for handle in handles {
            if let Err(e) = handle.send(envelope).await {
                warn!(agent_id = %handle.agent_id, "failed to send: {}", e);
            }
        }
    }

    /// IDs of all connected agents, sorted
    pub async fn connected_agents(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_info(&self, agent_id: &str) -> Option<AgentInfo> {
        let sessions = self.sessions.read().await;
        sessions.get(agent_id).map(|e| e.info.clone())
    }

    /// Record a heartbeat and the queue counts it carries
    pub async fn update_heartbeat(&self, agent_id: &str, heartbeat: &Heartbeat) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(agent_id) {
            entry.info.apply_heartbeat(heartbeat);
        }
    }

    /// Agents whose last heartbeat is older than the heartbeat timeout
    pub async fn check_dead_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, entry)| entry.info.last_heartbeat.elapsed() > self.heartbeat_timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove dead sessions and return their IDs
    pub async fn remove_dead_sessions(&self) -> Vec<String> {
        let dead = self.check_dead_sessions().await;
        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &dead {
                sessions.remove(id);
            }
        }
        dead
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AgentSession;
    use tokio::net::{TcpListener, TcpStream};

    /// A registered-looking handle backed by a real loopback socket
    async fn handle(agent_id: &str) -> (SessionHandle, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        let mut handle = AgentSession::new(server_side, peer).get_handle();
        handle.agent_id = agent_id.to_string();
        (handle, client)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let manager = SessionManager::new();
        let (a, _a_peer) = handle("agent-a").await;
        let (b, _b_peer) = handle("agent-b").await;
        let a_addr = a.addr;

        manager.register(a).await;
        manager.register(b).await;
        assert_eq!(manager.connected_agents().await, vec!["agent-a", "agent-b"]);

        assert!(manager.unregister("agent-a", a_addr).await);
        assert_eq!(manager.count().await, 1);
        assert!(manager.send_to("agent-a", &heartbeat()).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_session() {
        let manager = SessionManager::new();
        let (old, _old_peer) = handle("agent-a").await;
        let (new, _new_peer) = handle("agent-a").await;
        let old_addr = old.addr;

        manager.register(old).await;
        manager.register(new).await;

        assert!(!manager.unregister("agent-a", old_addr).await);
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_dead_sessions_removed() {
        let manager = SessionManager::with_heartbeat_timeout(Duration::from_millis(20));
        let (a, _peer) = handle("agent-a").await;
        manager.register(a).await;
        assert!(manager.check_dead_sessions().await.is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(manager.remove_dead_sessions().await, vec!["agent-a"]);
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_info() {
        let manager = SessionManager::new();
        let (a, _peer) = handle("agent-a").await;
        manager.register(a).await;

        manager
            .update_heartbeat("agent-a", &Heartbeat::new(100, 3, 1, true))
            .await;
        let info = manager.get_info("agent-a").await.unwrap();
        assert_eq!(info.pending, 3);
        assert_eq!(info.executing, 1);
    }

    fn heartbeat() -> Envelope {
        Envelope::new(
            "server",
            1,
            dispatch_shared::Payload::Heartbeat(Heartbeat::new(0, 0, 0, true)),
        )
    }
}
