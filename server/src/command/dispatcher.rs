//! Request dispatcher for sending commands and queries to agents

use crate::session::SessionManager;
use dispatch_shared::{
    CommandRequest, CommandResponse, CompletionReport, DispatchMode, Envelope, Payload, Query,
    QueryRequest,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What a pending request asked for
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Command(DispatchMode),
    Query(Query),
}

/// Tracks a sent request awaiting its response
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: u64,
    pub sequence_id: u64,
    pub agent_id: String,
    pub kind: RequestKind,
    pub sent_at: Instant,
}

impl PendingRequest {
    /// Check if the response has not arrived within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.sent_at.elapsed() > timeout
    }
}

/// Dispatches requests to agents and matches their responses
pub struct RequestDispatcher {
    session_manager: Arc<SessionManager>,
    sequence_id: AtomicU64,
    request_id: AtomicU64,
    response_timeout: Duration,
    /// Pending requests by request_id
    pending: RwLock<HashMap<u64, PendingRequest>>,
}

impl RequestDispatcher {
    pub fn new(session_manager: Arc<SessionManager>, response_timeout: Duration) -> Self {
        Self {
            session_manager,
            sequence_id: AtomicU64::new(0),
            request_id: AtomicU64::new(0),
            response_timeout,
            pending: RwLock::new(HashMap::new()),
        }
    }

    pub fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send a command to one agent, returning its request ID
    pub async fn send_command(
        &self,
        agent_id: &str,
        mode: DispatchMode,
        message: Value,
    ) -> anyhow::Result<u64> {
        let request_id = self.next_request_id();
        let payload = Payload::Command(CommandRequest {
            request_id,
            mode,
            message,
        });
        self.send(agent_id, request_id, RequestKind::Command(mode), payload)
            .await?;

        println!(
            ">>> Sent command {} ({}) to {}",
            request_id,
            describe_mode(mode),
            agent_id
        );
        Ok(request_id)
    }

    /// Send a command to every connected agent; each gets its own request ID
    pub async fn broadcast_command(&self, mode: DispatchMode, message: Value) -> Vec<u64> {
        let agents = self.session_manager.connected_agents().await;
        let mut request_ids = Vec::new();

        for agent_id in agents {
            match self.send_command(&agent_id, mode, message.clone()).await {
                Ok(id) => request_ids.push(id),
                Err(e) => warn!(%agent_id, "failed to send command: {}", e),
            }
        }

        request_ids
    }

    /// Send a queue query to one agent
    pub async fn send_query(&self, agent_id: &str, query: Query) -> anyhow::Result<u64> {
        let request_id = self.next_request_id();
        let description = format!("{:?}", query);
        let payload = Payload::Query(QueryRequest {
            request_id,
            query: query.clone(),
        });
        self.send(agent_id, request_id, RequestKind::Query(query), payload)
            .await?;

        println!(">>> Sent query {} ({}) to {}", request_id, description, agent_id);
        Ok(request_id)
    }

    async fn send(
        &self,
        agent_id: &str,
        request_id: u64,
        kind: RequestKind,
        payload: Payload,
    ) -> anyhow::Result<()> {
        let sequence_id = self.next_sequence_id();
        let envelope = Envelope::new("server", sequence_id, payload);

        // Track before sending so a fast response always finds its entry
        self.pending.write().await.insert(
            request_id,
            PendingRequest {
                request_id,
                sequence_id,
                agent_id: agent_id.to_string(),
                kind,
                sent_at: Instant::now(),
            },
        );

        if let Err(e) = self.session_manager.send_to(agent_id, &envelope).await {
            self.pending.write().await.remove(&request_id);
            return Err(e);
        }
        Ok(())
    }

    /// Handle a response received from an agent
    ///
    /// Returns the matched request, or `None` for unknown or already expired IDs.
    pub async fn handle_response(
        &self,
        agent_id: &str,
        response: &CommandResponse,
    ) -> Option<PendingRequest> {
        let matched = self.pending.write().await.remove(&response.request_id);

        match &matched {
            Some(request) => {
                let waited_ms = request.sent_at.elapsed().as_millis();
                if response.success {
                    println!(
                        "<<< Response {} from {}: ok ({}ms)",
                        response.request_id, agent_id, waited_ms
                    );
                    if let Some(data) = &response.data {
                        println!("    {}", data);
                    }
                    if let Some(screenshot) = &response.screenshot {
                        println!("    screenshot: {} base64 chars", screenshot.len());
                    }
                } else {
                    println!(
                        "<<< Response {} from {}: error: {}",
                        response.request_id,
                        agent_id,
                        response.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            None => {
                debug!(
                    request_id = response.request_id,
                    %agent_id,
                    "response for unknown or expired request"
                );
            }
        }

        matched
    }

    /// Log a queue completion pushed by an agent
    pub fn handle_completion(&self, agent_id: &str, report: &CompletionReport) {
        println!(
            "<<< Queue item {} on {} finished: {} ({}ms){}",
            report.queue_id,
            agent_id,
            report.status,
            report.elapsed_ms,
            report
                .error
                .as_ref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default()
        );
    }

    /// Drop requests whose response never arrived. Requests are never re-sent.
    pub async fn expire_timed_out(&self) -> Vec<PendingRequest> {
        let mut pending = self.pending.write().await;
        let expired: Vec<u64> = pending
            .values()
            .filter(|r| r.is_timed_out(self.response_timeout))
            .map(|r| r.request_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .inspect(|request| {
                info!(
                    request_id = request.request_id,
                    agent_id = %request.agent_id,
                    "request timed out waiting for response"
                );
            })
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn pending_count_for(&self, agent_id: &str) -> usize {
        self.pending
            .read()
            .await
            .values()
            .filter(|r| r.agent_id == agent_id)
            .count()
    }
}

fn describe_mode(mode: DispatchMode) -> String {
    match mode {
        DispatchMode::Immediate => "immediate".to_string(),
        DispatchMode::Queued { priority } => format!("queued, priority {}", priority),
    }
}
