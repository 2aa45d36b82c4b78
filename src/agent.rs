//! Server message handling
//!
//! Turns inbound `Command` and `Query` payloads into `Response` payloads and
//! forwards queue completions back to the server.

use crate::connection::ConnectionSender;
use crate::queue::{CommandScheduler, QueueItem, StatusReporter};
use dispatch_shared::{
    CommandRequest, CommandResponse, DispatchMode, Payload, Query, QueryRequest,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct HistoryReply<'a> {
    items: &'a [QueueItem],
}

pub struct AgentService {
    scheduler: CommandScheduler,
    reporter: StatusReporter,
    auth_token: Option<String>,
}

impl AgentService {
    pub fn new(scheduler: CommandScheduler, auth_token: Option<String>) -> Self {
        let reporter = scheduler.reporter();
        Self {
            scheduler,
            reporter,
            auth_token,
        }
    }

    /// Handle one payload from the server, returning the reply to send (if any)
    pub async fn handle(&self, payload: Payload) -> Option<Payload> {
        match payload {
            Payload::Command(request) => {
                Some(Payload::Response(self.handle_command(request).await))
            }
            Payload::Query(request) => Some(Payload::Response(self.handle_query(request).await)),
            Payload::Heartbeat(hb) => {
                debug!(healthy = hb.healthy, "server heartbeat");
                None
            }
            other => {
                debug!(msg_type = ?other.message_type(), "ignoring unexpected payload from server");
                None
            }
        }
    }

    async fn handle_command(&self, request: CommandRequest) -> CommandResponse {
        let id = request.request_id;

        if !self.is_authorized(&request.message) {
            warn!(request_id = id, "rejecting command with missing or wrong authToken");
            return CommandResponse::error(id, "Unauthorized: authToken missing or invalid");
        }

        match request.mode {
            DispatchMode::Immediate => match self.scheduler.execute_now(&request.message).await {
                Ok(result) => result.into_response(id),
                Err(e) => CommandResponse::error(id, e.to_string()),
            },
            DispatchMode::Queued { priority } => {
                match self.scheduler.enqueue(&request.message, priority).await {
                    Ok(queue_id) => CommandResponse::ok(
                        id,
                        json!({ "queueId": queue_id, "priority": priority }),
                    ),
                    Err(e) => CommandResponse::error(id, e.to_string()),
                }
            }
        }
    }

    async fn handle_query(&self, request: QueryRequest) -> CommandResponse {
        let id = request.request_id;
        match request.query {
            Query::Status => respond(id, &self.reporter.get_queue_status().await),
            Query::History { limit } => {
                let items = self.reporter.get_history(limit).await;
                respond(id, &HistoryReply { items: &items })
            }
            Query::ClearCompleted => {
                let purged = self.reporter.clear_completed().await;
                CommandResponse::ok(id, json!({ "purged": purged }))
            }
            Query::Item { queue_id } => match self.scheduler.find(&queue_id).await {
                Some(item) => respond(id, &item),
                None => CommandResponse::error(id, format!("No queue item with id {}", queue_id)),
            },
        }
    }

    fn is_authorized(&self, message: &Value) -> bool {
        match &self.auth_token {
            None => true,
            Some(expected) => {
                message.get("authToken").and_then(Value::as_str) == Some(expected.as_str())
            }
        }
    }
}

fn respond<T: Serialize>(request_id: u64, value: &T) -> CommandResponse {
    match serde_json::to_value(value) {
        Ok(data) => CommandResponse::ok(request_id, data),
        Err(e) => CommandResponse::error(request_id, format!("failed to encode response: {}", e)),
    }
}

/// Forward every terminal queue item to the server as a `Completion`
pub async fn forward_completions(scheduler: CommandScheduler, sender: ConnectionSender) {
    let mut completions = scheduler.completions();
    loop {
        match completions.recv().await {
            Ok(item) => {
                let Some(report) = item.completion_report() else {
                    continue;
                };
                if let Err(e) = sender.send(Payload::Completion(report)).await {
                    warn!(queue_id = %item.id, "failed to forward completion: {}", e);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "completion forwarder lagged, some reports were dropped");
            }
            Err(RecvError::Closed) => {
                info!("completion channel closed");
                break;
            }
        }
    }
}
