//! Command executor - runs canonical commands against the automation driver

use super::types::Command;
use crate::driver::{AutomationDriver, DriverOutcome};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use dispatch_shared::{now_ms, CommandResponse};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Result of executing one command. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Base64-encoded image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub elapsed_ms: u64,
    pub completed_at_ms: u64,
}

impl ExecutionResult {
    pub fn failure(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            result_payload: None,
            error_message: Some(message.into()),
            screenshot: None,
            elapsed_ms,
            completed_at_ms: now_ms(),
        }
    }

    fn from_outcome(outcome: DriverOutcome, elapsed_ms: u64) -> Self {
        let screenshot = outcome.screenshot.map(|png| B64.encode(png));

        if outcome.success {
            Self {
                success: true,
                result_payload: outcome.data,
                error_message: None,
                screenshot,
                elapsed_ms,
                completed_at_ms: now_ms(),
            }
        } else {
            Self {
                success: false,
                result_payload: outcome.data,
                error_message: Some(
                    outcome
                        .error
                        .unwrap_or_else(|| "Driver reported failure".to_string()),
                ),
                screenshot,
                elapsed_ms,
                completed_at_ms: now_ms(),
            }
        }
    }

    /// Convert into the outbound response sent back over the transport
    pub fn into_response(self, request_id: u64) -> CommandResponse {
        let data = if self.success {
            Some(json!({
                "result": self.result_payload,
                "elapsedMs": self.elapsed_ms,
                "completedAt": self.completed_at_ms,
            }))
        } else {
            None
        };

        CommandResponse {
            request_id,
            success: self.success,
            data,
            error: self.error_message,
            screenshot: self.screenshot,
        }
    }
}

/// Executes commands against the driver, one at a time
///
/// The driver mutex is shared by the immediate path and the queue loop, so at
/// most one command is ever in flight against the browser context.
pub struct CommandExecutor {
    driver: Arc<dyn AutomationDriver>,
    driver_lock: Mutex<()>,
    command_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(driver: Arc<dyn AutomationDriver>, command_timeout: Duration) -> Self {
        Self {
            driver,
            driver_lock: Mutex::new(()),
            command_timeout,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Execute a command. Never fails: every failure mode becomes an
    /// `ExecutionResult` with `success = false`.
    pub async fn execute(&self, command: &Command) -> ExecutionResult {
        let _exclusive = self.driver_lock.lock().await;

        let start_time = Instant::now();
        debug!(kind = %command.kind(), driver = self.driver.name(), "executing command");

        let outcome = timeout(self.command_timeout, self.driver.run_command(command)).await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(outcome)) => ExecutionResult::from_outcome(outcome, elapsed_ms),
            Ok(Err(e)) => ExecutionResult::failure(e.to_string(), elapsed_ms),
            Err(_) => ExecutionResult::failure(
                format!(
                    "command timed out after {}ms",
                    self.command_timeout.as_millis()
                ),
                elapsed_ms,
            ),
        };

        if result.success {
            info!(kind = %command.kind(), elapsed_ms, "command completed");
        } else {
            warn!(
                kind = %command.kind(),
                elapsed_ms,
                error = result.error_message.as_deref().unwrap_or_default(),
                "command failed"
            );
        }

        result
    }
}
