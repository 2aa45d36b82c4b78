//! Simulated browser driver
//!
//! Models one browser context as a small state machine so that commands
//! issued in the wrong order fail the way a real browser session would.

use super::{AutomationDriver, DriverError, DriverOutcome};
use crate::command::{Command, CommandKind, CommandPayload};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// 1x1 transparent PNG returned for SCREENSHOT
const PLACEHOLDER_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Browser session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No page open
    Closed,
    /// A page is open and accepting input
    Open { url: String },
    /// A page is open but input is suspended until RESUME
    Paused { url: String },
}

/// In-process driver holding a simulated browser session
pub struct SimulatedDriver {
    state: RwLock<SessionState>,
    latency: Duration,
}

impl SimulatedDriver {
    pub fn new(latency: Duration) -> Self {
        Self {
            state: RwLock::new(SessionState::Closed),
            latency,
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    fn apply(state: &mut SessionState, command: &Command) -> DriverOutcome {
        use SessionState::*;

        match (command.kind(), &*state) {
            (CommandKind::Open, Paused { .. }) => {
                DriverOutcome::failed("Session is paused; RESUME before navigating")
            }
            (CommandKind::Open, current) => {
                let CommandPayload::Open { url } = command.payload() else {
                    return DriverOutcome::failed("OPEN command without url");
                };
                let navigated = matches!(current, Open { .. });
                *state = Open { url: url.clone() };
                DriverOutcome::ok(json!({ "url": url, "navigated": navigated }))
            }

            (CommandKind::Fill, Open { url }) => {
                let filled = match command.payload() {
                    CommandPayload::Fill { fields } => fields.len(),
                    _ => 0,
                };
                DriverOutcome::ok(json!({ "url": url, "filled": filled }))
            }

            (CommandKind::Screenshot, Open { url }) => match B64.decode(PLACEHOLDER_PNG_B64) {
                Ok(png) => DriverOutcome {
                    screenshot: Some(png),
                    ..DriverOutcome::ok(json!({ "url": url, "format": "png" }))
                },
                Err(e) => DriverOutcome::failed(format!("Failed to render screenshot: {}", e)),
            },

            (CommandKind::Pause, Open { url }) => {
                let url = url.clone();
                *state = Paused { url: url.clone() };
                DriverOutcome::ok(json!({ "url": url, "paused": true }))
            }
            (CommandKind::Resume, Paused { url }) => {
                let url = url.clone();
                *state = Open { url: url.clone() };
                DriverOutcome::ok(json!({ "url": url, "paused": false }))
            }
            (CommandKind::Resume, Open { .. }) => DriverOutcome::failed("Session is not paused"),

            (CommandKind::Close, Open { url } | Paused { url }) => {
                let url = url.clone();
                *state = Closed;
                DriverOutcome::ok(json!({ "closed": url }))
            }

            (CommandKind::Fill | CommandKind::Screenshot | CommandKind::Pause, Paused { .. }) => {
                DriverOutcome::failed("Session is paused")
            }
            (kind, Closed) => DriverOutcome::failed(format!("No browser session open for {}", kind)),
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl AutomationDriver for SimulatedDriver {
    async fn run_command(&self, command: &Command) -> Result<DriverOutcome, DriverError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.write().await;
        let outcome = Self::apply(&mut state, command);
        debug!(kind = %command.kind(), success = outcome.success, state = ?*state, "simulated command");
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
