//! Automation driver abstraction
//!
//! The dispatch core knows nothing about how a command is carried out; it
//! only calls [`AutomationDriver::run_command`] and inspects the outcome.
//! Two implementations are provided:
//! - [`SimulatedDriver`]: in-process stand-in for one browser context
//! - [`RemoteDriver`]: forwards commands to a browser-control endpoint over TCP

mod remote;
mod simulated;

pub use remote::RemoteDriver;
pub use simulated::SimulatedDriver;

use crate::command::Command;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// What the driver reported after running a command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Raw image bytes (PNG)
    pub screenshot: Option<Vec<u8>>,
}

impl DriverOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// The driver call itself failed (as opposed to a reported `success: false`)
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to connect to driver at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("driver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver protocol error: {0}")]
    Protocol(String),

    #[error("driver connection closed")]
    Closed,
}

impl From<dispatch_shared::codec::CodecError> for DriverError {
    fn from(e: dispatch_shared::codec::CodecError) -> Self {
        DriverError::Protocol(e.to_string())
    }
}

/// A single controlled browser context
///
/// Implementations need not be internally synchronized for exclusivity: the
/// executor never issues two commands at once.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Carry out one command
    async fn run_command(&self, command: &Command) -> Result<DriverOutcome, DriverError>;

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}
