//! Session management for tracking connected agents
//!
//! This module handles:
//! - Tracking all connected agent sessions by agent ID
//! - Sending envelopes to one agent or all of them
//! - Heartbeat bookkeeping and dead agent detection

mod connection;
mod manager;

pub use connection::{AgentInfo, AgentSession, SessionHandle};
pub use manager::SessionManager;
