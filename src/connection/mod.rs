//! Connection management for the control-server link
//!
//! This module handles:
//! - Persistent TCP connection with automatic reconnection and backoff
//! - Bidirectional envelope streaming
//! - Heartbeats carrying the queue counts

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionSender};
