//! Request dispatch and timeout tracking for the server
//!
//! This module handles:
//! - Sending commands and queue queries to specific agents
//! - Matching responses to outstanding requests
//! - Expiring requests that never got a response

mod dispatcher;
mod timeout;

pub use dispatcher::RequestDispatcher;
pub use timeout::TimeoutTracker;
