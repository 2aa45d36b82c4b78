//! Command intake and execution
//!
//! This module handles:
//! - Validating raw inbound command messages
//! - Parsing validated messages into canonical commands
//! - Executing commands against the automation driver

mod executor;
mod parser;
mod types;
mod validator;

pub use executor::{CommandExecutor, ExecutionResult};
pub use parser::{CommandParser, ParseError};
pub use types::{Command, CommandKind, CommandPayload};
pub use validator::CommandValidator;
