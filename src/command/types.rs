//! Canonical command representation handed to automation drivers

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Recognized command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Open,
    Fill,
    Screenshot,
    Close,
    Pause,
    Resume,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Open,
        CommandKind::Fill,
        CommandKind::Screenshot,
        CommandKind::Close,
        CommandKind::Pause,
        CommandKind::Resume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Open => "OPEN",
            CommandKind::Fill => "FILL",
            CommandKind::Screenshot => "SCREENSHOT",
            CommandKind::Close => "CLOSE",
            CommandKind::Pause => "PAUSE",
            CommandKind::Resume => "RESUME",
        }
    }

    /// Comma-separated list used in error messages
    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for CommandKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.as_str() == s).ok_or(())
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Form element type hint for FILL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Input,
    Textarea,
    Select,
}

impl FromStr for FieldType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(FieldType::Input),
            "textarea" => Ok(FieldType::Textarea),
            "select" => Ok(FieldType::Select),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillField {
    pub selector: String,
    pub value: Value,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandPayload {
    Open { url: String },
    Fill { fields: Vec<FillField> },
    /// SCREENSHOT, CLOSE, PAUSE and RESUME carry no constraints; whatever the
    /// caller sent is forwarded to the driver untouched.
    Passthrough(Value),
}

/// A validated, typed automation instruction. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    kind: CommandKind,
    payload: CommandPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
}

impl Command {
    pub fn new(kind: CommandKind, payload: CommandPayload, auth_token: Option<String>) -> Self {
        Self {
            kind,
            payload,
            auth_token,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }
}
