//! Raw message to canonical command mapping
//!
//! Assumes the message already passed [`CommandValidator`](super::CommandValidator).
//! Nothing is re-validated; the errors below only cover shapes the validator
//! would have rejected.

use super::types::{Command, CommandKind, CommandPayload, FieldType, FillField};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("command message is not an object")]
    NotAnObject,

    #[error("unrecognized command kind")]
    UnknownKind,

    #[error("missing or malformed '{0}'")]
    Malformed(&'static str),
}

pub struct CommandParser;

impl CommandParser {
    pub fn parse(message: &Value) -> Result<Command, ParseError> {
        let obj = message.as_object().ok_or(ParseError::NotAnObject)?;

        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .and_then(|k| k.parse::<CommandKind>().ok())
            .ok_or(ParseError::UnknownKind)?;

        let raw_payload = obj.get("payload").cloned().unwrap_or(Value::Null);

        let payload = match kind {
            CommandKind::Open => CommandPayload::Open {
                url: raw_payload
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or(ParseError::Malformed("url"))?
                    .to_string(),
            },
            CommandKind::Fill => CommandPayload::Fill {
                fields: parse_fields(&raw_payload)?,
            },
            _ => CommandPayload::Passthrough(raw_payload),
        };

        let auth_token = obj
            .get("authToken")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Command::new(kind, payload, auth_token))
    }
}

fn parse_fields(payload: &Value) -> Result<Vec<FillField>, ParseError> {
    let fields = payload
        .get("fields")
        .and_then(Value::as_array)
        .ok_or(ParseError::Malformed("fields"))?;

    fields
        .iter()
        .map(|field| {
            let selector = field
                .get("selector")
                .and_then(Value::as_str)
                .ok_or(ParseError::Malformed("selector"))?;
            let value = field
                .get("value")
                .filter(|v| !v.is_null())
                .ok_or(ParseError::Malformed("value"))?;
            // Unrecognized types were a validation warning; drop the hint
            let field_type = field
                .get("type")
                .and_then(Value::as_str)
                .and_then(|t| t.parse::<FieldType>().ok());

            Ok(FillField {
                selector: selector.to_string(),
                value: value.clone(),
                field_type,
            })
        })
        .collect()
}
