//! Inbound command validation
//!
//! Stateless rule checks on the raw `{kind, payload, authToken}` message.
//! Errors block execution; warnings are advisory and only logged.

use super::types::{CommandKind, FieldType};
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// Outcome of validating one inbound message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

pub struct CommandValidator;

impl CommandValidator {
    /// Validate a raw inbound message. Pure; performs no I/O.
    pub fn validate(message: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let Some(obj) = message.as_object() else {
            errors.push("Command message must be a JSON object".to_string());
            return ValidationResult::from_parts(errors, warnings);
        };

        let payload = obj.get("payload").unwrap_or(&Value::Null);

        match obj.get("kind") {
            None | Some(Value::Null) => errors.push(format!(
                "Missing command kind (allowed: {})",
                CommandKind::allowed_list()
            )),
            Some(Value::String(raw)) => match raw.parse::<CommandKind>() {
                Ok(CommandKind::Open) => check_open(payload, &mut errors),
                Ok(CommandKind::Fill) => check_fill(payload, &mut errors, &mut warnings),
                Ok(_) => {}
                Err(()) => errors.push(format!(
                    "Unknown command kind '{}' (allowed: {})",
                    raw,
                    CommandKind::allowed_list()
                )),
            },
            Some(other) => errors.push(format!(
                "Command kind must be a string, got {} (allowed: {})",
                json_type(other),
                CommandKind::allowed_list()
            )),
        }

        match obj.get("authToken") {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => errors.push(format!(
                "authToken must be a string, got {}",
                json_type(other)
            )),
        }

        ValidationResult::from_parts(errors, warnings)
    }
}

fn check_open(payload: &Value, errors: &mut Vec<String>) {
    match payload.get("url") {
        Some(Value::String(raw)) => {
            // Url::parse only accepts absolute URLs
            if let Err(e) = Url::parse(raw) {
                errors.push(format!("OPEN command has an invalid url '{}': {}", raw, e));
            }
        }
        Some(other) => errors.push(format!(
            "OPEN command 'url' must be a string, got {}",
            json_type(other)
        )),
        None => errors.push("OPEN command requires a 'url' string in its payload".to_string()),
    }
}

fn check_fill(payload: &Value, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let fields = match payload.get("fields") {
        Some(Value::Array(fields)) => fields,
        Some(other) => {
            errors.push(format!(
                "FILL command 'fields' must be an array, got {}",
                json_type(other)
            ));
            return;
        }
        None => {
            errors.push("FILL command requires a 'fields' array in its payload".to_string());
            return;
        }
    };

    if fields.is_empty() {
        warnings.push("FILL command has an empty 'fields' array; nothing will be filled".to_string());
        return;
    }

    for (index, field) in fields.iter().enumerate() {
        let Some(field) = field.as_object() else {
            errors.push(format!("fields[{}] must be an object", index));
            continue;
        };

        match field.get("selector") {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            _ => errors.push(format!(
                "fields[{}]: 'selector' is required and must be a non-empty string",
                index
            )),
        }

        match field.get("value") {
            None | Some(Value::Null) => {
                errors.push(format!("fields[{}]: 'value' is required", index))
            }
            Some(_) => {}
        }

        match field.get("type") {
            None | Some(Value::Null) => {}
            Some(Value::String(t)) if t.parse::<FieldType>().is_ok() => {}
            Some(other) => warnings.push(format!(
                "fields[{}]: unrecognized type {} (expected input, textarea or select)",
                index, other
            )),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
