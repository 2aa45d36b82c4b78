//! Operator console: one command per stdin line

use dispatch_shared::{limits, DispatchMode, Query};
use serde_json::Value;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  agents                                 list connected agents
  now <agent|*> <json>                   execute a command immediately
  queue <agent|*> <priority> <json>      enqueue a command
  status <agent>                         queue status
  history <agent> [limit]                recently finished queue items
  item <agent> <queue_id>                one queue item by id
  clear <agent>                          drop finished queue items
  help";

/// Which agents a command goes to
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    All,
    Agent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Agents,
    Help,
    Dispatch {
        target: Target,
        mode: DispatchMode,
        message: Value,
    },
    Query {
        agent_id: String,
        query: Query,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum ConsoleError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid priority '{0}': expected an integer")]
    Priority(String),

    #[error("invalid limit '{0}': expected a non-negative integer")]
    Limit(String),

    #[error("invalid JSON: {0}")]
    Json(String),
}

/// Parse a console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = split_word(line);
    let command = match word {
        "agents" => ConsoleCommand::Agents,
        "help" | "?" => ConsoleCommand::Help,
        "now" => {
            let (target, json) = split_word(rest);
            if target.is_empty() || json.is_empty() {
                return Err(ConsoleError::Usage("now <agent|*> <json>"));
            }
            ConsoleCommand::Dispatch {
                target: parse_target(target),
                mode: DispatchMode::Immediate,
                message: parse_json(json)?,
            }
        }
        "queue" => {
            let (target, rest) = split_word(rest);
            let (priority, json) = split_word(rest);
            if target.is_empty() || priority.is_empty() || json.is_empty() {
                return Err(ConsoleError::Usage("queue <agent|*> <priority> <json>"));
            }
            let priority = priority
                .parse::<i64>()
                .map_err(|_| ConsoleError::Priority(priority.to_string()))?;
            ConsoleCommand::Dispatch {
                target: parse_target(target),
                mode: DispatchMode::Queued { priority },
                message: parse_json(json)?,
            }
        }
        "status" => ConsoleCommand::Query {
            agent_id: single_agent(rest, "status <agent>")?,
            query: Query::Status,
        },
        "clear" => ConsoleCommand::Query {
            agent_id: single_agent(rest, "clear <agent>")?,
            query: Query::ClearCompleted,
        },
        "history" => {
            let (agent, limit) = split_word(rest);
            if agent.is_empty() {
                return Err(ConsoleError::Usage("history <agent> [limit]"));
            }
            let limit = match limit {
                "" => limits::DEFAULT_HISTORY_LIMIT,
                raw => raw
                    .parse::<usize>()
                    .map_err(|_| ConsoleError::Limit(raw.to_string()))?,
            };
            ConsoleCommand::Query {
                agent_id: agent.to_string(),
                query: Query::History { limit },
            }
        }
        "item" => {
            let (agent, rest) = split_word(rest);
            let (queue_id, extra) = split_word(rest);
            if agent.is_empty() || queue_id.is_empty() || !extra.is_empty() {
                return Err(ConsoleError::Usage("item <agent> <queue_id>"));
            }
            ConsoleCommand::Query {
                agent_id: agent.to_string(),
                query: Query::Item {
                    queue_id: queue_id.to_string(),
                },
            }
        }
        other => return Err(ConsoleError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}

/// Split off the first whitespace-delimited word
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    }
}

fn parse_target(raw: &str) -> Target {
    if raw == "*" {
        Target::All
    } else {
        Target::Agent(raw.to_string())
    }
}

fn parse_json(raw: &str) -> Result<Value, ConsoleError> {
    serde_json::from_str(raw).map_err(|e| ConsoleError::Json(e.to_string()))
}

fn single_agent(rest: &str, usage: &'static str) -> Result<String, ConsoleError> {
    let (agent, extra) = split_word(rest);
    if agent.is_empty() || !extra.is_empty() {
        return Err(ConsoleError::Usage(usage));
    }
    Ok(agent.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_commands() {
        let parsed = parse_line(r#"now agent-1 {"kind": "OPEN", "payload": {"url": "https://example.com"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed,
            ConsoleCommand::Dispatch {
                target: Target::Agent("agent-1".into()),
                mode: DispatchMode::Immediate,
                message: json!({"kind": "OPEN", "payload": {"url": "https://example.com"}}),
            }
        );

        let parsed = parse_line(r#"queue * -5 {"kind":"SCREENSHOT"}"#).unwrap().unwrap();
        assert_eq!(
            parsed,
            ConsoleCommand::Dispatch {
                target: Target::All,
                mode: DispatchMode::Queued { priority: -5 },
                message: json!({"kind": "SCREENSHOT"}),
            }
        );
    }

    #[test]
    fn test_queries() {
        assert_eq!(
            parse_line("status agent-1").unwrap(),
            Some(ConsoleCommand::Query {
                agent_id: "agent-1".into(),
                query: Query::Status
            })
        );
        assert_eq!(
            parse_line("history agent-1").unwrap(),
            Some(ConsoleCommand::Query {
                agent_id: "agent-1".into(),
                query: Query::History {
                    limit: limits::DEFAULT_HISTORY_LIMIT
                }
            })
        );
        assert_eq!(
            parse_line("  history   agent-1   3 ").unwrap(),
            Some(ConsoleCommand::Query {
                agent_id: "agent-1".into(),
                query: Query::History { limit: 3 }
            })
        );
        assert_eq!(
            parse_line("item agent-1 3f2a-77").unwrap(),
            Some(ConsoleCommand::Query {
                agent_id: "agent-1".into(),
                query: Query::Item {
                    queue_id: "3f2a-77".into()
                }
            })
        );
        assert!(matches!(parse_line("item agent-1"), Err(ConsoleError::Usage(_))));
        assert_eq!(
            parse_line("clear agent-1").unwrap(),
            Some(ConsoleCommand::Query {
                agent_id: "agent-1".into(),
                query: Query::ClearCompleted
            })
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(
            parse_line("launch x"),
            Err(ConsoleError::Unknown("launch".into()))
        );
        assert!(matches!(parse_line("now agent-1"), Err(ConsoleError::Usage(_))));
        assert_eq!(
            parse_line(r#"queue a high {"kind":"CLOSE"}"#),
            Err(ConsoleError::Priority("high".into()))
        );
        assert!(matches!(parse_line("now a {not json"), Err(ConsoleError::Json(_))));
        assert!(matches!(parse_line("history a -1"), Err(ConsoleError::Limit(_))));
        assert!(matches!(parse_line("status a b"), Err(ConsoleError::Usage(_))));
        assert_eq!(parse_line("agents").unwrap(), Some(ConsoleCommand::Agents));
    }
}
