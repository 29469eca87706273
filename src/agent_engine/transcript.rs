//! Immutable record of one run, built once from the chat history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent_engine::state::StopReason;
use crate::llm::types::{ChatMessage, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    ToolResult,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Agent => "Agent",
            Role::ToolResult => "Tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text(String),
    Structured(Value),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolInvocation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub kind: MessageKind,
}

impl TranscriptMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            kind: MessageKind::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub run_id: Uuid,
    pub messages: Vec<TranscriptMessage>,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Transcript {
    /// Build from the chat history of a run. System messages are dropped, so
    /// the first message is the user's input.
    pub fn from_history(
        run_id: Uuid,
        history: &[ChatMessage],
        stop_reason: StopReason,
        started_at: DateTime<Utc>,
    ) -> Self {
        let messages = history.iter().filter_map(convert).collect();
        Self {
            run_id,
            messages,
            stop_reason,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Final agent text, if the run completed with one.
    pub fn final_answer(&self) -> Option<&str> {
        match self.messages.last() {
            Some(TranscriptMessage {
                role: Role::Agent,
                kind: MessageKind::Text(text),
            }) => Some(text),
            _ => None,
        }
    }
}

/// Arguments as handed to the tool: malformed JSON becomes `{}`.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Default::default()),
    }
}

fn invocations(calls: &[ToolCall]) -> Vec<ToolInvocation> {
    calls
        .iter()
        .map(|c| ToolInvocation {
            name: c.function.name.clone(),
            args: parse_arguments(&c.function.arguments),
        })
        .collect()
}

fn convert(msg: &ChatMessage) -> Option<TranscriptMessage> {
    let text = msg.text_content();
    let message = match msg.role.as_str() {
        "user" => TranscriptMessage::text(Role::User, text),
        "assistant" => match msg.tool_calls.as_deref() {
            Some(calls) if !calls.is_empty() => TranscriptMessage {
                role: Role::Agent,
                kind: MessageKind::ToolCalls {
                    text: (!text.trim().is_empty()).then_some(text),
                    calls: invocations(calls),
                },
            },
            _ => TranscriptMessage::text(Role::Agent, text),
        },
        "tool" => {
            let kind = match serde_json::from_str::<Value>(text.trim()) {
                Ok(value @ (Value::Object(_) | Value::Array(_))) => MessageKind::Structured(value),
                _ => MessageKind::Text(text),
            };
            TranscriptMessage {
                role: Role::ToolResult,
                kind,
            }
        }
        _ => return None,
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FunctionCall;
    use serde_json::json;

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: "call_0".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: args.into(),
            },
        }
    }

    #[test]
    fn kinds_are_resolved_from_history() {
        let history = vec![
            ChatMessage::system("hidden"),
            ChatMessage::user("click it"),
            ChatMessage::assistant("", vec![call("click_at", r#"{"x":1,"y":2}"#)]),
            ChatMessage::tool("call_0", "Clicked at (1, 2) with left button, 1 times"),
            ChatMessage::tool("call_1", r#"{"width": 10}"#),
            ChatMessage::assistant("Done.", vec![]),
        ];
        let t = Transcript::from_history(Uuid::new_v4(), &history, StopReason::Completed, Utc::now());

        assert_eq!(t.messages.len(), 5);
        assert_eq!(t.messages[0], TranscriptMessage::text(Role::User, "click it"));
        assert_eq!(
            t.messages[1].kind,
            MessageKind::ToolCalls {
                text: None,
                calls: vec![ToolInvocation {
                    name: "click_at".into(),
                    args: json!({"x": 1, "y": 2})
                }]
            }
        );
        assert_eq!(t.messages[2].role, Role::ToolResult);
        assert!(matches!(t.messages[2].kind, MessageKind::Text(_)));
        assert_eq!(
            t.messages[3].kind,
            MessageKind::Structured(json!({"width": 10}))
        );
        assert_eq!(t.final_answer(), Some("Done."));
        assert!(t.finished_at >= t.started_at);
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments("{\"x\": "), json!({}));
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("[1,2]"), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#), json!({"a": 1}));
    }
}
