//! Plain-text rendering of transcripts for the output log.

use serde_json::Value;

use crate::agent_engine::transcript::{MessageKind, ToolInvocation, Transcript, TranscriptMessage};

pub const RESULT_HEADER: &str = "Agent Response:";

/// Width of the separator printed after every result.
const SEPARATOR_WIDTH: usize = 50;

pub fn separator() -> String {
    "-".repeat(SEPARATOR_WIDTH)
}

/// One block per message, skipping the first (the echoed user input).
pub fn render_transcript(transcript: &Transcript) -> Vec<String> {
    transcript.messages.iter().skip(1).map(render_message).collect()
}

pub fn render_message(message: &TranscriptMessage) -> String {
    let label = format!("[{}]", message.role.label());
    let mut body: Vec<String> = Vec::new();
    match &message.kind {
        MessageKind::Text(text) => {
            if !text.is_empty() {
                body.push(text.clone());
            }
        }
        MessageKind::Structured(value) => body.push(pretty(value)),
        MessageKind::ToolCalls { text, calls } => {
            if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                body.push(text.to_string());
            }
            if !calls.is_empty() {
                body.push(format!("Tool Calls: {}", format_calls(calls)));
            }
        }
    }

    if body.is_empty() {
        return format!("{label} (empty)");
    }
    let mut out = label;
    for part in body {
        out.push('\n');
        out.push_str(&part);
    }
    out
}

fn format_calls(calls: &[ToolInvocation]) -> String {
    calls
        .iter()
        .map(|c| format!("{}({})", c.name, c.args))
        .collect::<Vec<_>>()
        .join(", ")
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
