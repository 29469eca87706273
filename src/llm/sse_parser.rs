use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into stream chunks.
/// Keep-alives and non-data lines yield nothing. A single delta may carry
/// reasoning, content and tool-call fragments at once, so all are returned.
pub fn parse_sse_line(line: &str) -> DeskPilotResult<Vec<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(Vec::new());
    }

    let data = match line.strip_prefix("data:") {
        Some(d) => d.trim(),
        None => return Ok(Vec::new()),
    };

    if data == "[DONE]" {
        return Ok(vec![done()]);
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| DeskPilotError::SseParsing(e.to_string()))?;

    let mut chunks = Vec::new();
    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(chunks);
    };
    let delta = &first["delta"];

    // Reasoning content (some models like DeepSeek expose this)
    if let Some(reasoning) = delta["reasoning_content"].as_str() {
        if !reasoning.is_empty() {
            chunks.push(StreamChunk {
                kind: StreamChunkKind::Reasoning,
                content: reasoning.to_string(),
            });
        }
    }

    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            chunks.push(StreamChunk {
                kind: StreamChunkKind::Content,
                content: content.to_string(),
            });
        }
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        if !tool_calls.is_empty() {
            chunks.push(StreamChunk {
                kind: StreamChunkKind::ToolCall,
                content: serde_json::to_string(tool_calls)
                    .map_err(|e| DeskPilotError::SseParsing(e.to_string()))?,
            });
        }
    }

    if first["finish_reason"].as_str().is_some() {
        chunks.push(done());
    }

    Ok(chunks)
}

fn done() -> StreamChunk {
    StreamChunk {
        kind: StreamChunkKind::Done,
        content: String::new(),
    }
}
