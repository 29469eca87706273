use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunkKind, ToolCall, ToolDef,
};

/// Tool call accumulator: delta index → (id, type, name, accumulated_arguments)
type ToolCallBuilders = BTreeMap<usize, (String, String, String, String)>;

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
    ) -> DeskPilotResult<LlmResponse> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            tools = tools.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %redacted_body(&body), "request body (base64 omitted)");

        let mut request = self.client.post(&self.api_base).json(&body);
        // Local servers (Ollama) accept anonymous requests.
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(DeskPilotError::LlmProvider(format!("{status}: {err_body}")));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            let json: serde_json::Value = response.json().await?;
            let reply = parse_completion(&json)?;
            tracing::info!(
                content_len = reply.content.len(),
                tool_calls = reply.tool_calls.len(),
                "LLM JSON response received"
            );
            Ok(reply)
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Handle SSE streaming response and accumulate the full reply.
    async fn handle_stream(&self, response: reqwest::Response) -> DeskPilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut acc = StreamAccumulator::default();
        while let Some(result) = byte_stream.next().await {
            if acc.push_bytes(&result?) {
                break;
            }
        }
        let reply = acc.finish();

        tracing::info!(
            content_len = reply.content.len(),
            reasoning_len = reply.reasoning.len(),
            tool_calls = reply.tool_calls.len(),
            tools = ?reply.tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );
        Ok(reply)
    }
}

/// Reassembles SSE lines from raw body bytes and folds their chunks into a reply.
#[derive(Default)]
struct StreamAccumulator {
    line_buf: Vec<u8>,
    content: String,
    reasoning: String,
    builders: ToolCallBuilders,
    done: bool,
}

impl StreamAccumulator {
    /// Returns `true` once `[DONE]` has been seen.
    fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        for &b in bytes {
            if self.done {
                break;
            }
            if b != b'\n' {
                self.line_buf.push(b);
                continue;
            }
            self.flush_line();
        }
        self.done
    }

    fn flush_line(&mut self) {
        let line = String::from_utf8_lossy(&self.line_buf).trim().to_string();
        self.line_buf.clear();
        if line.is_empty() {
            return;
        }

        let chunks = match sse_parser::parse_sse_line(&line) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::debug!("SSE parse skipped: {e}");
                return;
            }
        };
        for chunk in chunks {
            tracing::trace!(kind = ?chunk.kind, len = chunk.content.len(), "stream chunk");
            match chunk.kind {
                StreamChunkKind::Reasoning => self.reasoning.push_str(&chunk.content),
                StreamChunkKind::Content => self.content.push_str(&chunk.content),
                StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut self.builders),
                StreamChunkKind::Done => {
                    self.done = true;
                    return;
                }
            }
        }
    }

    /// A body may end without a final newline; its last line still counts.
    fn finish(mut self) -> LlmResponse {
        if !self.done && !self.line_buf.is_empty() {
            self.flush_line();
        }
        LlmResponse {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: build_tool_calls(self.builders),
        }
    }
}

/// Copy of the request body with base64 image payloads replaced, for logging only.
fn redacted_body(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

/// Extract the first choice of a non-streaming chat completion.
fn parse_completion(json: &serde_json::Value) -> DeskPilotResult<LlmResponse> {
    let message = &json["choices"][0]["message"];
    if message.is_null() {
        return Err(DeskPilotError::LlmProvider(format!(
            "response has no choices: {json}"
        )));
    }

    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"]
        .as_str()
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        // Some servers send arguments as an object rather than a string.
                        arguments: match &tc["function"]["arguments"] {
                            serde_json::Value::String(s) => s.clone(),
                            serde_json::Value::Null => "{}".to_string(),
                            other => other.to_string(),
                        },
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        reasoning,
        tool_calls,
    })
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(chunk_content: &str, builders: &mut ToolCallBuilders) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str() {
            if !id.is_empty() {
                entry.0 = id.to_string();
            }
        }
        if let Some(t) = delta["type"].as_str() {
            if !t.is_empty() {
                entry.1 = t.to_string();
            }
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            if !name.is_empty() {
                entry.2.push_str(name);
            }
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: ToolCallBuilders) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
