use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{AgentState, StopReason};
use crate::agent_engine::transcript::{parse_arguments, Transcript};
use crate::errors::DeskPilotResult;
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, ToolCall, ToolDef};

/// Where tool calls requested by the model are carried out.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn has_tool(&self, name: &str) -> bool;

    /// Text handed back to the model as the tool result.
    async fn execute(&self, name: &str, args: Value) -> DeskPilotResult<String>;
}

/// Bounded ReAct loop: model call, tool calls, tool results, model call...
pub struct ReactAgent {
    provider: Arc<dyn LlmProvider>,
    call_config: CallConfig,
    tools: Vec<ToolDef>,
    system_prompt: Option<String>,
}

impl ReactAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        call_config: CallConfig,
        tools: Vec<ToolDef>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            provider,
            call_config,
            tools,
            system_prompt,
        }
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Run one user command. Running out of steps is not an error: the
    /// partial transcript comes back with [`StopReason::StepLimit`].
    pub async fn run(
        &self,
        executor: &dyn ToolExecutor,
        user_text: &str,
        step_limit: u32,
    ) -> DeskPilotResult<Transcript> {
        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let mut ctrl = LoopController::new(step_limit);
        let mut state = AgentState::Idle;

        let mut messages = Vec::new();
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        messages.push(ChatMessage::user(user_text));
        tracing::info!(%run_id, step_limit, provider = self.provider.name(), "run started");

        let reason = loop {
            let Some(step) = ctrl.begin_step() else {
                tracing::warn!(%run_id, steps = ctrl.steps_taken(), "step limit reached");
                break StopReason::StepLimit;
            };
            transition(&mut state, AgentState::Planning { step }, run_id);

            let response = self
                .provider
                .chat(messages.clone(), self.tools.clone(), &self.call_config)
                .await?;
            if !response.reasoning.is_empty() {
                tracing::debug!(%run_id, step, reasoning = %response.reasoning, "model reasoning");
            }

            let calls = with_call_ids(response.tool_calls, step);
            messages.push(ChatMessage::assistant(response.content, calls.clone()));
            if calls.is_empty() {
                break StopReason::Completed;
            }

            for call in calls {
                let name = call.function.name.as_str();
                transition(
                    &mut state,
                    AgentState::Executing {
                        step,
                        tool: name.to_string(),
                    },
                    run_id,
                );
                let result = self.execute_call(executor, &call, run_id).await;
                messages.push(ChatMessage::tool(call.id.clone(), result));
            }
        };

        transition(&mut state, AgentState::Done { reason }, run_id);
        let transcript = Transcript::from_history(run_id, &messages, reason, started_at);
        tracing::info!(
            %run_id,
            steps = ctrl.steps_taken(),
            messages = transcript.messages.len(),
            elapsed_ms = ctrl.elapsed().as_millis() as u64,
            ?reason,
            "run finished"
        );
        Ok(transcript)
    }

    async fn execute_call(&self, executor: &dyn ToolExecutor, call: &ToolCall, run_id: Uuid) -> String {
        let name = call.function.name.as_str();
        if !executor.has_tool(name) {
            tracing::warn!(%run_id, tool = name, "model requested an unknown tool");
            return format!("Error: unknown tool '{name}'");
        }

        let raw = call.function.arguments.as_str();
        let args = parse_arguments(raw);
        if args.as_object().is_some_and(|o| o.is_empty()) && !raw.trim().is_empty() && raw.trim() != "{}" {
            tracing::warn!(%run_id, tool = name, arguments = raw, "unparseable tool arguments, passing {{}}");
        }

        match executor.execute(name, args).await {
            Ok(text) => {
                tracing::info!(%run_id, tool = name, result = %text, "tool result");
                text
            }
            Err(e) => {
                tracing::warn!(%run_id, tool = name, error = %e, "tool call failed");
                format!("Error calling tool {name}: {e}")
            }
        }
    }
}

fn transition(state: &mut AgentState, next: AgentState, run_id: Uuid) {
    tracing::debug!(%run_id, from = ?state, to = ?next, "agent state");
    *state = next;
}

/// Some servers omit call ids; tool results need one to pair with.
fn with_call_ids(calls: Vec<ToolCall>, step: u32) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, mut call)| {
            if call.id.is_empty() {
                call.id = format!("call_{step}_{i}");
            }
            call
        })
        .collect()
}
