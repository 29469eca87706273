/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    /// The step budget ran out; the transcript is partial.
    StepLimit,
}

/// Lifecycle states of one agent run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning { step: u32 },
    Executing { step: u32, tool: String },
    Done { reason: StopReason },
}
