//! The canonical model stream vocabulary.
//!
//! Every provider's raw events are normalized into this one tagged
//! [`StreamPart`] sequence. Unknown provider events are carried, never
//! dropped.

use serde::{Deserialize, Serialize};

use crate::message::ReasoningMode;
use crate::tool::{ToolCall, ToolOutcome};

/// A provider-agnostic element of the model stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPart {
    // ── Lifecycle ─────────────────────────────────────────────────
    Start,
    Finish {
        reason: StopReason,
        usage: Usage,
    },
    Abort {
        reason: String,
    },
    Error {
        message: String,
    },
    StartStep {
        n: u32,
    },
    FinishStep {
        n: u32,
        usage: Usage,
        reason: StopReason,
    },

    // ── Text ──────────────────────────────────────────────────────
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        text: String,
    },
    TextEnd {
        id: String,
    },

    // ── Reasoning ─────────────────────────────────────────────────
    ReasoningStart {
        id: String,
        mode: ReasoningMode,
    },
    ReasoningDelta {
        id: String,
        mode: ReasoningMode,
        text: String,
    },
    ReasoningEnd {
        id: String,
        mode: ReasoningMode,
    },

    // ── Tools ─────────────────────────────────────────────────────
    ToolInputStart {
        key: String,
        name: String,
    },
    ToolInputDelta {
        key: String,
        delta: String,
    },
    ToolInputEnd {
        key: String,
        name: String,
    },
    ToolCall {
        key: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        key: String,
        name: String,
        output: ToolOutcome,
    },
    ToolError {
        key: String,
        name: String,
        error: String,
    },
    ToolOutputDenied {
        key: String,
        name: String,
        reason: String,
    },
    ToolApprovalRequest {
        approval_id: String,
        call: ToolCall,
    },

    // ── Opaque carriers ───────────────────────────────────────────
    Raw {
        payload: serde_json::Value,
    },
    Unknown {
        part_type: String,
        payload: serde_json::Value,
    },
}

/// Why a step (or the whole stream) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolCalls,
    StepLimitReached,
    Error,
    Aborted,
    Other,
}

/// Token usage for one step or a whole turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Fold another step's usage into a running total.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
