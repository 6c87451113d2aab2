//! Common data models for the provider-agnostic streaming pipeline.
//!
//! Two event vocabularies live here:
//!
//! - [`GenerationEvent`]: the low-level sequence produced by a provider
//!   stream (and re-entered by tool execution).
//! - [`UiChunk`]: the framed, consumer-facing protocol unit emitted by
//!   [`crate::ui::transform`].
//!
//! Both serialize with a `type` discriminator and camelCase fields, which is
//! the reference JSON framing used by [`crate::sse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::AddAssign;

/// Reason for finishing the response generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    PromptTokens,
    OutputTokens,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Total prompt tokens used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    /// Total completion tokens used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,

    /// Total tokens as reported by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

fn add_tokens(lhs: Option<u32>, rhs: Option<u32>) -> Option<u32> {
    match (lhs, rhs) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, b) => a.or(b),
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens = add_tokens(self.prompt_tokens, rhs.prompt_tokens);
        self.completion_tokens = add_tokens(self.completion_tokens, rhs.completion_tokens);
        self.total_tokens = add_tokens(self.total_tokens, rhs.total_tokens);
    }
}

/// Response metadata reported at the end of a generation step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// A source cited by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "sourceType",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Source {
    Url {
        id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Document {
        id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// Provider-agnostic generation event.
///
/// Every `*-start(id)` is expected to be matched by exactly one `*-end(id)`;
/// the transform tolerates (and repairs) streams that break this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum GenerationEvent {
    Start,
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    Source(Source),
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        provider_executed: bool,
        #[serde(default)]
        dynamic: bool,
    },
    ToolInputDelta {
        tool_call_id: String,
        delta: String,
    },
    /// Tool input is complete. When `input` is `None` it is parsed from the
    /// accumulated `tool-input-delta` text.
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default)]
        provider_executed: bool,
        #[serde(default)]
        dynamic: bool,
    },
    ToolApprovalRequest {
        approval_id: String,
        tool_call_id: String,
    },
    ToolApprovalResponse {
        approval_id: String,
        tool_call_id: String,
        approved: bool,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Value,
        #[serde(default)]
        preliminary: bool,
        #[serde(default)]
        provider_executed: bool,
    },
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: String,
        #[serde(default)]
        provider_executed: bool,
    },
    ToolOutputDenied {
        tool_call_id: String,
    },
    FinishStep {
        #[serde(default)]
        response: ResponseMetadata,
        #[serde(default)]
        usage: Usage,
        finish_reason: FinishReason,
    },
    Finish {
        finish_reason: FinishReason,
        #[serde(default)]
        total_usage: Usage,
    },
    Error {
        error: Value,
    },
    Raw {
        raw_value: Value,
    },
}

/// Lifecycle state of a single tool call, keyed by `toolCallId`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    ApprovalRequested,
    ApprovalResponded,
    OutputAvailable,
    OutputError,
    OutputDenied,
}

impl ToolState {
    /// Whether no further output may be recorded for the call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolState::OutputError | ToolState::OutputDenied)
    }
}

/// Consumer-facing stream chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UiChunk {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    SourceDocument {
        source_id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<bool>,
    },
    /// `partial_input` is the best-effort parse of all input text received
    /// so far for the call.
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_input: Option<Value>,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<bool>,
    },
    ToolInputError {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        error_text: String,
    },
    ToolApprovalRequest {
        approval_id: String,
        tool_call_id: String,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preliminary: Option<bool>,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
    },
    ToolOutputDenied {
        tool_call_id: String,
    },
    MessageMetadata {
        message_metadata: Value,
    },
    FinishStep,
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    Error {
        error_text: String,
    },
}

impl UiChunk {
    /// The `type` discriminator this chunk serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            UiChunk::Start { .. } => "start",
            UiChunk::StartStep => "start-step",
            UiChunk::TextStart { .. } => "text-start",
            UiChunk::TextDelta { .. } => "text-delta",
            UiChunk::TextEnd { .. } => "text-end",
            UiChunk::ReasoningStart { .. } => "reasoning-start",
            UiChunk::ReasoningDelta { .. } => "reasoning-delta",
            UiChunk::ReasoningEnd { .. } => "reasoning-end",
            UiChunk::SourceUrl { .. } => "source-url",
            UiChunk::SourceDocument { .. } => "source-document",
            UiChunk::ToolInputStart { .. } => "tool-input-start",
            UiChunk::ToolInputDelta { .. } => "tool-input-delta",
            UiChunk::ToolInputAvailable { .. } => "tool-input-available",
            UiChunk::ToolInputError { .. } => "tool-input-error",
            UiChunk::ToolApprovalRequest { .. } => "tool-approval-request",
            UiChunk::ToolOutputAvailable { .. } => "tool-output-available",
            UiChunk::ToolOutputError { .. } => "tool-output-error",
            UiChunk::ToolOutputDenied { .. } => "tool-output-denied",
            UiChunk::MessageMetadata { .. } => "message-metadata",
            UiChunk::FinishStep => "finish-step",
            UiChunk::Finish { .. } => "finish",
            UiChunk::Error { .. } => "error",
        }
    }
}
