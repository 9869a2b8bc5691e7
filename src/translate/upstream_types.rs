//! Wire types for the Dedalus chat completions API.
//!
//! The request side is what [`crate::upstream`] sends. The response side is parsed
//! defensively: every field is optional, so a missing or empty value never fails
//! a stream. Streamed chunks and full responses share one shape; which one a
//! choice carries is decided by [`UpstreamChoice::payload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::openai_types::{ChatMessage, StopSequences, Tool};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
}

// ---------------------------------------------------------------------------
// Response / chunk
// ---------------------------------------------------------------------------

/// A completion object: one SSE chunk when streaming, the whole response otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamCompletion {
    pub id: Option<String>,
    pub model: Option<String>,
    pub choices: Vec<UpstreamChoice>,
    pub usage: Option<UpstreamUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamChoice {
    pub index: Option<u32>,
    pub delta: Option<UpstreamMessage>,
    pub message: Option<UpstreamMessage>,
    pub finish_reason: Option<String>,
}

/// Which of the two shapes a choice carries.
#[derive(Debug, Clone, Copy)]
pub enum ChoicePayload<'a> {
    /// Incremental fragment from a native stream.
    Delta(&'a UpstreamMessage),
    /// Complete message from a non-streaming call.
    Message(&'a UpstreamMessage),
    Empty,
}

impl UpstreamChoice {
    pub fn payload(&self) -> ChoicePayload<'_> {
        match (&self.delta, &self.message) {
            (Some(delta), _) => ChoicePayload::Delta(delta),
            (None, Some(message)) => ChoicePayload::Message(message),
            (None, None) => ChoicePayload::Empty,
        }
    }
}

/// Body of either a `delta` or a `message`; the fields are the same.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamMessage {
    pub role: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<UpstreamToolCall>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToolCall {
    pub index: Option<u32>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub call_type: Option<String>,
    pub function: Option<UpstreamFunction>,
    pub thought_signature: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Error body the provider returns on failure, also seen inline in streams.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamErrorBody {
    pub error: UpstreamErrorDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<Value>,
}
