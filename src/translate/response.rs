//! Normalize upstream completion objects into the OpenAI response and delta shapes.
//!
//! Upstream fields are read defensively: a missing field and an empty value are
//! both "not present", and nothing here fails on a sparse chunk.

use super::openai_types::{
    ChatCompletionResponse, Choice, FinishReason, FunctionCall, FunctionCallDelta,
    ResponseMessage, ToolCall, ToolCallDelta, Usage,
};
use super::upstream_types::{ChoicePayload, UpstreamCompletion, UpstreamMessage, UpstreamToolCall};

/// The pieces of one chunk the orchestrator re-emits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaParts {
    pub role: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    pub finish_reason: Option<FinishReason>,
}

impl DeltaParts {
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.content.is_none()
            && self.tool_calls.is_none()
            && self.finish_reason.is_none()
    }
}

fn present(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.is_empty()).cloned()
}

/// Extract role, content, tool-call fragments and finish reason from the first choice.
pub fn extract_delta(chunk: &UpstreamCompletion) -> DeltaParts {
    let Some(choice) = chunk.choices.first() else {
        return DeltaParts::default();
    };

    let mut parts = match choice.payload() {
        ChoicePayload::Delta(delta) => DeltaParts {
            role: present(delta.role.as_ref()),
            content: present(delta.content.as_ref()),
            tool_calls: tool_call_deltas(delta, |tc, _| tc.index.unwrap_or(0)),
            finish_reason: None,
        },
        ChoicePayload::Message(message) => DeltaParts {
            role: present(message.role.as_ref()),
            content: present(message.content.as_ref()),
            tool_calls: tool_call_deltas(message, |_, position| position),
            finish_reason: None,
        },
        ChoicePayload::Empty => DeltaParts::default(),
    };

    parts.finish_reason = present(choice.finish_reason.as_ref()).map(FinishReason::from);
    parts
}

fn tool_call_deltas(
    body: &UpstreamMessage,
    index_of: impl Fn(&UpstreamToolCall, u32) -> u32,
) -> Option<Vec<ToolCallDelta>> {
    let calls = body.tool_calls.as_ref().filter(|c| !c.is_empty())?;
    let deltas = calls
        .iter()
        .zip(0u32..)
        .map(|(tc, position)| ToolCallDelta {
            index: index_of(tc, position),
            id: present(tc.id.as_ref()),
            call_type: present(tc.call_type.as_ref()),
            function: tc.function.as_ref().map(|f| FunctionCallDelta {
                name: present(f.name.as_ref()),
                arguments: present(f.arguments.as_ref()),
            }),
            thought_signature: present(tc.thought_signature.as_ref()),
        })
        .collect();
    Some(deltas)
}

/// Build complete tool-call records from a final message.
pub fn extract_tool_calls(message: &UpstreamMessage) -> Option<Vec<ToolCall>> {
    let calls = message.tool_calls.as_ref().filter(|c| !c.is_empty())?;
    let records = calls
        .iter()
        .map(|tc| {
            let function = tc.function.clone().unwrap_or_default();
            ToolCall {
                id: present(tc.id.as_ref()).unwrap_or_else(|| {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                }),
                call_type: present(tc.call_type.as_ref()).unwrap_or_else(|| "function".to_string()),
                function: FunctionCall {
                    name: function.name.unwrap_or_default(),
                    arguments: function.arguments.unwrap_or_default(),
                },
                thought_signature: present(tc.thought_signature.as_ref()),
            }
        })
        .collect();
    Some(records)
}

/// Translate a full upstream response into the client response.
/// `model` is what the client asked for and is echoed back verbatim.
pub fn to_chat_response(resp: &UpstreamCompletion, model: &str, created: i64) -> ChatCompletionResponse {
    let choice = resp.choices.first();
    let message = choice.and_then(|c| c.message.as_ref().or(c.delta.as_ref()));

    let usage = resp
        .usage
        .map_or_else(Usage::default, |u| Usage::new(u.prompt_tokens, u.completion_tokens));

    ChatCompletionResponse {
        id: present(resp.id.as_ref()).unwrap_or_else(new_completion_id),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: message
                    .and_then(|m| present(m.role.as_ref()))
                    .unwrap_or_else(|| "assistant".to_string()),
                content: message.and_then(|m| m.content.clone()),
                tool_calls: message.and_then(extract_tool_calls),
            },
            finish_reason: choice
                .and_then(|c| present(c.finish_reason.as_ref()))
                .map(FinishReason::from),
        }],
        usage,
    }
}

/// `chatcmpl-` followed by 24 hex characters.
pub fn new_completion_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..24])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(value: serde_json::Value) -> UpstreamCompletion {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_extract_text_delta() {
        let parts = extract_delta(&completion(json!({
            "choices": [{"delta": {"role": "assistant", "content": "Hello"}}]
        })));
        assert_eq!(parts.role.as_deref(), Some("assistant"));
        assert_eq!(parts.content.as_deref(), Some("Hello"));
        assert!(parts.tool_calls.is_none());
        assert!(parts.finish_reason.is_none());
    }

    #[test]
    fn test_empty_values_are_absent() {
        let parts = extract_delta(&completion(json!({
            "choices": [{"delta": {"role": "", "content": "", "tool_calls": []}, "finish_reason": ""}]
        })));
        assert!(parts.is_empty());

        assert!(extract_delta(&completion(json!({"choices": []}))).is_empty());
    }

    #[test]
    fn test_extract_tool_call_fragments() {
        let parts = extract_delta(&completion(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 2, "id": "call_9", "type": "function", "function": {"name": "write", "arguments": ""}, "thought_signature": "sig"},
                {"index": 3, "function": {"arguments": "{\"a\""}}
            ]}}]
        })));

        let calls = parts.tool_calls.unwrap();
        assert_eq!(calls[0].index, 2);
        assert_eq!(calls[0].id.as_deref(), Some("call_9"));
        assert_eq!(calls[0].thought_signature.as_deref(), Some("sig"));
        let f0 = calls[0].function.as_ref().unwrap();
        assert_eq!(f0.name.as_deref(), Some("write"));
        assert!(f0.arguments.is_none());

        assert_eq!(calls[1].index, 3);
        assert!(calls[1].id.is_none());
        assert_eq!(
            calls[1].function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"a\"")
        );
    }

    #[test]
    fn test_missing_index_defaults_to_zero() {
        let parts = extract_delta(&completion(json!({
            "choices": [{"delta": {"tool_calls": [{"function": {"arguments": "x"}}]}}]
        })));
        assert_eq!(parts.tool_calls.unwrap()[0].index, 0);
    }

    #[test]
    fn test_full_message_shape() {
        let parts = extract_delta(&completion(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "ok", "tool_calls": [
                    {"index": 7, "id": "a", "function": {"name": "f", "arguments": "{}"}},
                    {"id": "b", "function": {"name": "g", "arguments": "{}"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        })));
        assert_eq!(parts.content.as_deref(), Some("ok"));
        assert_eq!(parts.finish_reason, Some(FinishReason::ToolCalls));
        let indices: Vec<u32> = parts.tool_calls.unwrap().iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_extract_tool_calls_records() {
        let message: UpstreamMessage = serde_json::from_value(json!({
            "role": "assistant",
            "tool_calls": [{"id": "call_1", "function": {"name": "search", "arguments": "{\"q\":1}"}, "thought_signature": "s"}]
        }))
        .unwrap();

        let calls = extract_tool_calls(&message).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].call_type, "function");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].thought_signature.as_deref(), Some("s"));

        let none: UpstreamMessage = serde_json::from_value(json!({"content": "x"})).unwrap();
        assert!(extract_tool_calls(&none).is_none());
    }

    #[test]
    fn test_to_chat_response() {
        let resp = completion(json!({
            "id": "chatcmpl-123",
            "model": "gpt-4-0613",
            "choices": [{"message": {"role": "assistant", "content": "Test response"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 99}
        }));

        let out = to_chat_response(&resp, "openai/gpt-4", 1_700_000_000);
        assert_eq!(out.id, "chatcmpl-123");
        assert_eq!(out.object, "chat.completion");
        assert_eq!(out.model, "openai/gpt-4");
        assert_eq!(out.choices[0].message.role, "assistant");
        assert_eq!(out.choices[0].message.content.as_deref(), Some("Test response"));
        assert_eq!(out.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(out.usage, Usage::new(10, 5));
    }

    #[test]
    fn test_completion_id_format() {
        let id = new_completion_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 24);
    }
}
