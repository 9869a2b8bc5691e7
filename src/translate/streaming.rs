//! Per-stream state for re-emitting upstream deltas as OpenAI chunks.
//!
//! The [`StreamTranslator`] stamps every chunk with one completion id, creation
//! time and the client's model name, and keeps diagnostics for the stream:
//! how many chunks went out, how many argument bytes each tool call received,
//! and which finish reason (if any) ended it.
//!
//! SSE framing helpers live here as well so every path emits identical bytes.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use super::openai_types::{ChatCompletionChunk, ChunkChoice, ChunkDelta, FinishReason};
use super::response::{new_completion_id, DeltaParts};

/// Terminal sentinel of a successful stream.
pub const SSE_DONE: &str = "data: [DONE]\n\n";
/// Keepalive comment; clients ignore it.
pub const SSE_PING: &str = ": ping\n\n";

/// Frame a JSON payload as one SSE data event.
pub fn sse_data<T: Serialize>(payload: &T) -> Bytes {
    match serde_json::to_string(payload) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize SSE payload");
            Bytes::from_static(b"data: {\"error\":{\"message\":\"Internal server error\"}}\n\n")
        }
    }
}

#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    completion_id: String,
    created: i64,
    chunk_count: usize,
    tool_call_args_size: BTreeMap<u32, usize>,
    finish_reason: Option<FinishReason>,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            completion_id: new_completion_id(),
            created: chrono::Utc::now().timestamp(),
            chunk_count: 0,
            tool_call_args_size: BTreeMap::new(),
            finish_reason: None,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    /// Accumulated argument bytes per tool-call index.
    pub fn tool_call_args_size(&self) -> &BTreeMap<u32, usize> {
        &self.tool_call_args_size
    }

    /// Translate one upstream chunk's parts into one client chunk.
    pub fn process(&mut self, parts: DeltaParts) -> ChatCompletionChunk {
        self.chunk_count += 1;
        self.track_tool_args(&parts);

        if let Some(reason) = parts.finish_reason.as_ref() {
            self.record_finish(reason);
        }

        self.make_chunk(
            ChunkDelta {
                role: parts.role,
                content: parts.content,
                tool_calls: parts.tool_calls,
            },
            parts.finish_reason,
        )
    }

    /// Spread a complete message over a role chunk, a content chunk and a finish chunk.
    /// The content chunk is left out when there is nothing to carry.
    pub fn synthesize(&mut self, parts: DeltaParts) -> Vec<ChatCompletionChunk> {
        let finish = parts.finish_reason.clone().unwrap_or(FinishReason::Stop);
        let mut chunks = vec![self.process(DeltaParts {
            role: Some("assistant".to_string()),
            ..DeltaParts::default()
        })];

        if parts.content.is_some() || parts.tool_calls.is_some() {
            chunks.push(self.process(DeltaParts {
                role: None,
                content: parts.content,
                tool_calls: parts.tool_calls,
                finish_reason: None,
            }));
        }

        chunks.push(self.process(DeltaParts {
            finish_reason: Some(finish),
            ..DeltaParts::default()
        }));
        chunks
    }

    /// Log the end-of-stream summary. A stream that never reported a finish
    /// reason is an anomaly but still closes normally.
    pub fn finish(&self) {
        if self.finish_reason.is_none() {
            tracing::warn!(
                chunks = self.chunk_count,
                tool_call_sizes = ?self.tool_call_args_size,
                "Stream ended without finish_reason"
            );
        }
    }

    fn track_tool_args(&mut self, parts: &DeltaParts) {
        let Some(calls) = parts.tool_calls.as_ref() else {
            return;
        };
        for call in calls {
            let Some(args) = call.function.as_ref().and_then(|f| f.arguments.as_deref()) else {
                continue;
            };
            let total = self.tool_call_args_size.entry(call.index).or_insert(0);
            *total += args.len();
            if self.chunk_count <= 5 || self.chunk_count % 100 == 0 {
                tracing::debug!(
                    index = call.index,
                    added = args.len(),
                    total = *total,
                    "Tool call args chunk"
                );
            }
        }
    }

    fn record_finish(&mut self, reason: &FinishReason) {
        if *reason == FinishReason::Length {
            tracing::warn!(
                chunks = self.chunk_count,
                tool_call_sizes = ?self.tool_call_args_size,
                "Stream TRUNCATED (finish_reason=length): response exceeded max_tokens limit"
            );
        } else {
            tracing::info!(
                finish_reason = %reason,
                chunks = self.chunk_count,
                tool_call_sizes = ?self.tool_call_args_size,
                "Stream finished"
            );
        }
        self.finish_reason = Some(reason.clone());
    }

    fn make_chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.completion_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::{FunctionCallDelta, ToolCallDelta};

    fn text(content: &str) -> DeltaParts {
        DeltaParts {
            content: Some(content.to_string()),
            ..DeltaParts::default()
        }
    }

    fn args(index: u32, fragment: &str) -> DeltaParts {
        DeltaParts {
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id: None,
                call_type: None,
                function: Some(FunctionCallDelta {
                    name: None,
                    arguments: Some(fragment.to_string()),
                }),
                thought_signature: None,
            }]),
            ..DeltaParts::default()
        }
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("openai/gpt-4");

        let first = translator.process(DeltaParts {
            role: Some("assistant".to_string()),
            ..text("Hello ")
        });
        let second = translator.process(text("world!"));
        let last = translator.process(DeltaParts {
            finish_reason: Some(FinishReason::Stop),
            ..DeltaParts::default()
        });

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, last.id);
        assert_eq!(first.model, "openai/gpt-4");
        assert_eq!(first.object, "chat.completion.chunk");
        assert_eq!(first.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(second.choices[0].delta.content.as_deref(), Some("world!"));
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(translator.chunk_count(), 3);
        assert_eq!(translator.finish_reason(), Some(&FinishReason::Stop));
    }

    #[test]
    fn test_tool_argument_accounting() {
        let mut translator = StreamTranslator::new("m");
        translator.process(args(0, "{\"pa"));
        translator.process(args(1, "{}"));
        translator.process(args(0, "th\":1}"));

        let sizes = translator.tool_call_args_size();
        assert_eq!(sizes.get(&0), Some(&10));
        assert_eq!(sizes.get(&1), Some(&2));
    }

    #[test]
    fn test_synthesize_three_chunks() {
        let mut translator = StreamTranslator::new("google/gemini-2.5-pro");
        let chunks = translator.synthesize(DeltaParts {
            role: Some("assistant".to_string()),
            content: Some("calling".to_string()),
            tool_calls: args(0, "{}").tool_calls,
            finish_reason: Some(FinishReason::ToolCalls),
        });

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].choices[0].delta, ChunkDelta {
            role: Some("assistant".to_string()),
            ..ChunkDelta::default()
        });
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("calling"));
        assert!(chunks[1].choices[0].delta.tool_calls.is_some());
        assert!(chunks[1].choices[0].finish_reason.is_none());
        assert_eq!(chunks[2].choices[0].delta, ChunkDelta::default());
        assert_eq!(chunks[2].choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_synthesize_empty_message_defaults_to_stop() {
        let mut translator = StreamTranslator::new("m");
        let chunks = translator.synthesize(DeltaParts::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_sse_framing() {
        let bytes = sse_data(&serde_json::json!({"a": 1}));
        assert_eq!(&bytes[..], b"data: {\"a\":1}\n\n");
        assert!(SSE_DONE.ends_with("\n\n"));
        assert!(SSE_PING.starts_with(':'));
    }
}
