//! Provider-family detection and per-provider request rewrites.
//!
//! Model identifiers are namespaced by provider (`openai/gpt-4o`,
//! `google/gemini-2.5-pro`). Google's backend accepts a narrower JSON-Schema
//! dialect for tool parameters and requires a thought signature on tool calls in
//! conversation history, so requests for it are rewritten before they go out.
//! All functions here are pure and never mutate their input.

use serde_json::{Map, Value};

use crate::translate::openai_types::{ChatMessage, Role, Tool};

/// Signature Google documents as "skip validation", base64 of
/// `skip_thought_signature_validator`.
pub const SKIP_SIGNATURE_VALIDATION: &str = "c2tpcF90aG91Z2h0X3NpZ25hdHVyZV92YWxpZGF0b3I=";

/// Schema keywords Google rejects. Only removed at schema level, never from a
/// `properties` map where keys are user-defined names.
const DISALLOWED_SCHEMA_KEYWORDS: &[&str] = &[
    "$schema",
    "additionalProperties",
    "maxLength",
    "minLength",
    "maxItems",
    "minItems",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// `openai/...` models; take `max_completion_tokens`.
    OpenAi,
    /// `google/...` and bare `gemini...` models.
    Google,
    Other,
}

impl ProviderFamily {
    #[must_use]
    pub fn from_model(model: &str) -> Self {
        if model.starts_with("openai/") {
            Self::OpenAi
        } else if model.starts_with("google/") || model.starts_with("gemini") {
            Self::Google
        } else {
            Self::Other
        }
    }
}

/// Whether the model belongs to the provider that needs request rewriting.
#[must_use]
pub fn is_quirk_provider(model: &str) -> bool {
    ProviderFamily::from_model(model) == ProviderFamily::Google
}

/// Strip disallowed keywords from every schema-level object in `schema`.
#[must_use]
pub fn sanitize_tool_schema(schema: &Value) -> Value {
    clean_value(schema, false)
}

fn clean_value(value: &Value, in_properties: bool) -> Value {
    match value {
        Value::Object(map) => Value::Object(clean_object(map, in_properties)),
        Value::Array(items) => Value::Array(items.iter().map(|v| clean_value(v, false)).collect()),
        other => other.clone(),
    }
}

fn clean_object(map: &Map<String, Value>, in_properties: bool) -> Map<String, Value> {
    map.iter()
        .filter(|(key, _)| in_properties || !DISALLOWED_SCHEMA_KEYWORDS.contains(&key.as_str()))
        .map(|(key, value)| {
            let cleaned = match value {
                Value::Object(inner) => Value::Object(clean_object(inner, key == "properties")),
                other => clean_value(other, false),
            };
            (key.clone(), cleaned)
        })
        .collect()
}

/// Sanitize the parameter schema of every tool, returning new definitions.
#[must_use]
pub fn sanitize_tools(tools: &[Tool]) -> Vec<Tool> {
    tools
        .iter()
        .map(|tool| {
            let mut tool = tool.clone();
            if let Some(params) = tool.function.parameters.as_ref() {
                tool.function.parameters = Some(sanitize_tool_schema(params));
                tracing::debug!(tool = %tool.function.name, "Sanitized tool parameters");
            }
            tool
        })
        .collect()
}

/// Give the leading tool call of each assistant turn the skip-validation
/// signature when it carries none. Later calls in the turn are left alone.
#[must_use]
pub fn inject_continuation_signatures(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| {
            let mut msg = msg.clone();
            if msg.role != Role::Assistant {
                return msg;
            }
            let Some(tool_calls) = msg.tool_calls.as_mut() else {
                return msg;
            };
            if let Some(call) = tool_calls.first_mut().filter(|c| !c.has_signature()) {
                call.thought_signature = Some(SKIP_SIGNATURE_VALIDATION.to_string());
                tracing::debug!(
                    tool = call.function.as_ref().map_or("unknown", |f| f.name.as_str()),
                    "Injected placeholder thought_signature"
                );
            }
            msg
        })
        .collect()
}
