//! Turn a client `ChatCompletionRequest` into the parameters of an upstream call.
//!
//! Pure functions: provider quirks are applied here, before the adapter resolves
//! token limits and builds the wire request.

use serde_json::{json, Value};

use super::openai_types::{ChatCompletionRequest, ToolChoice, ToolChoiceMode};
use crate::providers::{inject_continuation_signatures, is_quirk_provider, sanitize_tools};
use crate::upstream::UpstreamParams;

/// Map a tool choice to the upstream representation. `None` means "omit the field".
pub fn serialize_tool_choice(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => None,
        ToolChoice::Mode(ToolChoiceMode::None) => Some(json!({ "type": "none" })),
        ToolChoice::Mode(ToolChoiceMode::Required) => Some(json!({ "type": "any" })),
        ToolChoice::Function(function) => serde_json::to_value(function).ok(),
    }
}

/// Build upstream call parameters for `req`, with `stream` chosen by the orchestrator.
pub fn to_upstream_params(req: &ChatCompletionRequest, stream: bool) -> UpstreamParams {
    let quirky = is_quirk_provider(&req.model);

    let messages = if quirky {
        inject_continuation_signatures(&req.messages)
    } else {
        req.messages.clone()
    };

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|tools| {
            if quirky {
                tracing::debug!(count = tools.len(), "Sanitizing tools for Google API");
                sanitize_tools(tools)
            } else {
                tools.clone()
            }
        });

    UpstreamParams {
        model: req.model.clone(),
        messages,
        stream,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop.clone(),
        max_tokens: req.max_tokens,
        max_completion_tokens: req.max_completion_tokens,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(serialize_tool_choice),
        parallel_tool_calls: req.parallel_tool_calls,
        reasoning_effort: req.reasoning_effort.clone(),
        verbosity: req.verbosity.clone(),
    }
}
