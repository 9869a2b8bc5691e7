//! Upstream client adapter.
//!
//! [`ChatBackend`] is the opaque capability the proxy calls: "issue a chat
//! completion, get back a full response or a stream of chunks". [`Runner`] sits in
//! front of it and turns [`UpstreamParams`] into the wire request, choosing the
//! token-limit fields per model family. The runner never retries; retry and
//! timeouts belong to the backend.

pub mod client;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::error::UpstreamError;
use crate::providers::ProviderFamily;
use crate::translate::openai_types::{ChatMessage, StopSequences, Tool};
use crate::translate::upstream_types::{UpstreamCompletion, UpstreamRequest};

pub use self::client::DedalusClient;

/// Incremental chunks of a streamed completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<UpstreamCompletion, UpstreamError>> + Send>>;

/// What an upstream call produced.
pub enum Completion {
    Full(UpstreamCompletion),
    Stream(ChunkStream),
}

impl Completion {
    /// The full response of a non-streaming call.
    pub fn into_full(self) -> Result<UpstreamCompletion, UpstreamError> {
        match self {
            Self::Full(resp) => Ok(resp),
            Self::Stream(_) => Err(UpstreamError::decode(
                "expected a complete response, got a stream",
            )),
        }
    }

    /// The chunk stream of a streaming call. A full response becomes a one-item stream.
    pub fn into_stream(self) -> ChunkStream {
        match self {
            Self::Stream(s) => s,
            Self::Full(resp) => Box::pin(stream::once(async move { Ok::<_, UpstreamError>(resp) })),
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(resp) => f.debug_tuple("Full").field(resp).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The provider-facing capability.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a chat completion request. `request.stream` decides the result shape.
    async fn chat_completion(&self, request: UpstreamRequest) -> Result<Completion, UpstreamError>;

    /// Make the cheapest possible real call to prove credentials and connectivity.
    async fn verify_connection(&self) -> Result<bool, UpstreamError>;
}

/// Everything the adapter needs for one call, already provider-adjusted.
#[derive(Debug, Clone)]
pub struct UpstreamParams {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Option<StopSequences>,
    pub max_tokens: Option<u64>,
    pub max_completion_tokens: Option<u64>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<serde_json::Value>,
    pub parallel_tool_calls: Option<bool>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

/// Pick the completion budget: `max_completion_tokens` wins over `max_tokens`;
/// tool-enabled calls with neither get `tool_default`.
pub fn resolve_max_tokens(
    max_completion_tokens: Option<u64>,
    max_tokens: Option<u64>,
    has_tools: bool,
    tool_default: u64,
) -> Option<u64> {
    max_completion_tokens
        .or(max_tokens)
        .or_else(|| has_tools.then_some(tool_default))
}

#[derive(Clone)]
pub struct Runner {
    backend: Arc<dyn ChatBackend>,
    tool_max_tokens: u64,
}

impl Runner {
    pub fn new(backend: Arc<dyn ChatBackend>, tool_max_tokens: u64) -> Self {
        Self {
            backend,
            tool_max_tokens,
        }
    }

    /// Build the wire request for `params`.
    pub fn build_request(&self, params: UpstreamParams) -> UpstreamRequest {
        let has_tools = params.tools.is_some();
        let resolved = resolve_max_tokens(
            params.max_completion_tokens,
            params.max_tokens,
            has_tools,
            self.tool_max_tokens,
        );

        if has_tools && params.max_completion_tokens.is_none() && params.max_tokens.is_none() {
            tracing::info!(max_tokens = self.tool_max_tokens, "Setting max_tokens for tool-enabled request");
        }

        let (max_tokens, max_completion_tokens) = match ProviderFamily::from_model(&params.model) {
            ProviderFamily::OpenAi => (None, resolved),
            ProviderFamily::Google | ProviderFamily::Other => (resolved, resolved),
        };

        UpstreamRequest {
            model: params.model,
            messages: params.messages,
            stream: params.stream,
            temperature: params.temperature,
            max_tokens,
            max_completion_tokens,
            top_p: params.top_p,
            stop: params.stop,
            tools: params.tools,
            tool_choice: params.tool_choice,
            parallel_tool_calls: params.parallel_tool_calls,
            reasoning_effort: params.reasoning_effort,
            verbosity: params.verbosity,
        }
    }

    /// Issue one upstream call. Errors come back exactly as the backend reported them.
    pub async fn create_completion(&self, params: UpstreamParams) -> Result<Completion, UpstreamError> {
        let request = self.build_request(params);

        tracing::info!(
            model = %request.model,
            stream = request.stream,
            max_tokens = ?request.max_tokens.or(request.max_completion_tokens),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Dedalus API call"
        );

        self.backend.chat_completion(request).await
    }

    pub async fn verify_connection(&self) -> Result<bool, UpstreamError> {
        self.backend.verify_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    struct NullBackend;

    #[async_trait]
    impl ChatBackend for NullBackend {
        async fn chat_completion(&self, request: UpstreamRequest) -> Result<Completion, UpstreamError> {
            Ok(Completion::Full(UpstreamCompletion {
                model: Some(request.model),
                ..UpstreamCompletion::default()
            }))
        }

        async fn verify_connection(&self) -> Result<bool, UpstreamError> {
            Ok(true)
        }
    }

    fn params(model: &str) -> UpstreamParams {
        UpstreamParams {
            model: model.to_string(),
            messages: Vec::new(),
            stream: false,
            temperature: Some(0.2),
            top_p: None,
            stop: None,
            max_tokens: None,
            max_completion_tokens: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            reasoning_effort: None,
            verbosity: None,
        }
    }

    fn runner() -> Runner {
        Runner::new(Arc::new(NullBackend), 128_000)
    }

    fn one_tool() -> Vec<Tool> {
        serde_json::from_value(json!([{"type": "function", "function": {"name": "f"}}])).unwrap()
    }

    #[test]
    fn test_resolve_max_tokens_precedence() {
        assert_eq!(resolve_max_tokens(Some(5), Some(9), true, 100), Some(5));
        assert_eq!(resolve_max_tokens(None, Some(9), true, 100), Some(9));
        assert_eq!(resolve_max_tokens(None, None, true, 100), Some(100));
        assert_eq!(resolve_max_tokens(None, None, false, 100), None);
    }

    #[test]
    fn test_openai_family_gets_completion_field_only() {
        let mut p = params("openai/gpt-4o");
        p.max_tokens = Some(300);
        let req = runner().build_request(p);
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.max_completion_tokens, Some(300));
    }

    #[test]
    fn test_other_families_get_both_fields() {
        let mut p = params("anthropic/claude-sonnet-4");
        p.max_completion_tokens = Some(42);
        p.max_tokens = Some(7);
        let req = runner().build_request(p);
        assert_eq!(req.max_tokens, Some(42));
        assert_eq!(req.max_completion_tokens, Some(42));
    }

    #[test]
    fn test_tool_default_applied() {
        let mut p = params("google/gemini-2.5-pro");
        p.tools = Some(one_tool());
        let req = runner().build_request(p);
        assert_eq!(req.max_tokens, Some(128_000));
        assert_eq!(req.max_completion_tokens, Some(128_000));
    }

    #[test]
    fn test_no_limit_without_tools() {
        let req = runner().build_request(params("openai/gpt-4o"));
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.max_completion_tokens, None);
        assert_eq!(req.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_create_completion_reaches_backend() {
        let completion = runner().create_completion(params("openai/gpt-4")).await.unwrap();
        let full = completion.into_full().unwrap();
        assert_eq!(full.model.as_deref(), Some("openai/gpt-4"));
    }

    #[tokio::test]
    async fn test_full_completion_as_stream() {
        let completion = Completion::Full(UpstreamCompletion::default());
        let items: Vec<_> = completion.into_stream().collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[test]
    fn test_stream_is_not_a_full_response() {
        let completion = Completion::Stream(Box::pin(stream::empty::<Result<UpstreamCompletion, UpstreamError>>()));
        tokio_test::assert_err!(completion.into_full());
    }
}
