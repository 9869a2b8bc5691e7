//! reqwest-backed [`ChatBackend`] speaking the Dedalus chat completions API.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;

use super::{ChatBackend, ChunkStream, Completion};
use crate::config::ProxyConfig;
use crate::error::UpstreamError;
use crate::translate::openai_types::ChatMessage;
use crate::translate::upstream_types::{UpstreamCompletion, UpstreamErrorBody, UpstreamRequest};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);
const VERIFY_MODEL: &str = "openai/gpt-4o-mini";
const MAX_ERROR_BODY: usize = 500;

pub struct DedalusClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
    http: OnceLock<reqwest::Client>,
}

impl DedalusClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(300),
            max_retries: 2,
            http: OnceLock::new(),
        }
    }

    pub fn from_config(config: &ProxyConfig, api_key: impl Into<String>) -> Self {
        Self::new(config.upstream.base_url.clone(), api_key)
            .with_timeout(config.request_timeout())
            .with_max_retries(config.upstream.max_retries)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Built on first use and shared by every call afterwards.
    fn http(&self) -> &reqwest::Client {
        self.http.get_or_init(|| {
            reqwest::Client::builder()
                .pool_idle_timeout(Some(Duration::from_secs(90)))
                .tcp_nodelay(true)
                .build()
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Failed to build HTTP client, using defaults");
                    reqwest::Client::new()
                })
        })
    }

    async fn send_once(&self, request: &UpstreamRequest) -> Result<reqwest::Response, UpstreamError> {
        let builder = self
            .http()
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(request);

        // Streams bound only the response head; the body may run longer.
        let sent = if request.stream {
            tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| UpstreamError::Timeout)?
        } else {
            builder.timeout(self.timeout).send().await
        };
        let response = sent.map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_status(status.as_u16(), &body))
    }

    async fn send(&self, request: &UpstreamRequest) -> Result<reqwest::Response, UpstreamError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying Dedalus API call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(error = %err, attempts = attempt + 1, "Dedalus API call failed");
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl ChatBackend for DedalusClient {
    async fn chat_completion(&self, request: UpstreamRequest) -> Result<Completion, UpstreamError> {
        let response = self.send(&request).await?;

        if request.stream {
            return Ok(Completion::Stream(chunk_stream(response)));
        }

        let body = response.bytes().await.map_err(classify)?;
        let parsed: UpstreamCompletion = serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::decode(format!("invalid completion body: {e}")))?;
        Ok(Completion::Full(parsed))
    }

    async fn verify_connection(&self) -> Result<bool, UpstreamError> {
        let request = UpstreamRequest {
            model: VERIFY_MODEL.to_string(),
            messages: vec![ChatMessage::user("ping")],
            stream: false,
            temperature: None,
            max_tokens: Some(1),
            max_completion_tokens: None,
            top_p: None,
            stop: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            reasoning_effort: None,
            verbosity: None,
        };
        self.chat_completion(request).await?;
        Ok(true)
    }
}

/// Decode the SSE body into chunks. Stops at `[DONE]`, at an inline error
/// object, or at the first transport failure.
fn chunk_stream(response: reqwest::Response) -> ChunkStream {
    let mut events = Box::pin(response.bytes_stream().eventsource());

    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(EventStreamError::Transport(e)) => {
                    yield Err(classify(e));
                    break;
                }
                Err(e) => {
                    yield Err(UpstreamError::decode(e.to_string()));
                    break;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            if let Ok(body) = serde_json::from_str::<UpstreamErrorBody>(data) {
                let code = body
                    .error
                    .code
                    .as_ref()
                    .and_then(status_code_of)
                    .unwrap_or(500);
                tracing::warn!(code, message = %body.error.message, "Error inside upstream stream");
                yield Err(UpstreamError::status(code, body.error.message));
                break;
            }

            match serde_json::from_str::<UpstreamCompletion>(data) {
                Ok(chunk) => {
                    yield Ok(chunk);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unparseable stream chunk");
                }
            }
        }
    })
}

fn status_code_of(code: &serde_json::Value) -> Option<u16> {
    match code {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .filter(|code| (400..600).contains(code))
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::connection(err.to_string())
    }
}

fn error_from_status(code: u16, body: &str) -> UpstreamError {
    if code == 401 {
        return UpstreamError::Authentication;
    }
    let message = match serde_json::from_str::<UpstreamErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ if body.trim().is_empty() => format!("Dedalus API returned status {code}"),
        _ => body.chars().take(MAX_ERROR_BODY).collect(),
    };
    UpstreamError::status(code, message)
}

fn is_retryable(err: &UpstreamError) -> bool {
    match err {
        UpstreamError::Timeout | UpstreamError::Connection { .. } => true,
        UpstreamError::Status { code, .. } => matches!(code, 408 | 409 | 429 | 500..=599),
        UpstreamError::Authentication | UpstreamError::Decode { .. } => false,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    INITIAL_BACKOFF
        .saturating_mul(1u32 << attempt.min(16))
        .min(MAX_BACKOFF)
}
