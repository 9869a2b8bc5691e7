//! Request lifecycle: route selection, the upstream call, and SSE emission.
//!
//! Both streaming routes share one pipeline. The upstream call and every chunk
//! fetch run under [`with_keepalive`], and each chunk goes through
//! [`StreamTranslator`]. The only difference is how a chunk becomes output:
//! a native chunk is re-emitted one-for-one, while the single full response of
//! the simulated route is spread over role, content and finish chunks.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::UpstreamError;
use crate::keepalive::{with_keepalive, Tick};
use crate::providers::is_quirk_provider;
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::to_upstream_params;
use crate::translate::response::{extract_delta, to_chat_response};
use crate::translate::streaming::{sse_data, StreamTranslator, SSE_DONE, SSE_PING};
use crate::translate::upstream_types::UpstreamCompletion;
use crate::upstream::{ChunkStream, Runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    NonStream,
    DirectStream,
    /// The provider cannot stream while tools are attached: one non-streaming
    /// call, re-emitted as a short synthetic stream.
    SimulatedStream,
}

impl Route {
    pub fn select(req: &ChatCompletionRequest) -> Self {
        if !req.stream {
            Self::NonStream
        } else if is_quirk_provider(&req.model) && req.has_tools() {
            Self::SimulatedStream
        } else {
            Self::DirectStream
        }
    }

    /// Whether the upstream call itself streams.
    pub fn upstream_streams(self) -> bool {
        self == Self::DirectStream
    }
}

/// Run a non-streaming request to completion.
pub async fn complete(
    runner: &Runner,
    req: &ChatCompletionRequest,
) -> Result<ChatCompletionResponse, UpstreamError> {
    let params = to_upstream_params(req, false);
    let upstream = runner.create_completion(params).await?.into_full()?;
    Ok(to_chat_response(
        &upstream,
        &req.model,
        chrono::Utc::now().timestamp(),
    ))
}

/// Run a streaming request, producing SSE-framed bytes.
///
/// The sequence ends with `data: [DONE]` on success. An upstream failure is
/// emitted as one `data: {"error": ..}` event and ends the sequence without the
/// sentinel. Dropping the stream cancels the upstream call.
pub fn stream(
    runner: Runner,
    req: ChatCompletionRequest,
    keepalive: Duration,
) -> impl Stream<Item = Bytes> + Send {
    let route = Route::select(&req);
    let params = to_upstream_params(&req, route.upstream_streams());
    let model = req.model;

    tracing::info!(
        model = %model,
        route = ?route,
        keepalive_secs = keepalive.as_secs_f64(),
        "Starting stream"
    );

    let chunks = stream::once(async move { runner.create_completion(params).await }).flat_map(
        |result| -> ChunkStream {
            match result {
                Ok(completion) => completion.into_stream(),
                Err(e) => Box::pin(stream::once(async move { Err::<UpstreamCompletion, _>(e) })),
            }
        },
    );

    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        let ticks = with_keepalive(chunks, keepalive);
        tokio::pin!(ticks);

        while let Some(tick) = ticks.next().await {
            let chunk = match tick {
                Tick::Idle => {
                    tracing::debug!(chunks = translator.chunk_count(), "Sending keepalive ping");
                    yield Bytes::from_static(SSE_PING.as_bytes());
                    continue;
                }
                Tick::Item(Ok(chunk)) => chunk,
                Tick::Item(Err(e)) => {
                    tracing::error!(
                        model = %model,
                        chunks = translator.chunk_count(),
                        error = %e,
                        "Upstream error during streaming"
                    );
                    yield sse_data(&e.to_sse_payload());
                    return;
                }
            };

            let parts = extract_delta(&chunk);
            let out = match route {
                Route::SimulatedStream => translator.synthesize(parts),
                Route::DirectStream | Route::NonStream => vec![translator.process(parts)],
            };
            for chunk in out {
                yield sse_data(&chunk);
            }
        }

        translator.finish();
        yield Bytes::from_static(SSE_DONE.as_bytes());
    }
}
