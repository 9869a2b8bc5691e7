use crate::config::ProxyConfig;
use crate::error::{ApiError, UpstreamError};
use crate::logging::sanitize_headers;
use crate::proxy;
use crate::translate::openai_types::ChatCompletionRequest;
use crate::upstream::Runner;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Creation timestamp reported for every registry model.
const MODELS_CREATED: i64 = 1_704_067_200;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub runner: Runner,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .route("/health/dedalus", get(handle_upstream_health))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    tracing::info!(
        model = %req.model,
        stream = req.stream,
        messages = req.messages.len(),
        tools = req.tool_count(),
        "Chat completion request"
    );

    if req.stream {
        let keepalive = state.config.keepalive_interval();
        return sse_response(proxy::stream(state.runner.clone(), req, keepalive));
    }

    match proxy::complete(&state.runner, &req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            tracing::error!(model = %req.model, error = %e, "Chat completion failed");
            ApiError::from(&e).into_response()
        }
    }
}

/// Deserialize the request body, reporting failures as 422 validation errors.
fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        let kind = match e.classify() {
            serde_json::error::Category::Data => "value_error",
            _ => "json_invalid",
        };
        tracing::warn!(error = %e, "Invalid chat completion request");
        ApiError::validation(json!([{
            "loc": ["body"],
            "msg": e.to_string(),
            "type": kind,
        }]))
    })
}

fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    let body = Body::from_stream(events.map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build SSE response");
            ApiError::internal().into_response()
        })
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .config
        .models
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": MODELS_CREATED,
                "owned_by": "dedalus",
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": models }))
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_upstream_health(State(state): State<Arc<AppState>>) -> Response {
    tracing::info!("Dedalus API health check initiated");

    match state.runner.verify_connection().await {
        Ok(_) => {
            tracing::info!("Dedalus API health check passed");
            Json(json!({
                "status": "ok",
                "service": "dedalus-api",
                "message": "API connection verified",
            }))
            .into_response()
        }
        Err(UpstreamError::Authentication) => {
            tracing::error!("Dedalus API authentication failed during health check");
            ApiError::new(StatusCode::UNAUTHORIZED, "Dedalus API authentication failed")
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Dedalus API connection failed during health check");
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Cannot connect to Dedalus API")
                .into_response()
        }
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::info!(
        %method,
        %path,
        headers = %sanitize_headers(request.headers()),
        "Request"
    );

    let start = Instant::now();
    let response = next.run(request).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Response"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_classifies_errors() {
        let err = parse_request(b"{not json").unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.details.as_ref().unwrap()[0]["type"], "json_invalid");

        let err = parse_request(br#"{"messages": []}"#).unwrap_err();
        let details = err.details.unwrap();
        assert_eq!(details[0]["type"], "value_error");
        assert_eq!(details[0]["loc"][0], "body");
        assert!(details[0]["msg"].as_str().unwrap().contains("model"));
    }

    #[test]
    fn test_parse_request_accepts_minimal_body() {
        let req = parse_request(br#"{"model": "openai/gpt-4", "messages": [{"role": "user", "content": "hi"}]}"#)
            .unwrap();
        assert_eq!(req.model, "openai/gpt-4");
        assert!(!req.stream);
    }
}
