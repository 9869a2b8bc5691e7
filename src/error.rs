//! Error types for the proxy.
//!
//! [`ProxyError`] covers startup and configuration failures, [`UpstreamError`] is the
//! closed set of failures the upstream adapter can report, and [`ApiError`] is what
//! the HTTP layer renders back to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failure kinds reported by the upstream client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("authentication failed")]
    Authentication,

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("upstream returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("unreadable upstream payload: {message}")]
    Decode { message: String },
}

impl UpstreamError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
        }
    }

    pub fn status(code: u16, msg: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Client-facing message, shared by the JSON and SSE error shapes.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication => "Authentication failed: Invalid API key".to_string(),
            Self::Timeout => {
                "Request timed out. Try reducing the complexity of your query.".to_string()
            }
            Self::Connection { message } => format!("Failed to connect to Dedalus API: {message}"),
            Self::Status { message, .. } => message.clone(),
            Self::Decode { .. } => "Internal server error".to_string(),
        }
    }

    /// In-band SSE error payload, sent once headers are already on the wire.
    pub fn to_sse_payload(&self) -> Value {
        match self {
            Self::Status { code, message } => json!({
                "error": { "message": message, "code": code.to_string() }
            }),
            other => json!({ "error": { "message": other.client_message() } }),
        }
    }
}

/// An HTTP error rendered as `{"error": {"message", "type", "details"?}}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_type: &'static str,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let error_type = if status == StatusCode::UNAUTHORIZED {
            "authentication_error"
        } else {
            "http_error"
        };
        Self {
            status,
            message: message.into(),
            error_type,
            details: None,
        }
    }

    pub fn validation(details: Value) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "Invalid request data".to_string(),
            error_type: "validation_error",
            details: Some(details),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_string(),
            error_type: "internal_error",
            details: None,
        }
    }

    pub fn body(&self) -> Value {
        let mut error = json!({
            "message": self.message,
            "type": self.error_type,
        });
        if let (Some(details), Some(obj)) = (&self.details, error.as_object_mut()) {
            obj.insert("details".to_string(), details.clone());
        }
        json!({ "error": error })
    }
}

impl From<&UpstreamError> for ApiError {
    fn from(err: &UpstreamError) -> Self {
        match err {
            UpstreamError::Authentication => {
                Self::new(StatusCode::UNAUTHORIZED, err.client_message())
            }
            UpstreamError::Timeout => Self::new(StatusCode::GATEWAY_TIMEOUT, err.client_message()),
            UpstreamError::Connection { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.client_message())
            }
            UpstreamError::Status { code, message } => match StatusCode::from_u16(*code) {
                Ok(status) => Self::new(status, message.clone()),
                Err(_) => Self::new(StatusCode::BAD_GATEWAY, message.clone()),
            },
            UpstreamError::Decode { .. } => Self::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}
