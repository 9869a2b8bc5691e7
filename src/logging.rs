//! Tracing setup and redaction of sensitive values before they are logged.

use axum::http::HeaderMap;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &["api_key", "password", "token", "authorization", "bearer"];

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to this crate and
/// `tower_http`. `json` switches to one JSON object per line.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = normalize_level(level);
        EnvFilter::new(format!("dedalus_proxy={level},tower_http={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Map CLI level names onto tracing directives.
fn normalize_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace('-', "_");
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Copy of `value` with every sensitive object key's value replaced by [`REDACTED`].
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_value(v)
                    };
                    (k.clone(), v)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Header names and values as a JSON object, sensitive values redacted.
pub fn sanitize_headers(headers: &HeaderMap) -> Value {
    let map = headers
        .iter()
        .map(|(name, value)| {
            let shown = if is_sensitive_key(name.as_str()) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), Value::String(shown))
        })
        .collect::<Map<String, Value>>();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_sanitize_nested_value() {
        let input = json!({
            "model": "openai/gpt-4o",
            "api_key": "sk-live",
            "nested": {"Access_Token": "abc", "keep": 1},
            "list": [{"password": "p"}, "plain"]
        });
        let out = sanitize_value(&input);
        assert_eq!(out["model"], "openai/gpt-4o");
        assert_eq!(out["api_key"], REDACTED);
        assert_eq!(out["nested"]["Access_Token"], REDACTED);
        assert_eq!(out["nested"]["keep"], 1);
        assert_eq!(out["list"][0]["password"], REDACTED);
        assert_eq!(out["list"][1], "plain");
        // input untouched
        assert_eq!(input["api_key"], "sk-live");
    }

    #[test]
    fn test_sanitize_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-live"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", HeaderValue::from_static("k"));

        let out = sanitize_headers(&headers);
        assert_eq!(out["authorization"], REDACTED);
        assert_eq!(out["content-type"], "application/json");
        assert_eq!(out["x-api-key"], REDACTED);
    }

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("debug"), "debug");
        assert_eq!(normalize_level("bogus"), "info");
    }
}
