use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Default completion budget for tool-enabled requests that set no limit.
    #[serde(default = "default_tool_max_tokens")]
    pub tool_max_tokens: u64,
    /// Static registry served by `GET /v1/models`.
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: f64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_base_url() -> String {
    "https://api.dedaluslabs.ai".to_string()
}

fn default_api_key_env() -> String {
    "DEDALUS_API_KEY".to_string()
}

fn default_timeout_secs() -> f64 {
    300.0
}

fn default_max_retries() -> u32 {
    2
}

fn default_keepalive_interval_secs() -> f64 {
    15.0
}

fn default_tool_max_tokens() -> u64 {
    128_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream: UpstreamConfig::default(),
            streaming: StreamingConfig::default(),
            tool_max_tokens: default_tool_max_tokens(),
            models: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file, then apply environment overrides.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::load(path)?,
            None => match config_search_paths().into_iter().find(|p| p.exists()) {
                Some(candidate) => {
                    tracing::info!(path = %candidate.display(), "Loading config");
                    Self::load(&candidate)?
                }
                None => {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from the process environment (or any lookup in tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_env("PORT", &port)?;
        }
        if let Some(url) = lookup("DEDALUS_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Some(timeout) = lookup("REQUEST_TIMEOUT") {
            self.upstream.timeout_secs = parse_secs("REQUEST_TIMEOUT", &timeout)?;
        }
        if let Some(retries) = lookup("MAX_RETRIES") {
            self.upstream.max_retries = parse_env("MAX_RETRIES", &retries)?;
        }
        if let Some(interval) = lookup("STREAM_KEEPALIVE_INTERVAL") {
            self.streaming.keepalive_interval_secs =
                parse_secs("STREAM_KEEPALIVE_INTERVAL", &interval)?;
        }
        if let Some(tokens) = lookup("TOOL_MAX_TOKENS") {
            self.tool_max_tokens = parse_env("TOOL_MAX_TOKENS", &tokens)?;
        }
        Ok(())
    }

    /// Reject durations that are not finite and positive.
    pub fn validate(&self) -> Result<()> {
        check_secs("upstream.timeout_secs", self.upstream.timeout_secs)?;
        check_secs(
            "streaming.keepalive_interval_secs",
            self.streaming.keepalive_interval_secs,
        )?;
        Ok(())
    }

    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.upstream.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your Dedalus API key.",
                self.upstream.api_key_env
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.upstream.timeout_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_timeout_secs()))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.streaming.keepalive_interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_keepalive_interval_secs()))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ProxyError::config(format!("Invalid value for {key}: '{value}'")))
}

fn parse_secs(key: &str, value: &str) -> Result<f64> {
    let secs = parse_env(key, value)?;
    check_secs(key, secs)?;
    Ok(secs)
}

fn check_secs(key: &str, secs: f64) -> Result<f64> {
    if secs.is_finite() && secs > 0.0 {
        Ok(secs)
    } else {
        Err(ProxyError::config(format!(
            "{key} must be a positive number of seconds, got {secs}"
        )))
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("dedalus-proxy.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("dedalus-proxy").join("config.toml"));
    }
    if let Some(home) = dirs_path() {
        paths.push(home.join(".config").join("dedalus-proxy").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".dedalus-proxy.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
