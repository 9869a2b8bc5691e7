pub mod config;
pub mod error;
pub mod keepalive;
pub mod logging;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod upstream;

pub use config::ProxyConfig;
pub use error::{ApiError, ProxyError, Result, UpstreamError};
pub use server::{build_router, AppState};
pub use upstream::{ChatBackend, Completion, DedalusClient, Runner};
