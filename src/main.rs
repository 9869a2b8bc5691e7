use clap::Parser;
use dedalus_proxy::config::config_search_paths;
use dedalus_proxy::logging::init_tracing;
use dedalus_proxy::{build_router, AppState, DedalusClient, ProxyConfig, Runner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "dedalus-proxy",
    about = "OpenAI-compatible chat completions proxy for the Dedalus Labs API",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warning", "error"])]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let api_key = config.resolve_api_key()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.upstream.base_url,
        timeout_secs = config.upstream.timeout_secs,
        max_retries = config.upstream.max_retries,
        keepalive_secs = config.streaming.keepalive_interval_secs,
        models = config.models.len(),
        "Starting dedalus-proxy"
    );

    let client = DedalusClient::from_config(&config, api_key);
    let runner = Runner::new(Arc::new(client), config.tool_max_tokens);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState { config, runner });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://{}/v1", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
