mod app;
mod config;
mod middleware;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use readwise_api::{ReadwiseClient, ReadwiseTools, tool_catalog};
use readwise_mcp::{AuthGate, McpServer, McpServerConfig, SERVICE_NAME, StreamTracker};
use readwise_otel::TracingInitOptions;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::config::{Args, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    readwise_otel::init_tracing(TracingInitOptions {
        service_name: "readwise-mcp-server",
        service_version: env!("CARGO_PKG_VERSION"),
        default_env_filter: "info,hyper=warn,reqwest=warn",
    })?;

    let settings = match Settings::from_args(Args::parse()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e);
        }
    };

    let gate = AuthGate::new(settings.api_key.clone());
    if !gate.is_enabled() {
        warn!("MCP_API_KEY is not set; /mcp and /sse accept unauthenticated requests");
    }

    let client = ReadwiseClient::new(settings.readwise.clone()).context("build readwise client")?;
    let catalog = tool_catalog();
    info!(
        tools = catalog.len(),
        upstream = %settings.readwise.base_url,
        keepalive_secs = settings.sse_keepalive.as_secs(),
        "readwise tools loaded"
    );

    let server = McpServer::new(
        McpServerConfig::new(SERVICE_NAME, env!("CARGO_PKG_VERSION"), catalog),
        Arc::new(ReadwiseTools::new(client)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        server,
        gate: Arc::new(gate),
        streams: StreamTracker::new(),
        sse_keepalive: settings.sse_keepalive,
        shutdown: shutdown_rx,
    };

    app::serve_tcp(settings.addr, state, shutdown_tx).await
}
