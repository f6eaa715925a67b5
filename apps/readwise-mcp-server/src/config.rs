use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use readwise_api::ReadwiseClientOptions;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "readwise-mcp-server",
    version,
    about = "Readwise and Reader tools over MCP (JSON-RPC 2.0 on HTTP)"
)]
pub struct Args {
    /// Readwise access token used for every upstream call. Required.
    #[arg(long, env = "READWISE_TOKEN", hide_env_values = true)]
    pub readwise_token: Option<String>,

    /// Shared secret callers must present on /mcp and /sse. Unset disables auth.
    #[arg(long, env = "MCP_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on. Unparseable values fall back to 3000.
    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// Seconds between keep-alive comments on /sse.
    #[arg(long, env = "SSE_KEEPALIVE_SECS", default_value_t = 30)]
    pub sse_keepalive_secs: u64,

    /// Upstream API root.
    #[arg(long, env = "READWISE_BASE_URL", default_value = readwise_api::DEFAULT_BASE_URL)]
    pub readwise_base_url: String,

    /// Timeout for each upstream request, in seconds.
    #[arg(long, env = "READWISE_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,
}

/// Resolved startup configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub readwise: ReadwiseClientOptions,
    pub api_key: Option<String>,
    pub addr: SocketAddr,
    pub sse_keepalive: Duration,
}

impl Settings {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let Some(token) = non_empty(args.readwise_token) else {
            anyhow::bail!("READWISE_TOKEN is required (set the env var or pass --readwise-token)");
        };
        if args.sse_keepalive_secs == 0 {
            anyhow::bail!("SSE_KEEPALIVE_SECS must be greater than zero");
        }

        let mut readwise = ReadwiseClientOptions::new(token);
        readwise.base_url = args.readwise_base_url;
        readwise.timeout = Duration::from_secs(args.upstream_timeout_secs.max(1));

        Ok(Self {
            readwise,
            api_key: non_empty(args.api_key),
            addr: SocketAddr::new(args.host, parse_port(args.port.as_deref())),
            sse_keepalive: Duration::from_secs(args.sse_keepalive_secs),
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn parse_port(raw: Option<&str>) -> u16 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_PORT;
    };
    match raw.parse::<u16>() {
        Ok(p) => p,
        Err(_) => {
            warn!(port = %raw, default = DEFAULT_PORT, "unparseable PORT, using default");
            DEFAULT_PORT
        }
    }
}
