use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use scribed::{config::GatewayConfig, gateway, lsp::registry::LspRegistry, AppContext};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "scribed",
    about = "Scribe — browser-based code editor gateway daemon",
    version
)]
struct Args {
    /// WebSocket gateway port
    #[arg(long, default_value_t = 3000, env = "SCRIBED_PORT")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SCRIBED_LOG")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log.as_str())
        .compact()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        "scribed starting"
    );

    let config = Arc::new(GatewayConfig::new(args.port, args.log));
    let registry = Arc::new(LspRegistry::new());

    let ctx = Arc::new(AppContext {
        config,
        registry,
        started_at: std::time::Instant::now(),
    });

    gateway::run(ctx).await
}
