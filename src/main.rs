use anyhow::Context;
use clap::Parser;
use roxy::api::{serve, shutdown_signal};
use roxy::config::ConfigLoader;
use roxy::Gateway;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Chat completion routing gateway
#[derive(Debug, Parser)]
#[command(name = "roxy", version, about)]
struct Cli {
    /// Configuration file (searched in the default locations when omitted)
    #[arg(long, env = "ROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `listen_addr` from the configuration
    #[arg(long, env = "ROXY_LISTEN_ADDR")]
    listen: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ConfigLoader::new().context("failed to load configuration")?,
    };
    let mut config = loader.into_config();
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let gateway = Arc::new(Gateway::from_config(&config).context("failed to build gateway")?);
    info!(
        keys = gateway.credentials().len(),
        rules = gateway.routing().rules().len(),
        cache = gateway.cache().is_enabled(),
        "gateway ready"
    );

    let addr = config.bind_addr();
    serve(gateway, &addr, shutdown_signal())
        .await
        .with_context(|| format!("server on {} failed", addr))?;

    Ok(())
}
