use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use courier_config::SharedFeatureFlags;
use courier_server::metrics::init_metrics;
use courier_server::observability::{apply_logging_level, init_tracing_with_config};
use courier_server::{Services, load_config, resolve_config_path, shutdown_tracing};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Priority message queue, two-tier cache and audit trail service")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides COURIER_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level or filter directive (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();
    let (config_path, source) = resolve_config_path(cli.config.as_deref());

    let cfg = load_config(Some(Path::new(&config_path)))
        .with_context(|| format!("loading configuration from {config_path}"))?;

    init_tracing_with_config(&cfg.logging);
    if let Some(level) = &cli.log_level {
        apply_logging_level(level);
    }

    tracing::info!(
        path = %config_path,
        source = %source,
        redis = %cfg.redis.masked_url(),
        "Configuration loaded"
    );

    init_metrics(&cfg.metrics);

    let flags = SharedFeatureFlags::new(cfg.features.clone());
    let services = Services::new(cfg, Arc::new(flags));

    if let Err(e) = services.initialize().await {
        tracing::warn!(error = %e, "Continuing without a backing store");
    }

    tracing::info!("Courier running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    services.shutdown().await;
    shutdown_tracing();
    Ok(())
}
