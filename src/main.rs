//! qrserve daemon entrypoint

use anyhow::Context;
use clap::Parser;
use qrserve::config::MetricsFormat;
use qrserve::{QrserveConfig, logging, server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "qrserve",
    version,
    about = "Local web service that turns text into QR-code PNGs"
)]
struct Cli {
    /// Configuration file (toml/yaml); `QRSERVE_*` variables apply on top of it. Without it, defaults are used.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the bind address (e.g. 0.0.0.0)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Override the listening port
    #[arg(long, short, value_name = "PORT")]
    port: Option<u16>,

    /// Directory saved QR codes are written to
    #[arg(long, value_name = "PATH")]
    save_dir: Option<PathBuf>,

    /// Enable metrics regardless of configuration file settings
    #[arg(long)]
    metrics: bool,

    /// Override the `/metrics` format (`json` or `prometheus`)
    #[arg(long, value_name = "FORMAT")]
    metrics_format: Option<MetricsFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        QrserveConfig::load(cli.config.as_deref()).context("Could not load configuration")?;

    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if let Some(dir) = cli.save_dir {
        config.storage.save_dir = Some(dir);
    }

    if cli.metrics {
        config.logging.metrics = true;
    }

    if let Some(format) = cli.metrics_format {
        config.logging.metrics_format = format;
        config.logging.metrics = true;
    }

    logging::install(&config.logging).context("Could not initialise logging")?;

    info!(address = %config.server.socket_address(), "Starting qrserve");
    server::start(config).await.context("Could not run server")?;

    Ok(())
}
