//! Switchyard reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌───────────────┐   Message    ┌────────────┐  throttled   ┌──────────────┐
//!   │  providers    │─────────────▶│ aggregator │─────────────▶│  apply loop  │
//!   │ (file, ...)   │              └────────────┘   snapshot   │  load_config │
//!   └───────────────┘                                          └──────┬───────┘
//!                                                                     │ swap
//!                                                                     ▼
//!     Client Request    ┌─────────────┐    ┌──────────┐    ┌─────────────────────┐
//!     ─────────────────▶│ entry point │───▶│  router  │───▶│ middlewares         │
//!                       │ (http/tls)  │    │   tree   │    │ → load-balanced svc │──▶ Backend
//!                       └─────────────┘    └──────────┘    └─────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use switchyard::config::loader::load_config;
use switchyard::config::schema::FileProviderConfig;
use switchyard::config::watcher::FileProvider;
use switchyard::config::StaticConfiguration;
use switchyard::lifecycle::signals::wait_for_signal;
use switchyard::observability::{logging, metrics};
use switchyard::Server;

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Dynamically reconfigured reverse proxy")]
struct Cli {
    /// Static configuration file (TOML).
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Dynamic configuration file (TOML or JSON), watched for changes.
    /// Overrides `providers.file.path`.
    #[arg(short, long)]
    dynamic: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => StaticConfiguration::default(),
    };
    if let Some(path) = cli.dynamic {
        let watch = config.providers.file.as_ref().map_or(true, |f| f.watch);
        config.providers.file = Some(FileProviderConfig { path, watch });
    }

    logging::init_logging(&config.log)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    if config.metrics.enabled {
        metrics::init_metrics(config.metrics.address.parse()?)?;
    }

    tracing::info!(
        entry_points = ?config.entry_points.keys().collect::<Vec<_>>(),
        throttle_ms = config.providers.throttle_duration_ms,
        "Configuration loaded"
    );

    let file_provider = config.providers.file.clone();
    let mut server = Server::new(config);
    server.start().await?;

    // Keep the watcher alive for the lifetime of the process.
    let _watcher = match file_provider {
        Some(file) => FileProvider::new(&file, server.provider_sender())
            .provide()
            .await?,
        None => {
            tracing::warn!("No provider configured, every entry point will answer 404");
            None
        }
    };

    wait_for_signal().await;
    server.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
