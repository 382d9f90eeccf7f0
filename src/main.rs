//! PT-STEM CLI
//!
//! Command-line front end for snapshot exports.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ptstem::cli::{commands, Cli};
use ptstem::config::Config;
use ptstem::service::ExportService;
use ptstem::surface::surface_from_config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("PT-STEM v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    // Dropped after the runtime's tasks; the bridge client must not be
    // dropped inside async code.
    let surface = surface_from_config(&config);
    let service_surface = Arc::clone(&surface);
    let outcome = runtime.block_on(async move {
        let service = ExportService::new(service_surface, &config);
        service.connect().await.map_err(|e| {
            if let Some(hint) = e.recovery_suggestion() {
                tracing::error!("{}", hint);
            }
            e
        })?;

        let outcome = commands::run(&service, cli.command).await;
        service.shutdown().await;
        outcome.context("command failed")
    });

    drop(runtime);
    drop(surface);
    outcome
}
