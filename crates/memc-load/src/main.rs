//! memc-load - installed-apps batch loader

use anyhow::Result;
use clap::Parser;
use memc_common::logging::{init_logging, LogConfig, LogLevel};
use memc_load::cli::Cli;
use memc_load::codec::self_check;
use memc_load::controller::BatchController;
use memc_load::store::MemcacheConnector;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.wants_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .format(cli.log_format)
        .maybe_log_file(cli.log.clone())
        .build()
        .merge_env()?;
    let guard = init_logging(&log_config)?;

    if cli.test {
        match self_check() {
            Ok(checked) => {
                info!(samples = checked, "codec self-check passed");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "codec self-check failed");
                drop(guard);
                process::exit(1);
            }
        }
    }

    let config = cli.into_config()?;
    info!(config = %serde_json::to_string(&config)?, "memc-load started");

    let controller = BatchController::new(Arc::new(config), Arc::new(MemcacheConnector));
    match controller.run().await {
        Ok(summary) => {
            info!(summary = %serde_json::to_string(&summary)?, "memc-load finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "unexpected error, stopping");
            drop(guard);
            process::exit(1);
        }
    }
}
