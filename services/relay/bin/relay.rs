//! Main Entrypoint for the Assistant Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Running the relay until the script ends or Ctrl+C is pressed.

use anyhow::Context;
use assistant_relay::{config::Config, relay};
use tracing::info;

/// Listens for the `Ctrl+C` signal to shut down gracefully.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(script = %config.script_path.display(), "Configuration loaded. Starting relay...");

    // --- 3. Run ---
    let summary = relay::run(config, shutdown_signal()).await?;
    info!(
        conversations = summary.conversations,
        errors = summary.errors,
        "Relay has shut down."
    );
    Ok(())
}
