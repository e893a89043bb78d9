//! # Manifold Node
//!
//! Runs one bus until Ctrl-C, then shuts down with a drain timeout.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from `MANIFOLD_*` environment variables
//! 2. Initialize logging and metrics
//! 3. Start the node runtime
//! 4. Wait for Ctrl-C and shut down gracefully

use anyhow::{Context, Result};
use tracing::info;

use manifold_node::{NodeConfig, NodeRuntime};
use manifold_telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::load().context("Invalid configuration")?;
    let _telemetry = init_telemetry(&config.telemetry)?;

    let runtime = NodeRuntime::start(config).await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
