//! Real-time sample routing gateway
//!
//! # Architecture
//! - **core**: Records, mappings and source sets
//! - **nodes**: Endpoints records are read from and written to
//! - **hooks**: Per-path transformation pipeline
//! - **hot_path**: Paths, their sources and destinations, the poll worker
//! - **infrastructure**: Queues and pools, plus cold path (logging, metrics, config, api)

use anyhow::Context;
use rt_gateway::infrastructure::logging::init_logging;
use rt_gateway::infrastructure::{start_server, AppState};
use rt_gateway::{Config, Gateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let _guards = init_logging(&config.gateway.log_dir)
        .with_context(|| format!("failed to set up logging in {}", config.gateway.log_dir.display()))?;

    tracing::info!("Starting gateway...");

    let mut gateway = Gateway::from_config(&config).context("invalid gateway configuration")?;
    gateway.start().context("failed to start gateway")?;
    let gateway = Arc::new(RwLock::new(gateway));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // API Server (Cold Path)
    if config.api.enabled {
        let state = AppState::new(gateway.clone(), shutdown_tx.clone());
        let api_config = config.api.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(state, &api_config).await {
                tracing::error!("API Server failed: {}", e);
            }
        });
    }

    let interval = Duration::from_secs_f64(config.gateway.hook_interval.max(0.01));
    let mut ticker = tokio::time::interval(interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => gateway.read().await.periodic(),
            _ = &mut ctrl_c => {
                tracing::info!("Received interrupt, shutting down");
                break;
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
        }
    }

    shutdown_tx.send_replace(true);
    gateway.write().await.stop();
    tracing::info!("Gateway stopped");

    Ok(())
}
