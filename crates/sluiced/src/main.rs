//! sluiced — acknowledged HTTP-to-HTTP bridge daemon.
//!
//! Wires one HTTP input through the fan-out broker to every configured HTTP
//! output. Each POST is answered only once every output has had its say.

use std::time::Duration;

use anyhow::{Context, Result};

use sluice_broker::FanOut;
use sluice_core::config::BridgeConfig;
use sluice_core::{couple, Consumer, Metrics, Producer};
use sluice_io::{HttpClient, HttpServer};

mod status;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = BridgeConfig::write_default_if_missing().context("failed to seed config")?;
    let conf = BridgeConfig::load().context("failed to load config")?;
    tracing::info!(
        path = %config_path.display(),
        outputs = conf.outputs.len(),
        "config loaded"
    );

    anyhow::ensure!(
        !conf.outputs.is_empty(),
        "no outputs configured in {}",
        config_path.display()
    );

    let metrics = Metrics::new();

    let mut outputs: Vec<Box<dyn Consumer>> = Vec::with_capacity(conf.outputs.len());
    for output_conf in &conf.outputs {
        tracing::info!(url = %output_conf.url, "adding http output");
        outputs.push(Box::new(HttpClient::new(output_conf.clone())?));
    }

    let mut broker = FanOut::new(outputs, metrics.clone())?;
    let mut input = HttpServer::new(conf.input.clone());
    couple(&mut input, &mut broker)?;

    if conf.api.status_port != 0 {
        let state = status::StatusState {
            metrics: metrics.clone(),
        };
        let port = conf.api.status_port;
        tokio::spawn(async move {
            if let Err(err) = status::serve(state, port).await {
                tracing::error!(error = %err, "status endpoint failed");
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    // Input first: its message channel closing is the orderly end-of-stream
    // signal for everything downstream.
    input.close_async();
    if let Err(err) = input.wait_for_close(SHUTDOWN_TIMEOUT).await {
        tracing::warn!(error = %err, "http input did not close in time");
    }
    broker.close_async();
    if let Err(err) = broker.wait_for_close(SHUTDOWN_TIMEOUT).await {
        tracing::warn!(error = %err, "broker did not close in time");
    }

    tracing::info!("bridge stopped");
    Ok(())
}
