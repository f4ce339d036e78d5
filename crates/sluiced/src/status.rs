//! Status endpoint — exposes the bridge counters as JSON on loopback.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;

use sluice_core::{Metrics, MetricsSnapshot};

#[derive(Clone)]
pub struct StatusState {
    pub metrics: Metrics,
}

async fn handle_status(State(state): State<StatusState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/status", get(handle_status))
        .with_state(state);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}
