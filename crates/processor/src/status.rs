//! Read-only HTTP status endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::sequencer::Sequencer;

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub time: DateTime<Utc>,
    pub event_t: Option<u64>,
    pub pending: usize,
}

pub fn router(sequencer: Arc<Sequencer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(sequencer)
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn status(State(sequencer): State<Arc<Sequencer>>) -> Json<StatusBody> {
    let snapshot = sequencer.snapshot();
    Json(StatusBody {
        time: Utc::now(),
        event_t: snapshot.event_t,
        pending: snapshot.pending,
    })
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(addr: SocketAddr, sequencer: Arc<Sequencer>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status endpoint on {addr}"))?;
    info!(addr = %listener.local_addr()?, "status endpoint listening");
    axum::serve(listener, router(sequencer))
        .await
        .context("status endpoint failed")
}
