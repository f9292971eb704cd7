//! Health endpoint (SPEC_FULL.md §2 Ambient Stack), grounded on the
//! teacher's `health.rs`: an `axum` server exposing the Metadata Store's
//! status snapshot plus the active-sync-task count, narrowed to the
//! Postgres-only backend this crate ships.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::metadata::{MetadataError, MetadataStore, Status};
use crate::system_state::{active_sync_task_count, is_running};

#[derive(Clone)]
pub struct HealthServerState {
    metadata: Arc<MetadataStore>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub is_running: bool,
    pub active_sync_tasks: usize,
    pub status: Status,
}

async fn health_handler(State(state): State<HealthServerState>) -> Json<HealthResponse> {
    let status = state.metadata.get_status().await.unwrap_or_default();
    Json(HealthResponse { is_running: is_running(), active_sync_tasks: active_sync_task_count(), status })
}

pub fn router(metadata: Arc<MetadataStore>) -> Router {
    Router::new().route("/health", get(health_handler)).with_state(HealthServerState { metadata })
}

pub async fn serve(metadata: Arc<MetadataStore>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let app = router(metadata);
    info!(%addr, "health server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[allow(dead_code)]
fn map_metadata_error(error: MetadataError) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes_expected_shape() {
        let response = HealthResponse { is_running: true, active_sync_tasks: 2, status: Status::new() };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["is_running"], true);
        assert_eq!(json["active_sync_tasks"], 2);
    }
}
