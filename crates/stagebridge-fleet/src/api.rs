use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use stagebridge_protocol::device::DeviceRegistry;

use crate::sync::{sync_all, SyncTarget};

pub struct FleetState {
    pub registry: Arc<DeviceRegistry>,
    pub client: reqwest::Client,
}

pub type AppState = Arc<FleetState>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/devices", get(get_devices))
        .route("/api/sync", post(sync_devices))
        .with_state(state)
}

/// GET /api/devices: currently discovered devices.
async fn get_devices(State(state): State<AppState>) -> Json<Value> {
    let devices = state.registry.snapshot().await;
    Json(json!(devices))
}

/// POST /api/sync: point every device at one RTP-MIDI target and restart it.
async fn sync_devices(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let target = SyncTarget::from_json(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    let devices = state.registry.snapshot().await;
    info!(
        devices = devices.len(),
        rtp_ip = %target.rtp_ip,
        rtp_port = target.rtp_port,
        "Syncing fleet"
    );

    let results = sync_all(&state.client, devices, &target).await;
    Ok(Json(json!(results)))
}
