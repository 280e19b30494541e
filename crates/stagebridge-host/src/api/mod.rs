//! HTTP management API of the bridge daemon.

pub mod config;
pub mod mappings;
pub mod status;
pub mod system;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::context::BridgeContext;

pub type AppState = Arc<BridgeContext>;

/// Error response: `{"success": false, "error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub String);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "success": false, "error": self.1 }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Status
        .route("/api/status", get(status::get_status))
        .route("/api/devices", get(status::get_devices))
        .route("/api/midi-ports", get(status::get_midi_ports))
        // Configuration
        .route("/api/config", get(config::get_config).put(config::update_config))
        .route("/api/config/download", get(config::download_config))
        .route("/api/config/upload", post(config::upload_config))
        // Mappings
        .route(
            "/api/mappings",
            get(mappings::list_mappings)
                .post(mappings::add_mapping)
                .delete(mappings::delete_mappings),
        )
        .route("/api/mappings/upload-json", post(mappings::upload_json))
        .route(
            "/api/mappings/:id",
            put(mappings::update_mapping).delete(mappings::delete_mapping),
        )
        // System
        .route("/api/system/ip", get(system::get_ip))
        .route("/api/system/restart", post(system::restart))
        .with_state(state)
}
