use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::netif::primary_ipv4;

use super::AppState;

/// GET /api/system/ip: address peers and the fleet manager should use.
pub async fn get_ip() -> Json<Value> {
    let ip = primary_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    Json(json!({ "ip": ip }))
}

/// POST /api/system/restart: answer first, then end the process so the
/// supervisor starts it again with the saved config.
pub async fn restart(State(ctx): State<AppState>) -> Json<Value> {
    info!("Restart requested via API");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.restart.notify_one();
    });

    Json(json!({
        "success": true,
        "message": "Restarting StageBridge service",
    }))
}
