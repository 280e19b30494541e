use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use stagebridge_protocol::config::{config_to_toml, parse_config_file};

use super::{ApiError, AppState};

/// GET /api/config
pub async fn get_config(State(ctx): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = ctx.config.read().await;
    Ok(Json(serde_json::to_value(&*config).map_err(anyhow::Error::from)?))
}

/// PUT /api/config: merge the supplied top-level keys and persist.
/// Listener ports, MIDI ports and the RTP target take effect on restart.
pub async fn update_config(
    State(ctx): State<AppState>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let mappings = ctx
        .update_config(|config| {
            let merged = config
                .merged_with(&patch)
                .map_err(|e| ApiError::bad_request(format!("Invalid config: {}", e)))?;
            *config = merged;
            Ok::<_, ApiError>(config.osc_mappings.len())
        })
        .await?;

    info!(mappings, "Configuration updated via API");

    Ok(Json(json!({
        "success": true,
        "message": "Configuration saved. Restart to apply network and MIDI changes.",
    })))
}

/// GET /api/config/download: the live config as a TOML attachment.
pub async fn download_config(State(ctx): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let contents = config_to_toml(&*ctx.config.read().await)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/toml; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"stagebridge.toml\""),
        ],
        contents,
    ))
}

/// POST /api/config/upload: replace the whole config with the file in the
/// request body (TOML, or JSON).
pub async fn upload_config(
    State(ctx): State<AppState>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::bad_request("No config file supplied"));
    }
    let uploaded = parse_config_file(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid config file: {}", e)))?;

    let mappings = ctx
        .update_config(|config| {
            *config = uploaded;
            Ok::<_, ApiError>(config.osc_mappings.len())
        })
        .await?;

    info!(mappings, "Configuration replaced by upload");

    Ok(Json(json!({
        "success": true,
        "message": "Configuration uploaded. Restart to apply network and MIDI changes.",
        "mappings": mappings,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;

    use stagebridge_protocol::config::{load_config, BridgeConfig};

    use crate::context::{new_mapping_id, BridgeContext};
    use crate::midi_dispatch::MidiDispatcher;

    fn context() -> (AppState, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("stagebridge-api-{}", new_mapping_id()));
        let ctx = BridgeContext::new(
            dir.join("stagebridge.toml"),
            BridgeConfig::default(),
            "StageBridge".to_string(),
            MidiDispatcher::new(None, Duration::from_millis(1)),
            None,
        );
        (Arc::new(ctx), dir)
    }

    const UPLOADED: &str = r#"
device_name = "Uploaded"
osc_server_port = 8000

[[osc_mappings]]
osc_address = "/patch/song/1"

[[osc_mappings.midi_sequence]]
type = "program_change"
channel = 1
program = 5
"#;

    #[tokio::test]
    async fn test_upload_replaces_and_persists_config() {
        let (ctx, dir) = context();

        let Json(resp) = upload_config(State(ctx.clone()), UPLOADED.to_string()).await.unwrap();

        assert_eq!(resp["mappings"], 1);
        assert_eq!(ctx.mappings.len().await, 1);
        let live = ctx.config.read().await.clone();
        assert_eq!(live.device_name, "Uploaded");
        assert!(live.osc_mappings[0].id.is_some());
        assert_eq!(load_config(&ctx.config_path).unwrap(), live);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bad_upload_leaves_config_alone() {
        let (ctx, dir) = context();

        for body in ["", "device_name = ", "{ \"osc_server_port\": \"high\" }"] {
            let err = upload_config(State(ctx.clone()), body.to_string()).await.unwrap_err();
            assert_eq!(err.0, StatusCode::BAD_REQUEST);
        }
        assert_eq!(*ctx.config.read().await, BridgeConfig::default());
        assert!(!ctx.config_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_download_is_toml_attachment() {
        let (ctx, dir) = context();
        upload_config(State(ctx.clone()), UPLOADED.to_string()).await.unwrap();

        let resp = download_config(State(ctx.clone())).await.unwrap().into_response();

        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment"));
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed = parse_config_file(std::str::from_utf8(&body).unwrap()).unwrap();
        assert_eq!(parsed, *ctx.config.read().await);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
