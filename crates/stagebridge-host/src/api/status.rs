use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::midi_io::{list_ports, MidiPorts};

use super::AppState;

pub async fn get_status(State(ctx): State<AppState>) -> Json<Value> {
    let relay_mode = ctx.config.read().await.relay_mode();

    Json(json!({
        "status": "ok",
        "service": "stagebridge",
        "version": env!("CARGO_PKG_VERSION"),
        "device_name": ctx.device_name,
        "uptime_seconds": ctx.uptime_secs(),
        "osc_port": ctx.osc_listen_port,
        "midi_output": ctx.midi.output_name(),
        "midi_input": ctx.midi_input_name,
        "relay_mode": relay_mode.to_string(),
        "discovered_devices": ctx.registry.len().await,
        "mappings": ctx.mappings.len().await,
    }))
}

pub async fn get_devices(State(ctx): State<AppState>) -> Json<Value> {
    let devices = ctx.registry.snapshot().await;
    Json(json!({ "devices": devices }))
}

/// GET /api/midi-ports: ports that can go in `midi_input_name` / `midi_output_name`.
pub async fn get_midi_ports() -> Json<MidiPorts> {
    Json(list_ports())
}
