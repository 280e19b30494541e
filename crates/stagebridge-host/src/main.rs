mod api;
mod context;
mod dedup;
mod discovery;
mod mapping_table;
mod midi_dispatch;
mod midi_io;
mod netif;
mod osc_listener;
mod relay;
mod rtp_sender;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use stagebridge_protocol::config::{load_config, save_config, BridgeConfig};
use stagebridge_protocol::STEP_DELAY_MS;

use crate::context::{assign_mapping_ids, BridgeContext};
use crate::midi_dispatch::MidiDispatcher;
use crate::midi_io::{platform, MidiOutput};
use crate::netif::SystemInterfaces;
use crate::relay::RelayEngine;

#[derive(Parser, Debug)]
#[command(name = "stagebridge-host", about = "StageBridge OSC to MIDI bridge daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/stagebridge.toml", env = "STAGEBRIDGE_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration, writing defaults on first run
    let mut config = if args.config.exists() {
        load_config(&args.config).map_err(|e| {
            error!("Failed to load config {:?}: {}", args.config, e);
            e
        })?
    } else {
        info!(path = ?args.config, "No config file found, writing defaults");
        BridgeConfig::default()
    };
    let assigned = assign_mapping_ids(&mut config.osc_mappings);
    if assigned > 0 || !args.config.exists() {
        save_config(&args.config, &config)?;
    }

    let device_name = if config.device_name.trim().is_empty() {
        format!("StageBridge-{}", discovery::gethostname())
    } else {
        config.device_name.clone()
    };

    info!(
        device = %device_name,
        osc = %config.osc_listen_addr(),
        api = %config.api_listen,
        relay_mode = %config.relay_mode(),
        mappings = config.osc_mappings.len(),
        "StageBridge starting"
    );

    // MIDI ports: a missing port is not fatal, mapped actions are dropped instead
    let midi_output: Option<Arc<dyn MidiOutput>> = match config.midi_output_name.as_deref() {
        Some(name) => match platform::open_output(name) {
            Ok(out) => Some(Arc::from(out)),
            Err(e) => {
                warn!(device = %name, error = %e, "MIDI output unavailable");
                None
            }
        },
        None => {
            warn!("No MIDI output configured");
            None
        }
    };
    let midi_input = match config.midi_input_name.as_deref() {
        Some(name) => match platform::open_input(name) {
            Ok(input) => Some(input),
            Err(e) => {
                warn!(device = %name, error = %e, "MIDI input unavailable");
                None
            }
        },
        None => None,
    };

    let osc_addr = config.osc_listen_addr();
    let api_addr: SocketAddr = config
        .api_listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid api_listen '{}': {}", config.api_listen, e))?;
    let rtp_target = config.rtp_target();
    let midi_input_name = midi_input.as_ref().map(|i| i.name().to_string());

    let ctx = Arc::new(BridgeContext::new(
        args.config.clone(),
        config,
        device_name,
        MidiDispatcher::new(midi_output, Duration::from_millis(STEP_DELAY_MS)),
        midi_input_name,
    ));

    // Bind sockets up front; failing to bind either listener is fatal
    let osc_socket = osc_listener::bind(osc_addr).await?;
    let http_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP API on {}: {}", api_addr, e))?;
    let relay_socket: Arc<std::net::UdpSocket> = Arc::new(relay::create_relay_socket()?);

    // Spawn OSC listener
    let osc_handle = {
        let engine = Arc::new(RelayEngine::new(
            Arc::clone(&ctx),
            relay_socket.clone(),
            Arc::new(SystemInterfaces),
        ));
        tokio::spawn(async move {
            if let Err(e) = osc_listener::run(osc_socket, engine).await {
                error!("OSC listener error: {}", e);
            }
        })
    };

    // Spawn discovery
    let discovery_handle = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = discovery::run(ctx, api_addr.port()).await {
                error!("Discovery error: {}", e);
            }
        })
    };

    // Spawn RTP-MIDI sender (needs both an input port and a target)
    let rtp_handle = match (midi_input, rtp_target) {
        (Some(input), Some(target)) => {
            let sink = relay_socket.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = rtp_sender::run(input, sink, target).await {
                    error!("RTP-MIDI sender error: {}", e);
                }
            }))
        }
        (Some(_), None) => {
            info!("RTP-MIDI target not configured, MIDI input will not be forwarded");
            None
        }
        _ => None,
    };

    // Spawn HTTP API
    let api_handle = {
        let app = api::build_router(Arc::clone(&ctx));
        info!(addr = %api_addr, "HTTP API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, app).await {
                error!("HTTP API error: {}", e);
            }
        })
    };

    info!("StageBridge running");

    // Wait for shutdown signal or a restart request
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down...");
        }
        _ = ctx.restart.notified() => {
            info!("Restarting with saved configuration...");
        }
    }

    // Abort all tasks
    osc_handle.abort();
    discovery_handle.abort();
    if let Some(handle) = rtp_handle {
        handle.abort();
    }
    api_handle.abort();

    Ok(())
}
