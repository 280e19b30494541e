mod api;
mod discovery;
mod sync;

use std::future::IntoFuture;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stagebridge_protocol::device::DeviceRegistry;
use stagebridge_protocol::DEFAULT_FLEET_PORT;

use crate::api::FleetState;

#[derive(Parser, Debug)]
#[command(name = "stagebridge-fleet", about = "StageBridge fleet manager")]
struct Args {
    /// Listen address for the fleet API
    #[arg(short, long, default_value_t = format!("0.0.0.0:{}", DEFAULT_FLEET_PORT), env = "STAGEBRIDGE_FLEET_LISTEN")]
    listen: String,
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

    let registry = Arc::new(DeviceRegistry::new());

    // Spawn mDNS browser
    let discovery_handle = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = discovery::run(registry).await {
                error!("Discovery error: {}", e);
            }
        })
    };

    let state = Arc::new(FleetState {
        registry,
        client: sync::http_client(),
    });
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "Fleet manager listening");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result?;
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down...");
        }
    }

    discovery_handle.abort();

    Ok(())
}
