/// mDNS announcement and peer browsing.
///
/// We announce ourselves once at startup and then browse the same service
/// type, skipping our own instance.

use std::collections::HashMap;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::info;

use stagebridge_protocol::discovery::browse;
use stagebridge_protocol::{MDNS_SERVICE_TYPE, PROTOCOL_VERSION};

use crate::context::BridgeContext;

pub async fn run(ctx: Arc<BridgeContext>, api_port: u16) -> anyhow::Result<()> {
    let mdns = ServiceDaemon::new()?;

    let instance_name = ctx.device_name.clone();
    let own_fullname = format!("{}.{}", instance_name, MDNS_SERVICE_TYPE);

    let mut properties = HashMap::new();
    properties.insert("name".to_string(), ctx.device_name.clone());
    properties.insert("version".to_string(), PROTOCOL_VERSION.to_string());
    properties.insert("osc".to_string(), ctx.osc_listen_port.to_string());

    let service_info = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance_name,
        &format!("{}.local.", gethostname().to_lowercase()),
        "",
        api_port,
        properties,
    )?
    .enable_addr_auto();

    mdns.register(service_info)?;
    info!(
        instance = %instance_name,
        service_type = MDNS_SERVICE_TYPE,
        port = api_port,
        "mDNS service registered"
    );

    browse(&mdns, &ctx.registry, Some(own_fullname)).await
}

pub(crate) fn gethostname() -> String {
    #[cfg(unix)]
    {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "stagebridge".to_string())
    }
    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "stagebridge".to_string())
    }
    #[cfg(not(any(unix, windows)))]
    {
        "stagebridge".to_string()
    }
}
