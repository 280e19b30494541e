/// mDNS browser feeding the fleet manager's device registry.

use std::sync::Arc;

use mdns_sd::ServiceDaemon;

use stagebridge_protocol::device::DeviceRegistry;
use stagebridge_protocol::discovery::browse;

pub async fn run(registry: Arc<DeviceRegistry>) -> anyhow::Result<()> {
    let mdns = ServiceDaemon::new()?;
    // The fleet manager announces nothing, so every resolved service is a device
    browse(&mdns, &registry, None).await
}
