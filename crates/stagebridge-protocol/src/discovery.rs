/// Browsing for StageBridge services and mirroring them into a registry.
///
/// Shared by the bridge daemon (which also announces itself) and the fleet
/// manager (which only listens). The registry is keyed by host name, but
/// removal events only carry the service instance name, so the tracker keeps
/// a map between the two.

use std::collections::HashMap;
use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, error, info, warn};

use crate::device::{Device, DeviceRegistry};
use crate::{MDNS_SERVICE_TYPE, PROTOCOL_VERSION};

/// Registry entry for a resolved service. IPv4 preferred.
pub fn device_from_service(info: &ServiceInfo) -> Option<Device> {
    let addresses = info.get_addresses();
    let ip: IpAddr = addresses
        .iter()
        .copied()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().copied().next())?;

    let properties = info.get_properties();
    let name = properties
        .get_property_val_str("name")
        .unwrap_or_else(|| info.get_fullname())
        .to_string();

    if let Some(ver) = properties.get_property_val_str("version") {
        if ver != PROTOCOL_VERSION {
            warn!(device = %name, version = %ver, ours = PROTOCOL_VERSION, "Device protocol version differs");
        }
    }

    Some(Device {
        name,
        host: info.get_hostname().to_string(),
        ip,
        port: info.get_port(),
        osc_port: properties
            .get_property_val_str("osc")
            .and_then(|s| s.parse().ok()),
    })
}

/// Turns browse events into registry upserts and removals.
#[derive(Debug, Default)]
pub struct RegistryTracker {
    /// Our own instance, never added to the registry
    own_fullname: Option<String>,
    hosts_by_fullname: HashMap<String, String>,
}

impl RegistryTracker {
    pub fn new(own_fullname: Option<String>) -> Self {
        Self {
            own_fullname,
            hosts_by_fullname: HashMap::new(),
        }
    }

    pub async fn apply(&mut self, event: ServiceEvent, registry: &DeviceRegistry) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                if self.own_fullname.as_deref() == Some(info.get_fullname()) {
                    return;
                }
                let Some(device) = device_from_service(&info) else {
                    debug!(name = %info.get_fullname(), "Resolved service without an address");
                    return;
                };
                self.hosts_by_fullname
                    .insert(info.get_fullname().to_string(), device.host.clone());
                let name = device.name.clone();
                let ip = device.ip;
                let port = device.port;
                if registry.upsert(device).await {
                    info!(device = %name, ip = %ip, port, "Discovered StageBridge device");
                } else {
                    debug!(device = %name, ip = %ip, port, "StageBridge device re-announced");
                }
            }
            ServiceEvent::ServiceRemoved(_service_type, fullname) => {
                let removed = match self.hosts_by_fullname.remove(&fullname) {
                    Some(host) => registry.remove(&host).await,
                    None => None,
                };
                match removed {
                    Some(device) => info!(device = %device.name, "StageBridge device disconnected"),
                    None => debug!(name = %fullname, "Device went away (not in current list)"),
                }
            }
            ServiceEvent::SearchStarted(service_type) => {
                debug!(service_type = %service_type, "mDNS search started");
            }
            other => debug!(event = ?other, "mDNS event"),
        }
    }
}

/// Browse until the daemon's channel closes, keeping `registry` current.
pub async fn browse(
    mdns: &ServiceDaemon,
    registry: &DeviceRegistry,
    own_fullname: Option<String>,
) -> anyhow::Result<()> {
    let receiver = mdns.browse(MDNS_SERVICE_TYPE)?;
    info!(service_type = MDNS_SERVICE_TYPE, "Browsing for StageBridge devices via mDNS");

    let mut tracker = RegistryTracker::new(own_fullname);
    loop {
        match receiver.recv_async().await {
            Ok(event) => tracker.apply(event, registry).await,
            Err(e) => {
                error!("mDNS browse channel closed: {}", e);
                return Err(anyhow::anyhow!("mDNS browse channel closed unexpectedly"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(instance: &str, host: &str, ip: &str, props: &[(&str, &str)]) -> ServiceInfo {
        let properties: HashMap<String, String> = props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceInfo::new(MDNS_SERVICE_TYPE, instance, host, ip, 3001, properties).unwrap()
    }

    #[test]
    fn test_device_from_txt_record() {
        let device = device_from_service(&service(
            "Stage Left",
            "stage-left.local.",
            "192.168.1.40",
            &[("name", "Stage Left"), ("version", "1.0"), ("osc", "9001")],
        ))
        .unwrap();

        assert_eq!(device.name, "Stage Left");
        assert_eq!(device.host, "stage-left.local.");
        assert_eq!(device.ip, "192.168.1.40".parse::<IpAddr>().unwrap());
        assert_eq!(device.port, 3001);
        assert_eq!(device.osc_port, Some(9001));
    }

    #[test]
    fn test_missing_txt_fields() {
        let info = service("Stage Left", "stage-left.local.", "192.168.1.40", &[]);
        let device = device_from_service(&info).unwrap();
        assert_eq!(device.name, info.get_fullname());
        assert_eq!(device.osc_port, None);

        let no_addr = service("Stage Left", "stage-left.local.", "", &[]);
        assert!(device_from_service(&no_addr).is_none());
    }

    #[tokio::test]
    async fn test_tracker_follows_resolve_and_remove() {
        let registry = DeviceRegistry::new();
        let own = service("Self", "self.local.", "192.168.1.10", &[("name", "Self")]);
        let peer = service("Stage Right", "stage-right.local.", "192.168.1.41", &[("name", "Stage Right")]);
        let peer_fullname = peer.get_fullname().to_string();
        let mut tracker = RegistryTracker::new(Some(own.get_fullname().to_string()));

        tracker.apply(ServiceEvent::ServiceResolved(own), &registry).await;
        tracker.apply(ServiceEvent::ServiceResolved(peer), &registry).await;

        let devices = registry.snapshot().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].host, "stage-right.local.");

        tracker
            .apply(ServiceEvent::ServiceRemoved(MDNS_SERVICE_TYPE.to_string(), peer_fullname), &registry)
            .await;
        assert!(registry.is_empty().await);
    }
}
