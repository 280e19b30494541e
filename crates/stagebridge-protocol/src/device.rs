/// Peer StageBridge devices learned from discovery announcements.
///
/// The registry is a locally cached, eventually consistent view: the last
/// announcement for a host wins, and a removal event drops the entry.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Fully qualified host name, the registry key
    pub host: String,
    pub ip: IpAddr,
    /// HTTP API port advertised by the service record
    pub port: u16,
    /// OSC listen port from the TXT record, if the device advertised one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_port: Option<u16>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `device.host`.
    /// Returns true if the host was not known before.
    pub async fn upsert(&self, device: Device) -> bool {
        let mut devices = self.devices.write().await;
        devices.insert(device.host.clone(), device).is_none()
    }

    pub async fn remove(&self, host: &str) -> Option<Device> {
        self.devices.write().await.remove(host)
    }

    /// Copy of all known devices, sorted by host for stable output.
    pub async fn snapshot(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        let mut list: Vec<Device> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.host.cmp(&b.host));
        list
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}
