/// Push an RTP-MIDI target to every known device.
///
/// Each device gets the same three calls: fetch its config, write back the
/// patched config, request a restart. Devices are synced concurrently with a
/// bounded number in flight, and every device reports a result.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use stagebridge_protocol::device::Device;
use stagebridge_protocol::error::BridgeError;

/// Per-request deadline for calls to a device
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Devices synced at the same time
pub const MAX_IN_FLIGHT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub rtp_ip: String,
    pub rtp_port: u16,
    pub osc_port: Option<u16>,
}

impl SyncTarget {
    /// Read `{rtp_ip, rtp_port, osc_port?}`. Ports may be numbers or numeric strings.
    pub fn from_json(body: &Value) -> Result<Self, BridgeError> {
        let rtp_ip = body
            .get("rtp_ip")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("rtp_ip", "missing or empty"))?;
        let rtp_port = body
            .get("rtp_port")
            .and_then(port_value)
            .ok_or_else(|| invalid("rtp_port", "missing or not a port number"))?;

        Ok(Self {
            rtp_ip: rtp_ip.to_string(),
            rtp_port,
            osc_port: body.get("osc_port").and_then(port_value),
        })
    }

    fn apply(&self, config: &mut Value) -> anyhow::Result<()> {
        let Some(fields) = config.as_object_mut() else {
            anyhow::bail!("device config is not a JSON object");
        };
        fields.insert("rtp_midi_target_ip".to_string(), Value::from(self.rtp_ip.clone()));
        fields.insert("rtp_midi_target_port".to_string(), Value::from(self.rtp_port));
        if let Some(port) = self.osc_port {
            fields.insert("osc_server_port".to_string(), Value::from(port));
        }
        Ok(())
    }
}

fn invalid(field: &str, problem: &str) -> BridgeError {
    BridgeError::InvalidRequest(format!("{} {}", field, problem))
}

fn port_value(v: &Value) -> Option<u16> {
    let port = match v {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    port.filter(|p| *p != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub name: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Sync every device. Results come back in the order of `devices`.
pub async fn sync_all(client: &reqwest::Client, devices: Vec<Device>, target: &SyncTarget) -> Vec<SyncResult> {
    let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut join_set = JoinSet::new();
    let names: Vec<String> = devices.iter().map(|d| d.name.clone()).collect();

    for (idx, device) in devices.into_iter().enumerate() {
        let client = client.clone();
        let target = target.clone();
        let permits = permits.clone();
        join_set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = sync_device(&client, &device, &target).await;
            (idx, result)
        });
    }

    let mut results: Vec<Option<anyhow::Result<()>>> = Vec::with_capacity(names.len());
    results.resize_with(names.len(), || None);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, result)) => results[idx] = Some(result),
            Err(e) => warn!(error = %e, "Sync task failed"),
        }
    }

    names
        .into_iter()
        .zip(results)
        .map(|(name, result)| match result {
            Some(Ok(())) => {
                info!(device = %name, "Successfully synced");
                SyncResult { name, status: SyncStatus::Success, reason: None }
            }
            Some(Err(e)) => {
                warn!(device = %name, error = %e, "Failed to sync");
                SyncResult { name, status: SyncStatus::Failure, reason: Some(e.to_string()) }
            }
            None => SyncResult {
                name,
                status: SyncStatus::Failure,
                reason: Some("sync task aborted".to_string()),
            },
        })
        .collect()
}

/// Fetch, patch, store, restart.
pub async fn sync_device(client: &reqwest::Client, device: &Device, target: &SyncTarget) -> anyhow::Result<()> {
    let base = format!("http://{}", SocketAddr::new(device.ip, device.port));
    info!(device = %device.name, url = %base, "Syncing device");

    let config_url = format!("{}/api/config", base);
    let mut config: Value = client
        .get(&config_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| request_error(&config_url, e))?
        .json()
        .await
        .map_err(|e| request_error(&config_url, e))?;

    target.apply(&mut config)?;

    client
        .put(&config_url)
        .json(&config)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| request_error(&config_url, e))?;

    let restart_url = format!("{}/api/system/restart", base);
    client
        .post(&restart_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| request_error(&restart_url, e))?;

    Ok(())
}

fn request_error(url: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        BridgeError::Timeout(url.to_string()).into()
    } else {
        anyhow::anyhow!("{}: {}", url, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    #[derive(Default)]
    struct FakeDevice {
        config: Mutex<Value>,
        restarts: Mutex<usize>,
    }

    async fn get_config(State(dev): State<Arc<FakeDevice>>) -> Json<Value> {
        Json(dev.config.lock().unwrap().clone())
    }

    async fn put_config(State(dev): State<Arc<FakeDevice>>, Json(body): Json<Value>) -> Json<Value> {
        *dev.config.lock().unwrap() = body;
        Json(json!({ "success": true }))
    }

    async fn restart(State(dev): State<Arc<FakeDevice>>) -> Json<Value> {
        *dev.restarts.lock().unwrap() += 1;
        Json(json!({ "success": true }))
    }

    /// Serve a fake device API on an ephemeral port.
    async fn spawn_device() -> (Arc<FakeDevice>, u16) {
        let dev = Arc::new(FakeDevice {
            config: Mutex::new(json!({ "device_name": "left", "osc_server_port": 9000 })),
            ..Default::default()
        });
        let app = Router::new()
            .route("/api/config", get(get_config).put(put_config))
            .route("/api/system/restart", post(restart))
            .with_state(dev.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (dev, port)
    }

    fn device(name: &str, port: u16) -> Device {
        Device {
            name: name.to_string(),
            host: format!("{}.local.", name),
            ip: IpAddr::from([127, 0, 0, 1]),
            port,
            osc_port: None,
        }
    }

    /// A port nothing listens on.
    fn closed_port() -> u16 {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    #[test]
    fn test_sync_target_requires_ip_and_port() {
        for body in [
            json!({ "rtp_port": 5004 }),
            json!({ "rtp_ip": "10.0.0.9" }),
            json!({ "rtp_ip": "", "rtp_port": 5004 }),
            json!({ "rtp_ip": "10.0.0.9", "rtp_port": 70000 }),
        ] {
            assert!(matches!(
                SyncTarget::from_json(&body),
                Err(BridgeError::InvalidRequest(_))
            ));
        }

        let target = SyncTarget::from_json(&json!({ "rtp_ip": "10.0.0.9", "rtp_port": "5004" })).unwrap();
        assert_eq!(
            target,
            SyncTarget { rtp_ip: "10.0.0.9".to_string(), rtp_port: 5004, osc_port: None }
        );
    }

    #[tokio::test]
    async fn test_sync_patches_config_and_restarts() {
        let (dev, port) = spawn_device().await;
        let target = SyncTarget { rtp_ip: "10.0.0.9".to_string(), rtp_port: 5004, osc_port: Some(8000) };

        let results = sync_all(&http_client(), vec![device("left", port)], &target).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SyncStatus::Success);
        let config = dev.config.lock().unwrap().clone();
        assert_eq!(config["rtp_midi_target_ip"], "10.0.0.9");
        assert_eq!(config["rtp_midi_target_port"], 5004);
        assert_eq!(config["osc_server_port"], 8000);
        assert_eq!(config["device_name"], "left");
        assert_eq!(*dev.restarts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_device_reported_in_order() {
        let (_dev, port) = spawn_device().await;
        let target = SyncTarget { rtp_ip: "10.0.0.9".to_string(), rtp_port: 5004, osc_port: None };
        let devices = vec![device("gone", closed_port()), device("left", port)];

        let results = sync_all(&http_client(), devices, &target).await;

        assert_eq!(results[0].name, "gone");
        assert_eq!(results[0].status, SyncStatus::Failure);
        assert!(results[0].reason.is_some());
        assert_eq!(results[1].name, "left");
        assert_eq!(results[1].status, SyncStatus::Success);
    }

    #[test]
    fn test_result_serialization() {
        let ok = SyncResult { name: "a".to_string(), status: SyncStatus::Success, reason: None };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({ "name": "a", "status": "success" }));
    }
}
