use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mapping::{deserialize_records, MappingRecord};
use crate::{DEFAULT_API_PORT, DEFAULT_OSC_PORT};

/// Device configuration persisted as TOML and exchanged as JSON over the
/// HTTP API. Keys are flat so fleet sync can patch individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Announced service name (empty = "StageBridge-<hostname>")
    #[serde(default)]
    pub device_name: String,
    #[serde(default = "default_osc_ip")]
    pub osc_server_ip: String,
    #[serde(default = "default_osc_port")]
    pub osc_server_port: u16,
    #[serde(default = "default_api_listen")]
    pub api_listen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_input_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_output_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp_midi_target_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp_midi_target_port: Option<u16>,
    /// "peer-discovery" (alias "zeroconf") or "broadcast"; anything else disables relay
    #[serde(default = "default_relay_mode")]
    pub osc_relay_mode: String,
    #[serde(default = "default_broadcast_ip")]
    pub osc_broadcast_ip: String,
    #[serde(default = "default_osc_port")]
    pub osc_broadcast_port: u16,
    /// Entries are decoded one by one; unreadable ones are dropped with a warning
    #[serde(default, deserialize_with = "deserialize_records")]
    pub osc_mappings: Vec<MappingRecord>,
}

fn default_osc_ip() -> String { "0.0.0.0".to_string() }
fn default_osc_port() -> u16 { DEFAULT_OSC_PORT }
fn default_api_listen() -> String { format!("0.0.0.0:{}", DEFAULT_API_PORT) }
fn default_relay_mode() -> String { "peer-discovery".to_string() }
fn default_broadcast_ip() -> String { "0.0.0.0".to_string() }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            osc_server_ip: default_osc_ip(),
            osc_server_port: default_osc_port(),
            api_listen: default_api_listen(),
            midi_input_name: None,
            midi_output_name: None,
            rtp_midi_target_ip: None,
            rtp_midi_target_port: None,
            osc_relay_mode: default_relay_mode(),
            osc_broadcast_ip: default_broadcast_ip(),
            osc_broadcast_port: default_osc_port(),
            osc_mappings: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn relay_mode(&self) -> RelayMode {
        RelayMode::parse(&self.osc_relay_mode)
    }

    /// Broadcast target, or None if the configured IP does not parse.
    pub fn broadcast_target(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.osc_broadcast_ip.parse().ok()?;
        Some(SocketAddr::new(ip, self.osc_broadcast_port))
    }

    /// Address the OSC listener binds to.
    pub fn osc_listen_addr(&self) -> SocketAddr {
        let ip = self
            .osc_server_ip
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.osc_server_port)
    }

    /// RTP-MIDI target, only when both halves are configured and valid.
    pub fn rtp_target(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.rtp_midi_target_ip.as_deref()?.parse().ok()?;
        Some(SocketAddr::new(ip, self.rtp_midi_target_port?))
    }

    /// Apply a JSON object of top-level keys over this config.
    /// Unknown keys are ignored; the result must still deserialize.
    pub fn merged_with(&self, patch: &serde_json::Value) -> anyhow::Result<Self> {
        let mut current = serde_json::to_value(self)?;
        let (Some(target), Some(updates)) = (current.as_object_mut(), patch.as_object()) else {
            anyhow::bail!("config update must be a JSON object");
        };
        for (key, value) in updates {
            target.insert(key.clone(), value.clone());
        }
        Ok(serde_json::from_value(current)?)
    }
}

/// Policy for OSC messages that match no mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMode {
    PeerDiscovery,
    Broadcast,
    /// Any other configured value: unmapped messages are dropped
    Disabled(String),
}

impl RelayMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "peer-discovery" | "zeroconf" => Self::PeerDiscovery,
            "broadcast" => Self::Broadcast,
            other => Self::Disabled(other.to_string()),
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerDiscovery => f.write_str("peer-discovery"),
            Self::Broadcast => f.write_str("broadcast"),
            Self::Disabled(other) => write!(f, "disabled ({})", other),
        }
    }
}

/// Load a BridgeConfig from a TOML file on disk.
pub fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: BridgeConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// The on-disk TOML form of a config.
pub fn config_to_toml(config: &BridgeConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

/// Parse an uploaded config file. A document starting with `{` is read as
/// JSON, anything else as TOML.
pub fn parse_config_file(contents: &str) -> anyhow::Result<BridgeConfig> {
    if contents.trim_start().starts_with('{') {
        Ok(serde_json::from_str(contents)?)
    } else {
        Ok(toml::from_str(contents)?)
    }
}

/// Save a BridgeConfig as TOML.
/// Creates parent directories if needed. Overwrites any existing file.
pub fn save_config(path: &Path, config: &BridgeConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, config_to_toml(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.relay_mode(), RelayMode::PeerDiscovery);
        assert!(config.rtp_target().is_none());
    }

    #[test]
    fn test_relay_mode_parse() {
        assert_eq!(RelayMode::parse("zeroconf"), RelayMode::PeerDiscovery);
        assert_eq!(RelayMode::parse("broadcast"), RelayMode::Broadcast);
        assert_eq!(RelayMode::parse("off"), RelayMode::Disabled("off".into()));
    }

    #[test]
    fn test_merge_patches_fields() {
        let config = BridgeConfig::default();
        let patch = serde_json::json!({
            "rtp_midi_target_ip": "192.168.1.50",
            "rtp_midi_target_port": 5004,
            "unrelated": true,
        });
        let merged = config.merged_with(&patch).unwrap();
        assert_eq!(
            merged.rtp_target(),
            Some("192.168.1.50:5004".parse().unwrap())
        );
        assert_eq!(merged.osc_server_port, config.osc_server_port);
    }

    #[test]
    fn test_mistyped_mapping_does_not_reject_config() {
        let toml = r#"
            device_name = "Stage Left"

            [[osc_mappings]]
            id = "good"
            osc_address = "/patch/song/1"
            [[osc_mappings.midi_sequence]]
            type = "program_change"
            channel = 1
            program = 5

            [[osc_mappings]]
            id = "coerced"
            osc_address = "/patch/song/2"
            [[osc_mappings.midi_sequence]]
            type = "control_change"
            channel = "1"
            control = 7
            value = 64.0

            [[osc_mappings]]
            id = "bad"
            osc_address = "/patch/song/3"
            [[osc_mappings.midi_sequence]]
            type = "program_change"
            channel = "left"
            program = 5
        "#;
        let dir = std::env::temp_dir().join(format!("stagebridge-cfg-{}", std::process::id()));
        let path = dir.join("stagebridge.toml");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, toml).unwrap();

        let config = load_config(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(config.device_name, "Stage Left");
        let ids: Vec<_> = config.osc_mappings.iter().map(|r| r.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["good", "coerced"]);
        assert_eq!(config.osc_mappings[1].midi_sequence[0].channel, Some(1));
        assert_eq!(config.osc_mappings[1].midi_sequence[0].value, Some(64));
    }

    #[test]
    fn test_parse_config_file_detects_format() {
        let from_json = parse_config_file(r#"{ "device_name": "Left", "osc_server_port": 8000 }"#).unwrap();
        assert_eq!(from_json.device_name, "Left");
        assert_eq!(from_json.osc_server_port, 8000);

        let from_toml = parse_config_file("device_name = \"Right\"\n").unwrap();
        assert_eq!(from_toml.device_name, "Right");
        assert_eq!(from_toml.osc_server_port, DEFAULT_OSC_PORT);

        let text = config_to_toml(&from_json).unwrap();
        assert_eq!(parse_config_file(&text).unwrap(), from_json);

        assert!(parse_config_file("device_name = ").is_err());
    }

    #[test]
    fn test_merge_rejects_bad_types() {
        let patch = serde_json::json!({ "osc_server_port": "nine thousand" });
        assert!(BridgeConfig::default().merged_with(&patch).is_err());
        assert!(BridgeConfig::default().merged_with(&serde_json::json!([1])).is_err());
    }
}
