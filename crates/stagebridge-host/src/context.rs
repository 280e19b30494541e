use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};
use tracing::debug;

use stagebridge_protocol::config::{save_config, BridgeConfig};
use stagebridge_protocol::mapping::MappingRecord;
use stagebridge_protocol::device::DeviceRegistry;
use stagebridge_protocol::{DEDUP_TTL_MS, STEP_DELAY_MS};

use crate::dedup::DedupCache;
use crate::mapping_table::MappingTable;
use crate::midi_dispatch::MidiDispatcher;

/// State shared by every task of the bridge, built once at startup.
pub struct BridgeContext {
    /// Path of the TOML config file for persistence
    pub config_path: PathBuf,
    /// Live config. Port and device changes apply on restart; relay settings
    /// and mappings apply immediately.
    pub config: RwLock<BridgeConfig>,
    /// Name announced via discovery
    pub device_name: String,
    /// OSC port actually bound at startup (target of local OSC re-emits)
    pub osc_listen_port: u16,
    pub registry: DeviceRegistry,
    pub mappings: MappingTable,
    pub dedup: DedupCache,
    pub midi: MidiDispatcher,
    pub midi_input_name: Option<String>,
    /// Gap between steps of a mapped OSC action
    pub step_delay: Duration,
    /// Signalled by the admin API to end the process for a supervised restart
    pub restart: Notify,
    pub start_time: Instant,
}

impl BridgeContext {
    pub fn new(
        config_path: PathBuf,
        config: BridgeConfig,
        device_name: String,
        midi: MidiDispatcher,
        midi_input_name: Option<String>,
    ) -> Self {
        Self {
            config_path,
            device_name,
            osc_listen_port: config.osc_server_port,
            registry: DeviceRegistry::new(),
            mappings: MappingTable::from_records(&config.osc_mappings),
            dedup: DedupCache::new(Duration::from_millis(DEDUP_TTL_MS)),
            midi,
            midi_input_name,
            step_delay: Duration::from_millis(STEP_DELAY_MS),
            restart: Notify::new(),
            start_time: Instant::now(),
            config: RwLock::new(config),
        }
    }

    /// Apply `edit` to a copy of the live config, persist the result and
    /// swap in its mappings. The config lock is held throughout, so
    /// concurrent edits are serialized. Nothing changes if `edit` fails.
    pub async fn update_config<T, E>(
        &self,
        edit: impl FnOnce(&mut BridgeConfig) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut current = self.config.write().await;
        let mut next = current.clone();
        let out = edit(&mut next)?;
        assign_mapping_ids(&mut next.osc_mappings);
        save_config(&self.config_path, &next)?;
        let usable = self.mappings.replace(&next.osc_mappings).await;
        debug!(mappings = next.osc_mappings.len(), usable, "Config updated");
        *current = next;
        Ok(out)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Give every record without an id a fresh one. Returns how many were assigned.
pub fn assign_mapping_ids(records: &mut [MappingRecord]) -> usize {
    let mut assigned = 0;
    for record in records.iter_mut().filter(|r| r.id.is_none()) {
        record.id = Some(new_mapping_id());
        assigned += 1;
    }
    assigned
}

pub fn new_mapping_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
