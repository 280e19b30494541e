use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use stagebridge_protocol::mapping::{Mapping, MappingRecord};

/// Ordered OSC address → action rules. First match in insertion order wins.
///
/// Readers take an `Arc` snapshot per message; writers replace the whole
/// list, so a lookup never sees a partially updated table.
#[derive(Default)]
pub struct MappingTable {
    mappings: RwLock<Arc<Vec<Mapping>>>,
}

impl MappingTable {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Self {
            mappings: RwLock::new(Arc::new(mappings)),
        }
    }

    /// Build from persisted records, skipping (and logging) malformed ones.
    pub fn from_records(records: &[MappingRecord]) -> Self {
        Self::new(compile(records))
    }

    pub async fn snapshot(&self) -> Arc<Vec<Mapping>> {
        Arc::clone(&*self.mappings.read().await)
    }

    pub async fn find_by_address(&self, address: &str) -> Option<Mapping> {
        let snapshot = self.snapshot().await;
        snapshot.iter().find(|m| m.osc_address == address).cloned()
    }

    /// Swap in a new table compiled from `records`. Returns the number of
    /// usable mappings.
    pub async fn replace(&self, records: &[MappingRecord]) -> usize {
        let compiled = compile(records);
        let count = compiled.len();
        *self.mappings.write().await = Arc::new(compiled);
        count
    }

    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }
}

fn compile(records: &[MappingRecord]) -> Vec<Mapping> {
    records
        .iter()
        .filter_map(|record| match Mapping::try_from(record) {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                warn!(error = %e, "Skipping mapping");
                None
            }
        })
        .collect()
}
