//! Per-collection sizing/sealing policy consulted by the Segment Allocator
//! (C4) and Flush Policy (C5). Spec §4.4/§4.5 leave the policy source
//! abstract ("maxRows from collection policy", "sealRows", "sealBytes",
//! "idleSeconds"); this is a process-local store of that policy, defaulted
//! for collections that never registered one explicitly.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use segflow_types::CollectionId;

#[derive(Debug, Clone, Copy)]
pub struct CollectionPolicy {
    pub max_rows: u64,
    pub seal_rows: u64,
    pub seal_bytes: u64,
    pub idle: Duration,
    pub allocation_ttl: Duration,
}

impl Default for CollectionPolicy {
    fn default() -> Self {
        CollectionPolicy {
            max_rows: 1_000_000,
            seal_rows: 900_000,
            seal_bytes: 512 * 1024 * 1024,
            idle: Duration::from_secs(600),
            allocation_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
pub struct PolicyStore {
    overrides: RwLock<HashMap<CollectionId, CollectionPolicy>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, collection_id: CollectionId, policy: CollectionPolicy) {
        self.overrides.write().insert(collection_id, policy);
    }

    pub fn get(&self, collection_id: CollectionId) -> CollectionPolicy {
        self.overrides
            .read()
            .get(&collection_id)
            .copied()
            .unwrap_or_default()
    }
}
