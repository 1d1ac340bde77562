use std::fmt;

use crate::ids::CollectionId;

/// Per-channel state machine, spec.md §4.3:
/// ```text
/// Unassigned --Watch(node)--> ToWatch --(ack)--> Watching
/// Watching   --nodeDown-----> ToWatch (choose new node)
/// Watching   --Remove------->  Released --(ack)--> Unassigned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WatchState {
    Unassigned,
    ToWatch,
    Watching,
    Released,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub collection_id: CollectionId,
    pub assigned_node: Option<String>,
    pub watch_state: WatchState,
}

impl ChannelInfo {
    pub fn unassigned(name: impl Into<String>, collection_id: CollectionId) -> Self {
        Self {
            name: name.into(),
            collection_id,
            assigned_node: None,
            watch_state: WatchState::Unassigned,
        }
    }

    /// I4: at most one channel->node assignment is Watching at any instant.
    /// `Match` returns true only when the assignment is currently Watching
    /// and the caller's node id is the assigned owner; used to reject stale
    /// `SaveBinlogPaths` from evicted owners.
    pub fn matches_owner(&self, node_id: &str) -> bool {
        self.watch_state == WatchState::Watching
            && self.assigned_node.as_deref() == Some(node_id)
    }
}
