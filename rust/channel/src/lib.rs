//! Channel Manager (spec §4.3): owns the per-channel watch assignment state
//! machine and picks which live data node watches which channel.
//!
//! The assignment policy is pulled out behind a trait the way
//! `AssignmentPolicy` is in the corpus, but the strategy itself is
//! load-based rather than consistent-hash-based: spec §4.3 requires
//! reassignment to track the *current* least-loaded live node, not a stable
//! hash ring.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use segflow_types::{ChannelInfo, CollectionId, WatchState};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} is unknown")]
    Unknown(String),
    #[error("no live nodes to assign a channel to")]
    NoLiveNodes,
}

impl segflow_error::ChromaError for ChannelError {
    fn code(&self) -> segflow_error::ErrorCodes {
        match self {
            ChannelError::Unknown(_) => segflow_error::ErrorCodes::NotFound,
            ChannelError::NoLiveNodes => segflow_error::ErrorCodes::Unavailable,
        }
    }
}

/// Picks a node for a channel given the current live set and each node's
/// current Watching-channel count.
pub trait ChannelAssignmentPolicy: Send + Sync {
    fn assign_one(&self, live_nodes: &[String], load: &HashMap<String, usize>) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct LeastLoadedPolicy;

impl ChannelAssignmentPolicy for LeastLoadedPolicy {
    fn assign_one(&self, live_nodes: &[String], load: &HashMap<String, usize>) -> Option<String> {
        live_nodes
            .iter()
            .min_by_key(|node| load.get(*node).copied().unwrap_or(0))
            .cloned()
    }
}

struct State {
    channels: HashMap<String, ChannelInfo>,
    live_nodes: HashSet<String>,
}

pub struct ChannelManager<P: ChannelAssignmentPolicy = LeastLoadedPolicy> {
    state: RwLock<State>,
    policy: P,
}

impl Default for ChannelManager<LeastLoadedPolicy> {
    fn default() -> Self {
        Self::new(LeastLoadedPolicy)
    }
}

impl<P: ChannelAssignmentPolicy> ChannelManager<P> {
    pub fn new(policy: P) -> Self {
        ChannelManager {
            state: RwLock::new(State {
                channels: HashMap::new(),
                live_nodes: HashSet::new(),
            }),
            policy,
        }
    }

    pub fn register_node(&self, node_id: impl Into<String>) {
        self.state.write().live_nodes.insert(node_id.into());
    }

    /// A node leaving the live set. Every channel it was Watching moves to
    /// `ToWatch` and is immediately reassigned (spec §4.3): the old node is
    /// assumed to have stopped producing mutations; the new owner resumes
    /// from the last persisted channel checkpoint rather than from the old
    /// node's in-memory state.
    pub fn node_down(&self, node_id: &str) {
        let mut state = self.state.write();
        state.live_nodes.remove(node_id);
        let affected: Vec<String> = state
            .channels
            .values()
            .filter(|c| c.watch_state == WatchState::Watching && c.assigned_node.as_deref() == Some(node_id))
            .map(|c| c.name.clone())
            .collect();
        for name in affected {
            let load = Self::load_snapshot(&state.channels);
            let live_nodes: Vec<String> = state.live_nodes.iter().cloned().collect();
            let next = self.policy.assign_one(&live_nodes, &load);
            if let Some(channel) = state.channels.get_mut(&name) {
                channel.watch_state = WatchState::ToWatch;
                channel.assigned_node = next;
            }
        }
    }

    fn load_snapshot(channels: &HashMap<String, ChannelInfo>) -> HashMap<String, usize> {
        let mut load = HashMap::new();
        for channel in channels.values() {
            if channel.watch_state == WatchState::Watching {
                if let Some(node) = &channel.assigned_node {
                    *load.entry(node.clone()).or_insert(0) += 1;
                }
            }
        }
        load
    }

    /// `Unassigned -> ToWatch`, picking the least-loaded live node. Returns
    /// the node the caller must instruct to `WatchDmChannels`.
    pub fn watch(
        &self,
        channel: &str,
        collection_id: CollectionId,
    ) -> Result<String, ChannelError> {
        let mut state = self.state.write();
        let load = Self::load_snapshot(&state.channels);
        let live_nodes: Vec<String> = state.live_nodes.iter().cloned().collect();
        let node = self
            .policy
            .assign_one(&live_nodes, &load)
            .ok_or(ChannelError::NoLiveNodes)?;
        let entry = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelInfo::unassigned(channel, collection_id));
        entry.watch_state = WatchState::ToWatch;
        entry.assigned_node = Some(node.clone());
        Ok(node)
    }

    /// `ToWatch -> Watching`, acknowledged by the assigned node.
    pub fn ack_watch(&self, channel: &str) -> Result<(), ChannelError> {
        let mut state = self.state.write();
        let info = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| ChannelError::Unknown(channel.to_string()))?;
        info.watch_state = WatchState::Watching;
        Ok(())
    }

    /// `Watching -> Released`.
    pub fn remove(&self, channel: &str) -> Result<(), ChannelError> {
        let mut state = self.state.write();
        let info = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| ChannelError::Unknown(channel.to_string()))?;
        info.watch_state = WatchState::Released;
        Ok(())
    }

    /// `Released -> Unassigned`, acknowledged by the node releasing the
    /// channel.
    pub fn ack_remove(&self, channel: &str) -> Result<(), ChannelError> {
        let mut state = self.state.write();
        let info = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| ChannelError::Unknown(channel.to_string()))?;
        info.watch_state = WatchState::Unassigned;
        info.assigned_node = None;
        Ok(())
    }

    /// I4/spec §4.3: true only when `channel` is currently `Watching` and
    /// owned by `node_id`. Used to reject stale `SaveBinlogPaths` from
    /// evicted owners.
    pub fn matches(&self, channel: &str, node_id: &str) -> bool {
        self.state
            .read()
            .channels
            .get(channel)
            .map(|c| c.matches_owner(node_id))
            .unwrap_or(false)
    }

    pub fn info(&self, channel: &str) -> Option<ChannelInfo> {
        self.state.read().channels.get(channel).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_picks_least_loaded_node() {
        let manager = ChannelManager::default();
        manager.register_node("node-a");
        manager.register_node("node-b");
        manager.watch("ch-1", CollectionId(1)).unwrap();
        manager.ack_watch("ch-1").unwrap();
        let node = manager.watch("ch-2", CollectionId(1)).unwrap();
        assert_eq!(node, "node-b");
    }

    #[test]
    fn node_down_reassigns_watching_channels() {
        let manager = ChannelManager::default();
        manager.register_node("node-a");
        manager.register_node("node-b");
        manager.watch("ch-1", CollectionId(1)).unwrap();
        manager.ack_watch("ch-1").unwrap();
        assert!(manager.matches("ch-1", "node-a"));
        manager.node_down("node-a");
        let info = manager.info("ch-1").unwrap();
        assert_eq!(info.watch_state, WatchState::ToWatch);
        assert_eq!(info.assigned_node.as_deref(), Some("node-b"));
        assert!(!manager.matches("ch-1", "node-a"));
    }

    #[test]
    fn full_lifecycle_round_trips_to_unassigned() {
        let manager = ChannelManager::default();
        manager.register_node("node-a");
        manager.watch("ch-1", CollectionId(1)).unwrap();
        manager.ack_watch("ch-1").unwrap();
        manager.remove("ch-1").unwrap();
        assert_eq!(manager.info("ch-1").unwrap().watch_state, WatchState::Released);
        manager.ack_remove("ch-1").unwrap();
        let info = manager.info("ch-1").unwrap();
        assert_eq!(info.watch_state, WatchState::Unassigned);
        assert!(info.assigned_node.is_none());
    }

    #[test]
    fn watch_fails_with_no_live_nodes() {
        let manager = ChannelManager::default();
        let err = manager.watch("ch-1", CollectionId(1)).unwrap_err();
        assert!(matches!(err, ChannelError::NoLiveNodes));
    }
}
