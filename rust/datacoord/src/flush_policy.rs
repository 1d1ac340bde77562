//! Flush Policy and Sealing (spec §4.5): a background loop scans Growing
//! segments and seals any that cross a size/row/idle threshold. The scan
//! itself is plain `&self` state so it can be shared behind an `Arc` with
//! the RPC handlers that also need to seal on demand (`Flush`,
//! `ManualCompaction`); the periodic trigger lives in the binary's startup
//! wiring, which owns the scan loop's scheduling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use segflow_channel::ChannelManager;
use segflow_metastore::MetaStore;
use segflow_types::{CollectionId, PartitionId, SegmentId, SegmentState};

use crate::dispatch::DataNodeDispatcher;
use crate::policy::PolicyStore;

#[derive(Default)]
struct IdleTracker {
    last_rows: HashMap<SegmentId, (u64, chrono::DateTime<Utc>)>,
}

pub struct FlushPolicy {
    meta: Arc<dyn MetaStore>,
    policies: Arc<PolicyStore>,
    channels: Arc<ChannelManager>,
    dispatcher: Arc<dyn DataNodeDispatcher>,
    scan_interval: Duration,
    idle: RwLock<IdleTracker>,
    tracked: RwLock<HashMap<CollectionId, HashSet<PartitionId>>>,
}

impl FlushPolicy {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        policies: Arc<PolicyStore>,
        channels: Arc<ChannelManager>,
        dispatcher: Arc<dyn DataNodeDispatcher>,
        scan_interval: Duration,
    ) -> Self {
        FlushPolicy {
            meta,
            policies,
            channels,
            dispatcher,
            scan_interval,
            idle: RwLock::new(IdleTracker::default()),
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Groups `sealed` by the data node currently watching each segment's
    /// channel and dispatches one `FlushSegments` call per node, so the DN
    /// forces its insert/delete buffers out instead of waiting on their own
    /// row/idle thresholds (spec §4.5: "the DN learns of sealing only
    /// indirectly ... via the flushCh that the DC publishes").
    async fn dispatch_flush(&self, sealed: &[(SegmentId, String)]) {
        let mut by_node: HashMap<String, Vec<SegmentId>> = HashMap::new();
        for (segment_id, channel) in sealed {
            let node_id = match self.channels.info(channel) {
                Some(info) if info.assigned_node.is_some() => info.assigned_node.unwrap(),
                _ => {
                    tracing::warn!(%channel, "no data node assigned to channel, cannot dispatch flush");
                    continue;
                }
            };
            by_node.entry(node_id).or_default().push(*segment_id);
        }
        for (node_id, segment_ids) in by_node {
            if let Err(err) = self.dispatcher.flush_segments(&node_id, segment_ids).await {
                tracing::warn!(%node_id, %err, "failed to dispatch FlushSegments");
            }
        }
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Called by the Segment Allocator whenever a `(collection, partition)`
    /// first appears, so the periodic scan knows where to look — the meta
    /// store has no collection-wide index to discover this on its own.
    pub fn track_partition(&self, collection_id: CollectionId, partition_id: PartitionId) {
        self.tracked
            .write()
            .entry(collection_id)
            .or_default()
            .insert(partition_id);
    }

    /// `SealAllSegments(collectionID)`: seals every Growing segment of the
    /// collection and returns their IDs, regardless of threshold.
    pub async fn seal_all_segments(&self, collection_id: CollectionId) -> Vec<SegmentId> {
        let mut sealed = Vec::new();
        for partition_id in self.known_partitions(collection_id) {
            let segments = match self.meta.list_by_partition(collection_id, partition_id).await {
                Ok(segments) => segments,
                Err(err) => {
                    tracing::warn!(%err, "failed to list segments for SealAllSegments");
                    continue;
                }
            };
            for segment in segments.into_iter().filter(|s| s.state == SegmentState::Growing) {
                if self
                    .meta
                    .transition_segment(segment.segment_id, SegmentState::Sealed)
                    .await
                    .is_ok()
                {
                    sealed.push((segment.segment_id, segment.insert_channel().to_string()));
                }
            }
        }
        self.dispatch_flush(&sealed).await;
        sealed.into_iter().map(|(id, _)| id).collect()
    }

    /// Runs one scan pass over every tracked `(collection, partition)`.
    /// Driven by the background scan loop in `server.rs`.
    pub async fn scan_all_tracked(&self) {
        let snapshot: Vec<(CollectionId, PartitionId)> = self
            .tracked
            .read()
            .iter()
            .flat_map(|(collection_id, partitions)| {
                partitions.iter().map(move |p| (*collection_id, *p))
            })
            .collect();
        for (collection_id, partition_id) in snapshot {
            self.seal_one_pass(collection_id, partition_id).await;
        }
    }

    async fn seal_one_pass(&self, collection_id: CollectionId, partition_id: PartitionId) {
        let policy = self.policies.get(collection_id);
        let segments = match self.meta.list_by_partition(collection_id, partition_id).await {
            Ok(segments) => segments,
            Err(err) => {
                tracing::warn!(%err, "flush policy scan failed to list segments");
                return;
            }
        };
        let now = Utc::now();
        let mut sealed = Vec::new();
        for segment in segments.into_iter().filter(|s| s.state == SegmentState::Growing) {
            let idle_for = {
                let mut idle = self.idle.write();
                let entry = idle
                    .last_rows
                    .entry(segment.segment_id)
                    .or_insert((segment.num_rows, now));
                if entry.0 == segment.num_rows {
                    now.signed_duration_since(entry.1).num_seconds().max(0) as u64
                } else {
                    *entry = (segment.num_rows, now);
                    0
                }
            };

            let should_seal =
                segment.num_rows >= policy.seal_rows || idle_for >= policy.idle.as_secs();
            if should_seal {
                match self.meta.transition_segment(segment.segment_id, SegmentState::Sealed).await {
                    Ok(()) => {
                        tracing::info!(segment_id = %segment.segment_id, "sealed segment");
                        sealed.push((segment.segment_id, segment.insert_channel().to_string()));
                    }
                    Err(err) => tracing::warn!(%err, "failed to seal segment"),
                }
            }
        }
        self.dispatch_flush(&sealed).await;
    }

    fn known_partitions(&self, collection_id: CollectionId) -> Vec<PartitionId> {
        self.tracked
            .read()
            .get(&collection_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use segflow_metastore::InMemoryMetaStore;
    use segflow_types::{ChannelPosition, SegmentInfo};

    fn new_policy(meta: Arc<InMemoryMetaStore>, policies: Arc<PolicyStore>) -> (FlushPolicy, Arc<RecordingDispatcher>) {
        let channels = Arc::new(ChannelManager::default());
        channels.register_node("node-a");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let flush_policy = FlushPolicy::new(
            meta,
            policies,
            channels.clone(),
            dispatcher.clone(),
            Duration::from_secs(30),
        );
        channels.watch("ch-1", CollectionId(1)).unwrap();
        channels.ack_watch("ch-1").unwrap();
        (flush_policy, dispatcher)
    }

    #[tokio::test]
    async fn seal_all_segments_seals_every_growing_segment() {
        let meta = Arc::new(InMemoryMetaStore::new());
        let policies = Arc::new(PolicyStore::new());
        let (flush_policy, dispatcher) = new_policy(meta.clone(), policies);
        flush_policy.track_partition(CollectionId(1), PartitionId(1));

        let segment = SegmentInfo::new_growing(
            SegmentId(1),
            CollectionId(1),
            PartitionId(1),
            "ch-1",
            1000,
            ChannelPosition::zero("ch-1"),
        );
        meta.create_segment(segment).await.unwrap();

        let sealed = flush_policy.seal_all_segments(CollectionId(1)).await;
        assert_eq!(sealed, vec![SegmentId(1)]);
        let segment = meta.get_segment(SegmentId(1)).await.unwrap();
        assert_eq!(segment.state, SegmentState::Sealed);
        assert_eq!(dispatcher.flushed.lock()[0], ("node-a".to_string(), vec![SegmentId(1)]));
    }

    #[tokio::test]
    async fn seal_one_pass_seals_once_row_threshold_crossed() {
        let meta = Arc::new(InMemoryMetaStore::new());
        let policies = Arc::new(PolicyStore::new());
        policies.set(
            CollectionId(1),
            crate::policy::CollectionPolicy {
                max_rows: 1000,
                seal_rows: 100,
                seal_bytes: u64::MAX,
                idle: Duration::from_secs(u64::MAX / 2),
                allocation_ttl: Duration::from_secs(30),
            },
        );
        let (flush_policy, dispatcher) = new_policy(meta.clone(), policies);
        let mut segment = SegmentInfo::new_growing(
            SegmentId(1),
            CollectionId(1),
            PartitionId(1),
            "ch-1",
            1000,
            ChannelPosition::zero("ch-1"),
        );
        segment.add_rows(150).unwrap();
        meta.create_segment(segment).await.unwrap();

        flush_policy.seal_one_pass(CollectionId(1), PartitionId(1)).await;
        let segment = meta.get_segment(SegmentId(1)).await.unwrap();
        assert_eq!(segment.state, SegmentState::Sealed);
        assert_eq!(dispatcher.flushed.lock()[0], ("node-a".to_string(), vec![SegmentId(1)]));
    }
}
