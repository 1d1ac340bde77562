//! Segment Allocator (spec §4.4): `AllocSegment(collection, partition,
//! channel, count) -> [Allocation]`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use segflow_allocator::Allocator;
use segflow_channel::ChannelManager;
use segflow_metastore::MetaStore;
use segflow_types::{
    Allocation, AllocSegmentError, ChannelPosition, CollectionId, PartitionId, SegmentInfo,
    SegmentState, WatchState,
};

use crate::dispatch::DataNodeDispatcher;
use crate::flush_policy::FlushPolicy;
use crate::policy::PolicyStore;

/// Outstanding row-capacity reservations, keyed by segment, pruned lazily
/// of anything past `expire_time`.
#[derive(Default)]
struct Reservations {
    by_segment: HashMap<segflow_types::SegmentId, Vec<Allocation>>,
}

impl Reservations {
    fn pending(&mut self, segment_id: segflow_types::SegmentId) -> u64 {
        let now = Utc::now();
        if let Some(allocations) = self.by_segment.get_mut(&segment_id) {
            allocations.retain(|a| !a.is_expired(now));
            allocations.iter().map(|a| a.num_of_rows).sum()
        } else {
            0
        }
    }

    fn reserve(&mut self, allocation: Allocation) {
        self.by_segment
            .entry(allocation.segment_id)
            .or_default()
            .push(allocation);
    }
}

pub struct SegmentAllocator {
    meta: Arc<dyn MetaStore>,
    allocator: Arc<dyn Allocator>,
    channels: Arc<ChannelManager>,
    policies: Arc<PolicyStore>,
    flush_policy: Arc<FlushPolicy>,
    dispatcher: Arc<dyn DataNodeDispatcher>,
    reservations: Mutex<Reservations>,
}

impl SegmentAllocator {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        allocator: Arc<dyn Allocator>,
        channels: Arc<ChannelManager>,
        policies: Arc<PolicyStore>,
        flush_policy: Arc<FlushPolicy>,
        dispatcher: Arc<dyn DataNodeDispatcher>,
    ) -> Self {
        SegmentAllocator {
            meta,
            allocator,
            channels,
            policies,
            flush_policy,
            dispatcher,
            reservations: Mutex::new(Reservations::default()),
        }
    }

    pub async fn alloc_segment(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channel: &str,
        count: u64,
    ) -> Result<Vec<Allocation>, AllocSegmentError> {
        let policy = self.policies.get(collection_id);

        let candidates = self.meta.list_by_partition(collection_id, partition_id).await?;
        let mut target = None;
        for segment in &candidates {
            if segment.state != SegmentState::Growing || segment.insert_channel() != channel {
                continue;
            }
            let pending = self.reservations.lock().pending(segment.segment_id);
            if segment.num_rows + pending + count <= segment.max_rows {
                target = Some(segment.clone());
                break;
            }
        }

        let target = match target {
            Some(segment) => segment,
            None => self.create_segment(collection_id, partition_id, channel, &policy).await?,
        };

        let expire_time = Utc::now() + chrono::Duration::from_std(policy.allocation_ttl).unwrap_or_default();
        let allocation = Allocation {
            segment_id: target.segment_id,
            num_of_rows: count,
            expire_time,
        };
        self.reservations.lock().reserve(allocation.clone());

        self.ensure_channel_watched(collection_id, channel);

        Ok(vec![allocation])
    }

    async fn create_segment(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channel: &str,
        policy: &crate::policy::CollectionPolicy,
    ) -> Result<SegmentInfo, AllocSegmentError> {
        let (start, _) = self.allocator.alloc_id_batch(1).await?;
        let start_position = self
            .meta
            .channel_checkpoint(channel)
            .await
            .unwrap_or_else(|| ChannelPosition::zero(channel));
        let segment = SegmentInfo::new_growing(
            segflow_types::SegmentId(start),
            collection_id,
            partition_id,
            channel,
            policy.max_rows,
            start_position.clone(),
        );
        self.meta.create_segment(segment.clone()).await?;
        self.flush_policy.track_partition(collection_id, partition_id);
        self.notify_new_segment(&segment, start_position).await;
        Ok(segment)
    }

    /// A data node only learns about segments that existed at
    /// `WatchDmChannels` time through the recovery snapshot `GetRecoveryInfo`
    /// returns. If the channel is already `Watching`, this segment was
    /// created after that snapshot and the owning node must be told
    /// directly, or its inserts would hit an unknown segment and be dropped
    /// (spec §4.4/§4.7).
    async fn notify_new_segment(&self, segment: &SegmentInfo, start_position: ChannelPosition) {
        let info = match self.channels.info(segment.insert_channel()) {
            Some(info) if info.watch_state == WatchState::Watching => info,
            _ => return,
        };
        let Some(node_id) = info.assigned_node else {
            return;
        };
        if let Err(err) = self
            .dispatcher
            .sync_new_segment(
                &node_id,
                segment.segment_id,
                segment.collection_id(),
                segment.partition_id(),
                segment.insert_channel(),
                start_position,
            )
            .await
        {
            tracing::warn!(%node_id, segment_id = %segment.segment_id, %err, "failed to push new segment to data node");
        }
    }

    fn ensure_channel_watched(&self, collection_id: CollectionId, channel: &str) {
        let needs_watch = match self.channels.info(channel) {
            Some(info) => info.watch_state == segflow_types::WatchState::Unassigned,
            None => true,
        };
        if needs_watch {
            if let Err(err) = self.channels.watch(channel, collection_id) {
                tracing::warn!(%channel, %err, "failed to assign watcher for channel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use segflow_allocator::LocalAllocator;
    use segflow_metastore::InMemoryMetaStore;
    use segflow_types::PartitionId;

    fn harness() -> SegmentAllocator {
        harness_with_dispatcher().0
    }

    fn harness_with_dispatcher() -> (SegmentAllocator, Arc<RecordingDispatcher>) {
        let meta: Arc<dyn MetaStore> = Arc::new(InMemoryMetaStore::new());
        let policies = Arc::new(PolicyStore::new());
        let channels = Arc::new(ChannelManager::default());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let dyn_dispatcher: Arc<dyn DataNodeDispatcher> = dispatcher.clone();
        let allocator = SegmentAllocator::new(
            meta.clone(),
            Arc::new(LocalAllocator::new()),
            channels.clone(),
            policies.clone(),
            Arc::new(FlushPolicy::new(
                meta,
                policies,
                channels,
                dyn_dispatcher.clone(),
                std::time::Duration::from_secs(30),
            )),
            dyn_dispatcher,
        );
        (allocator, dispatcher)
    }

    #[tokio::test]
    async fn first_alloc_creates_a_growing_segment() {
        let allocator = harness();
        allocator.channels.register_node("node-a");
        let allocations = allocator
            .alloc_segment(CollectionId(1), PartitionId(1), "ch-1", 100)
            .await
            .unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].num_of_rows, 100);
    }

    #[tokio::test]
    async fn second_alloc_reuses_existing_segment_within_capacity() {
        let allocator = harness();
        allocator.channels.register_node("node-a");
        let first = allocator
            .alloc_segment(CollectionId(1), PartitionId(1), "ch-1", 100)
            .await
            .unwrap();
        let second = allocator
            .alloc_segment(CollectionId(1), PartitionId(1), "ch-1", 100)
            .await
            .unwrap();
        assert_eq!(first[0].segment_id, second[0].segment_id);
    }

    #[tokio::test]
    async fn new_segment_on_already_watched_channel_is_pushed_to_its_node() {
        let (allocator, dispatcher) = harness_with_dispatcher();
        allocator.channels.register_node("node-a");
        allocator.channels.watch("ch-1", CollectionId(1)).unwrap();
        allocator.channels.ack_watch("ch-1").unwrap();

        let allocations = allocator
            .alloc_segment(CollectionId(1), PartitionId(1), "ch-1", 100)
            .await
            .unwrap();

        let synced = dispatcher.synced.lock();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0], ("node-a".to_string(), allocations[0].segment_id));
    }

    #[tokio::test]
    async fn new_segment_on_unwatched_channel_is_not_pushed() {
        let (allocator, dispatcher) = harness_with_dispatcher();
        allocator.channels.register_node("node-a");

        allocator
            .alloc_segment(CollectionId(1), PartitionId(1), "ch-1", 100)
            .await
            .unwrap();

        assert!(dispatcher.synced.lock().is_empty());
    }
}
