//! Persisted key layout (spec §6), documented here even though
//! [`crate::InMemoryMetaStore`] keeps its state in native Rust maps rather
//! than literal KV keys. A durable backend would shard under these
//! prefixes; keeping the scheme named and tested pins the contract so a
//! future KV-backed `MetaStore` impl has no ambiguity to resolve.

use segflow_types::{CollectionId, PartitionId, PlanId, SegmentId};

pub fn segment_key(collection_id: CollectionId, partition_id: PartitionId, segment_id: SegmentId) -> String {
    format!("segment/{}/{}/{}", collection_id.0, partition_id.0, segment_id.0)
}

pub fn channel_checkpoint_key(channel: &str) -> String {
    format!("channel-cp/{channel}")
}

pub fn compaction_plan_key(plan_id: PlanId) -> String {
    format!("compaction-plan/{}", plan_id.0)
}
