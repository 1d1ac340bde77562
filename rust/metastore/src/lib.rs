//! Segment Meta Store (spec §4.1): the authoritative, process-wide mapping
//! from `segmentID` to `SegmentInfo`, plus the channel-checkpoint and
//! compaction-plan state that rides alongside it in the same persisted
//! layout (spec §6: `segment/...`, `channel-cp/...`, `compaction-plan/...`).
//!
//! The backing linearizable KV is treated as an abstract collaborator by the
//! specification; `InMemoryMetaStore` plays that role directly, behind a
//! single mutex, and doubles as its own read cache (spec §4.1: "all reads
//! serve from an in-memory cache refreshed on write").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use segflow_types::{
    ChannelPosition, CollectionId, CompactionTask, DeltaLogInfo, FieldId, MetaStoreError,
    PartitionId, PlanId, SegmentId, SegmentInfo, SegmentState,
};

pub mod keys;

/// A single atomic write combining a flush report's effects: the segment
/// record, its channel checkpoint, and (if the flush created a new segment
/// downstream via compaction) that segment's start position. Mirrors
/// `UpdateFlushSegmentsInfo` in spec §4.1.
#[derive(Debug, Clone)]
pub struct FlushUpdate {
    pub segment_id: SegmentId,
    pub flushed: bool,
    pub dropped: bool,
    pub binlogs: HashMap<FieldId, String>,
    pub statslogs: HashMap<FieldId, String>,
    pub deltalogs: Vec<DeltaLogInfo>,
    pub checkpoint: ChannelPosition,
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_segment(&self, id: SegmentId) -> Result<SegmentInfo, MetaStoreError>;
    async fn list_by_channel(&self, channel: &str) -> Result<Vec<SegmentInfo>, MetaStoreError>;
    async fn list_by_partition(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Result<Vec<SegmentInfo>, MetaStoreError>;
    async fn create_segment(&self, segment: SegmentInfo) -> Result<(), MetaStoreError>;
    async fn transition_segment(
        &self,
        id: SegmentId,
        next: SegmentState,
    ) -> Result<(), MetaStoreError>;
    async fn update_flush_segments_info(&self, update: FlushUpdate) -> Result<(), MetaStoreError>;
    async fn channel_checkpoint(&self, channel: &str) -> Option<ChannelPosition>;

    async fn insert_compaction_plan(&self, plan: CompactionTask) -> Result<(), MetaStoreError>;
    async fn get_compaction_plan(&self, id: PlanId) -> Result<CompactionTask, MetaStoreError>;
    async fn update_compaction_plan(&self, plan: CompactionTask) -> Result<(), MetaStoreError>;

    /// Atomically inserts a compaction result segment, drops its sources,
    /// and advances the channel checkpoint — spec §4.6: "On completion it
    /// atomically: inserts the result segment ..., marks sources Dropped,
    /// and updates channel checkpoints." (I6: the result is never visible
    /// without its sources also being marked Dropped in the same step.)
    async fn complete_compaction(
        &self,
        plan_id: PlanId,
        result: SegmentInfo,
        sources: &[SegmentId],
        checkpoint: Option<ChannelPosition>,
    ) -> Result<(), MetaStoreError>;
}

#[derive(Default)]
struct Inner {
    segments: HashMap<SegmentId, SegmentInfo>,
    checkpoints: HashMap<String, ChannelPosition>,
    plans: HashMap<PlanId, CompactionTask>,
}

/// The production meta store: a single process-wide cache guarded by a
/// mutex, acting as its own linearizable KV. Rebuilt on startup via
/// `rebuild_from_scan`, matching the full-scan recovery spec §4.1 describes
/// for a durable backend.
pub struct InMemoryMetaStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        InMemoryMetaStore {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Rehydrates the cache from a full scan of segments/checkpoints/plans,
    /// as a durable backend's startup path would. Used by tests simulating
    /// a DC restart (spec §7 recovery).
    pub fn rebuild_from_scan(
        segments: Vec<SegmentInfo>,
        checkpoints: Vec<(String, ChannelPosition)>,
        plans: Vec<CompactionTask>,
    ) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for segment in segments {
                inner.segments.insert(segment.segment_id, segment);
            }
            for (channel, position) in checkpoints {
                inner.checkpoints.insert(channel, position);
            }
            for plan in plans {
                inner.plans.insert(plan.plan_id, plan);
            }
        }
        store
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get_segment(&self, id: SegmentId) -> Result<SegmentInfo, MetaStoreError> {
        let inner = self.inner.lock();
        inner
            .segments
            .get(&id)
            .cloned()
            .ok_or(MetaStoreError::NotFound(id))
    }

    async fn list_by_channel(&self, channel: &str) -> Result<Vec<SegmentInfo>, MetaStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .segments
            .values()
            .filter(|s| s.insert_channel() == channel)
            .cloned()
            .collect())
    }

    async fn list_by_partition(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Result<Vec<SegmentInfo>, MetaStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .segments
            .values()
            .filter(|s| s.collection_id() == collection_id && s.partition_id() == partition_id)
            .cloned()
            .collect())
    }

    async fn create_segment(&self, segment: SegmentInfo) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock();
        inner.segments.insert(segment.segment_id, segment);
        Ok(())
    }

    async fn transition_segment(
        &self,
        id: SegmentId,
        next: SegmentState,
    ) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock();
        let segment = inner.segments.get_mut(&id).ok_or(MetaStoreError::NotFound(id))?;
        if segment.state == SegmentState::Dropped {
            return Err(MetaStoreError::StaleMeta(id));
        }
        segment
            .transition_to(next)
            .map_err(|_| MetaStoreError::StaleMeta(id))
    }

    async fn update_flush_segments_info(&self, update: FlushUpdate) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock();
        let segment = inner
            .segments
            .get_mut(&update.segment_id)
            .ok_or(MetaStoreError::NotFound(update.segment_id))?;
        if segment.state == SegmentState::Dropped {
            return Err(MetaStoreError::StaleMeta(update.segment_id));
        }
        for (field, path) in update.binlogs {
            segment.binlogs.entry(field).or_default().push(path);
        }
        for (field, path) in update.statslogs {
            segment.statslogs.entry(field).or_default().push(path);
        }
        segment.deltalogs.extend(update.deltalogs);
        segment.dml_position = Some(update.checkpoint.clone());
        if update.dropped {
            let _ = segment.transition_to(SegmentState::Dropped);
        } else if update.flushed {
            let _ = segment.transition_to(SegmentState::Flushing);
            segment
                .transition_to(SegmentState::Flushed)
                .map_err(|_| MetaStoreError::StaleMeta(update.segment_id))?;
        }
        inner
            .checkpoints
            .insert(update.checkpoint.channel_name.clone(), update.checkpoint);
        Ok(())
    }

    async fn channel_checkpoint(&self, channel: &str) -> Option<ChannelPosition> {
        self.inner.lock().checkpoints.get(channel).cloned()
    }

    async fn insert_compaction_plan(&self, plan: CompactionTask) -> Result<(), MetaStoreError> {
        self.inner.lock().plans.insert(plan.plan_id, plan);
        Ok(())
    }

    async fn get_compaction_plan(&self, id: PlanId) -> Result<CompactionTask, MetaStoreError> {
        self.inner
            .lock()
            .plans
            .get(&id)
            .cloned()
            .ok_or(MetaStoreError::PlanNotFound(id))
    }

    async fn update_compaction_plan(&self, plan: CompactionTask) -> Result<(), MetaStoreError> {
        self.inner.lock().plans.insert(plan.plan_id, plan);
        Ok(())
    }

    async fn complete_compaction(
        &self,
        plan_id: PlanId,
        result: SegmentInfo,
        sources: &[SegmentId],
        checkpoint: Option<ChannelPosition>,
    ) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock();
        inner.segments.insert(result.segment_id, result);
        for source in sources {
            if let Some(segment) = inner.segments.get_mut(source) {
                let _ = segment.transition_to(SegmentState::Dropped);
            }
        }
        if let Some(checkpoint) = checkpoint {
            inner
                .checkpoints
                .insert(checkpoint.channel_name.clone(), checkpoint);
        }
        if let Some(plan) = inner.plans.get_mut(&plan_id) {
            let _ = plan.transition_to(segflow_types::PlanState::Completed);
        }
        Ok(())
    }
}
