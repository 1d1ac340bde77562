//! DN Segment Replica (spec §4.7): the in-node mutable view of every segment
//! assigned to this data node's channels. Durability is delegated entirely
//! to C1 via flush; this struct only ever holds what's needed to keep
//! buffering rows between flushes and to answer the DC's recovery queries.

use std::collections::HashMap;

use parking_lot::RwLock;

use segflow_types::{ChannelPosition, CollectionId, PartitionId, SegmentId};

/// Per-segment accumulators tracked between flushes. `start_position` is
/// set once on the first insert and consumed (taken) on the next flush, so
/// a newly-created segment's start offset is reported to the DC exactly
/// once.
#[derive(Debug, Clone)]
struct ReplicaSegment {
    collection_id: CollectionId,
    partition_id: PartitionId,
    channel: String,
    num_rows: u64,
    checkpoint: ChannelPosition,
    start_position: Option<ChannelPosition>,
    is_flushing: bool,
}

/// A checkpoint/row-count snapshot returned by `getSegmentStatisticsUpdates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStats {
    pub segment_id: SegmentId,
    pub num_rows: u64,
    pub checkpoint: ChannelPosition,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("segment {0} is unknown to this replica")]
    Unknown(SegmentId),
}

#[derive(Default)]
pub struct SegmentReplica {
    segments: RwLock<HashMap<SegmentId, ReplicaSegment>>,
}

impl SegmentReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// A segment newly allocated on this node's channel (normal insert
    /// path, as opposed to `add_flushed_segment`'s recovery path).
    pub fn add_normal_segment(
        &self,
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channel: impl Into<String>,
        start_position: ChannelPosition,
    ) {
        let channel = channel.into();
        self.segments.write().insert(
            segment_id,
            ReplicaSegment {
                collection_id,
                partition_id,
                channel,
                num_rows: 0,
                checkpoint: start_position.clone(),
                start_position: Some(start_position),
                is_flushing: false,
            },
        );
    }

    /// Recovery path (`GetRecoveryInfo`): a segment the DC already knows
    /// about, rebuilt from its last reported checkpoint with no pending
    /// start position to report (it was already consumed before restart).
    pub fn add_flushed_segment(
        &self,
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channel: impl Into<String>,
        checkpoint: ChannelPosition,
        num_rows: u64,
    ) {
        self.segments.write().insert(
            segment_id,
            ReplicaSegment {
                collection_id,
                partition_id,
                channel: channel.into(),
                num_rows,
                checkpoint,
                start_position: None,
                is_flushing: false,
            },
        );
    }

    pub fn add_rows(&self, segment_id: SegmentId, rows: u64, position: ChannelPosition) -> Result<(), ReplicaError> {
        let mut segments = self.segments.write();
        let segment = segments.get_mut(&segment_id).ok_or(ReplicaError::Unknown(segment_id))?;
        segment.num_rows += rows;
        segment.checkpoint = position;
        Ok(())
    }

    /// Drains and returns the start positions of every segment that hasn't
    /// reported one yet. Called once per flush cycle; a segment whose start
    /// position was already drained returns `None` on subsequent calls.
    pub fn list_new_segments_start_positions(&self) -> Vec<(SegmentId, ChannelPosition)> {
        let mut segments = self.segments.write();
        segments
            .iter_mut()
            .filter_map(|(id, segment)| segment.start_position.take().map(|pos| (*id, pos)))
            .collect()
    }

    pub fn get_segment_statistics_updates(&self) -> Vec<SegmentStats> {
        self.segments
            .read()
            .iter()
            .map(|(id, segment)| SegmentStats {
                segment_id: *id,
                num_rows: segment.num_rows,
                checkpoint: segment.checkpoint.clone(),
            })
            .collect()
    }

    pub fn set_flushing(&self, segment_id: SegmentId, flushing: bool) -> Result<(), ReplicaError> {
        let mut segments = self.segments.write();
        let segment = segments.get_mut(&segment_id).ok_or(ReplicaError::Unknown(segment_id))?;
        segment.is_flushing = flushing;
        Ok(())
    }

    pub fn is_flushing(&self, segment_id: SegmentId) -> bool {
        self.segments
            .read()
            .get(&segment_id)
            .map(|s| s.is_flushing)
            .unwrap_or(false)
    }

    /// Called once a flush for `segment_id` has been acknowledged by the
    /// DC. Clears the in-flight flag; the segment's row/checkpoint state is
    /// left as-is since the DC, not the replica, is now the durable source
    /// of truth for what was flushed.
    pub fn segment_flushed(&self, segment_id: SegmentId) -> Result<(), ReplicaError> {
        self.set_flushing(segment_id, false)
    }

    pub fn segments_on_channel(&self, channel: &str) -> Vec<SegmentId> {
        self.segments
            .read()
            .iter()
            .filter(|(_, s)| s.channel == channel)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn channel_of(&self, segment_id: SegmentId) -> Option<String> {
        self.segments.read().get(&segment_id).map(|s| s.channel.clone())
    }

    pub fn collection_of(&self, segment_id: SegmentId) -> Option<CollectionId> {
        self.segments.read().get(&segment_id).map(|s| s.collection_id)
    }

    pub fn remove_channel(&self, channel: &str) {
        self.segments.write().retain(|_, s| s.channel != channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_is_drained_exactly_once() {
        let replica = SegmentReplica::new();
        replica.add_normal_segment(
            SegmentId(1),
            CollectionId(1),
            PartitionId(1),
            "ch-1",
            ChannelPosition::zero("ch-1"),
        );
        let first = replica.list_new_segments_start_positions();
        assert_eq!(first.len(), 1);
        let second = replica.list_new_segments_start_positions();
        assert!(second.is_empty());
    }

    #[test]
    fn add_rows_updates_checkpoint() {
        let replica = SegmentReplica::new();
        replica.add_normal_segment(
            SegmentId(1),
            CollectionId(1),
            PartitionId(1),
            "ch-1",
            ChannelPosition::zero("ch-1"),
        );
        let pos = ChannelPosition::new("ch-1", vec![1], 10);
        replica.add_rows(SegmentId(1), 50, pos.clone()).unwrap();
        let stats = replica.get_segment_statistics_updates();
        assert_eq!(stats[0].num_rows, 50);
        assert_eq!(stats[0].checkpoint, pos);
    }

    #[test]
    fn add_rows_on_unknown_segment_errors() {
        let replica = SegmentReplica::new();
        let err = replica.add_rows(SegmentId(99), 1, ChannelPosition::zero("ch-1"));
        assert!(matches!(err, Err(ReplicaError::Unknown(SegmentId(99)))));
    }

    #[test]
    fn recovered_segment_has_no_pending_start_position() {
        let replica = SegmentReplica::new();
        replica.add_flushed_segment(
            SegmentId(1),
            CollectionId(1),
            PartitionId(1),
            "ch-1",
            ChannelPosition::zero("ch-1"),
            100,
        );
        assert!(replica.list_new_segments_start_positions().is_empty());
    }
}
