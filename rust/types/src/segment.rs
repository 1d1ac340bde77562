use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::{CollectionId, FieldId, PartitionId, SegmentId};
use crate::position::ChannelPosition;
use segflow_error::{ChromaError, ErrorCodes};

/// Lattice from spec.md I2: `Growing -> Sealed -> Flushing -> Flushed`, with
/// `Dropped` reachable from any state. No transition reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SegmentState {
    Growing,
    Sealed,
    Flushing,
    Flushed,
    Dropped,
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Error, Debug)]
#[error("illegal segment state transition {from} -> {to}")]
pub struct IllegalStateTransition {
    pub from: SegmentState,
    pub to: SegmentState,
}

impl ChromaError for IllegalStateTransition {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::FailedPrecondition
    }
}

impl SegmentState {
    /// Enforces I2. `Dropped` is reachable from every state including
    /// itself (dropping an already-dropped segment is a no-op, not an
    /// error, since `SaveBinlogPaths`/compaction completion are each
    /// idempotent).
    pub fn can_transition_to(self, next: SegmentState) -> bool {
        use SegmentState::*;
        match (self, next) {
            (Growing, Sealed) => true,
            (Sealed, Flushing) => true,
            (Flushing, Flushed) => true,
            (_, Dropped) => true,
            (a, b) if a == b && a != Dropped => true,
            _ => false,
        }
    }
}

/// A delete log: a bucketed range of primary-key deletes flushed for one
/// segment, with the row count and logical time range it covers (used to
/// compute delete-log ratio for compaction triggers, §4.6b).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeltaLogInfo {
    pub path: String,
    pub num_rows: u64,
    pub timestamp_from: u64,
    pub timestamp_to: u64,
}

/// Essential attributes of a segment per spec.md §3. `(collection_id,
/// partition_id, insert_channel)` is immutable after construction (I1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    collection_id: CollectionId,
    partition_id: PartitionId,
    insert_channel: String,
    pub state: SegmentState,
    pub num_rows: u64,
    pub max_rows: u64,
    pub start_position: Option<ChannelPosition>,
    pub dml_position: Option<ChannelPosition>,
    pub binlogs: HashMap<FieldId, Vec<String>>,
    pub statslogs: HashMap<FieldId, Vec<String>>,
    pub deltalogs: Vec<DeltaLogInfo>,
    pub compaction_from: Vec<SegmentId>,
    pub created_by_compaction: bool,
    pub last_expire_time: Option<DateTime<Utc>>,
}

impl SegmentInfo {
    pub fn new_growing(
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        insert_channel: impl Into<String>,
        max_rows: u64,
        start_position: ChannelPosition,
    ) -> Self {
        Self {
            segment_id,
            collection_id,
            partition_id,
            insert_channel: insert_channel.into(),
            state: SegmentState::Growing,
            num_rows: 0,
            max_rows,
            start_position: Some(start_position),
            dml_position: None,
            binlogs: HashMap::new(),
            statslogs: HashMap::new(),
            deltalogs: Vec::new(),
            compaction_from: Vec::new(),
            created_by_compaction: false,
            last_expire_time: None,
        }
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn insert_channel(&self) -> &str {
        &self.insert_channel
    }

    /// Enforces I2 in-place; callers (the meta store's CAS update) are
    /// responsible for persisting the result atomically.
    pub fn transition_to(&mut self, next: SegmentState) -> Result<(), IllegalStateTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Enforces I3: `num_rows` is non-decreasing while Growing, frozen once
    /// Sealed or later.
    pub fn add_rows(&mut self, rows: u64) -> Result<(), IllegalStateTransition> {
        if self.state != SegmentState::Growing {
            return Err(IllegalStateTransition {
                from: self.state,
                to: self.state,
            });
        }
        self.num_rows += rows;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SegmentState::Flushed | SegmentState::Dropped)
    }
}

/// A short-lived row-capacity reservation on a Growing segment. Multiple
/// allocations may coexist on one segment until it is sealed.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Allocation {
    pub segment_id: SegmentId,
    pub num_of_rows: u64,
    pub expire_time: DateTime<Utc>,
}

impl Allocation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg() -> SegmentInfo {
        SegmentInfo::new_growing(
            SegmentId(1),
            CollectionId(1),
            PartitionId(1),
            "ch-1",
            1000,
            ChannelPosition::zero("ch-1"),
        )
    }

    #[test]
    fn lattice_forward_only() {
        let mut s = seg();
        assert!(s.transition_to(SegmentState::Sealed).is_ok());
        assert!(s.transition_to(SegmentState::Flushing).is_ok());
        assert!(s.transition_to(SegmentState::Flushed).is_ok());
        // No reverse transitions.
        assert!(s.transition_to(SegmentState::Sealed).is_err());
        assert!(s.transition_to(SegmentState::Growing).is_err());
    }

    #[test]
    fn dropped_reachable_from_any_state() {
        for start in [
            SegmentState::Growing,
            SegmentState::Sealed,
            SegmentState::Flushing,
            SegmentState::Flushed,
        ] {
            let mut s = seg();
            s.state = start;
            assert!(s.transition_to(SegmentState::Dropped).is_ok());
        }
    }

    #[test]
    fn skipping_states_is_illegal() {
        let mut s = seg();
        assert!(s.transition_to(SegmentState::Flushing).is_err());
        assert!(s.transition_to(SegmentState::Flushed).is_err());
    }

    #[test]
    fn rows_frozen_once_sealed() {
        let mut s = seg();
        s.add_rows(100).unwrap();
        assert_eq!(s.num_rows, 100);
        s.transition_to(SegmentState::Sealed).unwrap();
        assert!(s.add_rows(1).is_err());
        assert_eq!(s.num_rows, 100);
    }
}
