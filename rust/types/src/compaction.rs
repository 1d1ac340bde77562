use std::fmt;

use chrono::{DateTime, Utc};

use crate::ids::{PlanId, SegmentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlanType {
    Merge,
    SingleMerge,
}

/// `Pipelining -> Executing -> {Completed | Timeout | Failed}`; terminal
/// states are immutable (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlanState {
    Pipelining,
    Executing,
    Completed,
    Timeout,
    Failed,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl PlanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Completed | PlanState::Timeout | PlanState::Failed)
    }

    pub fn can_transition_to(self, next: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, next),
            (Pipelining, Executing)
                | (Executing, Completed)
                | (Executing, Timeout)
                | (Executing, Failed)
                | (Pipelining, Failed)
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompactionTask {
    pub plan_id: PlanId,
    pub trigger_signal_id: u64,
    pub plan_type: PlanType,
    pub source_segment_ids: Vec<SegmentId>,
    pub result_segment_id: Option<SegmentId>,
    pub state: PlanState,
    /// Logical timestamp lower bound preserving MVCC visibility: segments
    /// with writes newer than `timetravel` are excluded from the plan.
    pub timetravel: u64,
    pub deadline: DateTime<Utc>,
}

impl CompactionTask {
    pub fn new_pipelining(
        plan_id: PlanId,
        trigger_signal_id: u64,
        plan_type: PlanType,
        source_segment_ids: Vec<SegmentId>,
        timetravel: u64,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            plan_id,
            trigger_signal_id,
            plan_type,
            source_segment_ids,
            result_segment_id: None,
            state: PlanState::Pipelining,
            timetravel,
            deadline,
        }
    }

    pub fn transition_to(&mut self, next: PlanState) -> Result<(), PlanTransitionError> {
        if self.state.is_terminal() {
            return Err(PlanTransitionError::Terminal(self.state));
        }
        if !self.state.can_transition_to(next) {
            return Err(PlanTransitionError::Illegal {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanTransitionError {
    #[error("compaction plan already in terminal state {0}")]
    Terminal(PlanState),
    #[error("illegal compaction plan transition {from} -> {to}")]
    Illegal { from: PlanState, to: PlanState },
}

impl segflow_error::ChromaError for PlanTransitionError {
    fn code(&self) -> segflow_error::ErrorCodes {
        segflow_error::ErrorCodes::FailedPrecondition
    }
}
