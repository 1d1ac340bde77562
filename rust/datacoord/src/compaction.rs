//! Compaction Trigger/Handler (spec §4.6). Owns the `Pipelining ->
//! Executing -> {Completed | Timeout | Failed}` plan lifecycle and the
//! tie-break rule for concurrent plans touching the same source segment.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use segflow_allocator::Allocator;
use segflow_metastore::MetaStore;
use segflow_types::{
    CompactionError, CompactionTask, PlanId, PlanState, PlanType, SegmentId, SegmentInfo,
};

/// Tracks which segment IDs are already claimed by a non-terminal plan, to
/// enforce the first-submitted-wins tie-break.
#[derive(Default)]
struct Claims {
    claimed_by: HashMap<SegmentId, PlanId>,
}

pub struct CompactionHandler {
    meta: Arc<dyn MetaStore>,
    allocator: Arc<dyn Allocator>,
    claims: Mutex<Claims>,
}

impl CompactionHandler {
    pub fn new(meta: Arc<dyn MetaStore>, allocator: Arc<dyn Allocator>) -> Self {
        CompactionHandler {
            meta,
            allocator,
            claims: Mutex::new(Claims::default()),
        }
    }

    /// Submits a new plan over `sources`. Fails with `ConflictingCompaction`
    /// if any source is already claimed by a non-terminal plan — the
    /// earlier submission wins.
    pub async fn submit_plan(
        &self,
        sources: Vec<SegmentId>,
        plan_type: PlanType,
        timetravel: u64,
        deadline: DateTime<Utc>,
    ) -> Result<PlanId, CompactionError> {
        {
            let claims = self.claims.lock();
            for source in &sources {
                if let Some(existing) = claims.claimed_by.get(source) {
                    tracing::warn!(segment_id = %source, plan_id = %existing, "compaction conflict");
                    return Err(CompactionError::ConflictingCompaction(*source));
                }
            }
        }

        let (plan_id, trigger_signal_id) = self.allocator.alloc_id_batch(1).await?;
        let task = CompactionTask::new_pipelining(
            PlanId(plan_id),
            trigger_signal_id as u64,
            plan_type,
            sources.clone(),
            timetravel,
            deadline,
        );
        self.meta.insert_compaction_plan(task).await?;

        let mut claims = self.claims.lock();
        for source in sources {
            claims.claimed_by.insert(source, PlanId(plan_id));
        }

        Ok(PlanId(plan_id))
    }

    /// Transitions a plan to `Executing` once it has been handed to the DN
    /// owning the channel.
    pub async fn mark_executing(&self, plan_id: PlanId) -> Result<(), CompactionError> {
        let mut plan = self.meta.get_compaction_plan(plan_id).await?;
        plan.transition_to(PlanState::Executing)
            .map_err(|_| CompactionError::IllegalTransition(plan_id))?;
        self.meta.update_compaction_plan(plan).await?;
        Ok(())
    }

    /// `CompleteCompaction(result)`: atomically inserts the result segment
    /// (with `compactionFrom = sources`), marks sources `Dropped`, and
    /// releases their claims.
    pub async fn complete(
        &self,
        plan_id: PlanId,
        result_segment_id: SegmentId,
        num_rows: u64,
    ) -> Result<(), CompactionError> {
        let plan = self.meta.get_compaction_plan(plan_id).await?;
        let source = self
            .meta
            .get_segment(*plan.source_segment_ids.first().ok_or(CompactionError::PlanNotFound(plan_id))?)
            .await?;

        let mut result = SegmentInfo::new_growing(
            result_segment_id,
            source.collection_id(),
            source.partition_id(),
            source.insert_channel(),
            source.max_rows,
            segflow_types::ChannelPosition::zero(source.insert_channel()),
        );
        result.created_by_compaction = true;
        result.compaction_from = plan.source_segment_ids.clone();
        result.num_rows = num_rows;
        let _ = result.transition_to(segflow_types::SegmentState::Flushed);

        self.meta
            .complete_compaction(plan_id, result, &plan.source_segment_ids, None)
            .await?;

        let mut claims = self.claims.lock();
        for source in &plan.source_segment_ids {
            claims.claimed_by.remove(source);
        }

        Ok(())
    }

    /// Moves a plan to `Timeout` without dropping its sources — they
    /// remain valid and reusable once the claim is released.
    pub async fn timeout(&self, plan_id: PlanId) -> Result<(), CompactionError> {
        let mut plan = self.meta.get_compaction_plan(plan_id).await?;
        plan.transition_to(PlanState::Timeout)
            .map_err(|_| CompactionError::IllegalTransition(plan_id))?;
        let sources = plan.source_segment_ids.clone();
        self.meta.update_compaction_plan(plan).await?;

        let mut claims = self.claims.lock();
        for source in sources {
            claims.claimed_by.remove(&source);
        }
        Ok(())
    }
}
