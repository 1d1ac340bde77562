pub mod channel;
pub mod compaction;
pub mod errors;
pub mod flush;
pub mod ids;
pub mod position;
pub mod segment;

pub use channel::{ChannelInfo, WatchState};
pub use compaction::{CompactionTask, PlanState, PlanType};
pub use errors::{
    AllocSegmentError, AllocatorError, CompactionError, MetaStoreError, RpcError, StatusReason,
};
pub use flush::FlushPack;
pub use ids::{CollectionId, FieldId, PartitionId, PlanId, SegmentId};
pub use position::ChannelPosition;
pub use segment::{Allocation, DeltaLogInfo, IllegalStateTransition, SegmentInfo, SegmentState};
