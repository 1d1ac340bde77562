use std::collections::HashMap;

use crate::ids::{FieldId, SegmentId};
use crate::position::ChannelPosition;
use crate::segment::DeltaLogInfo;

/// A data-node -> data-coordinator flush report (spec.md §3). `err` carries
/// the fatal flush-write failure that causes `notifyFunc` to panic the node
/// (spec.md §4.9/§9) rather than ever being delivered over the RPC surface.
#[derive(Debug, Clone)]
pub struct FlushPack {
    pub segment_id: SegmentId,
    pub insert_logs: HashMap<FieldId, String>,
    pub stats_logs: HashMap<FieldId, String>,
    pub delta_logs: Vec<DeltaLogInfo>,
    pub position: ChannelPosition,
    pub flushed: bool,
    pub dropped: bool,
    pub err: Option<String>,
}

impl FlushPack {
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}
