use std::collections::HashMap;

use segflow_types::{
    Allocation, ChannelPosition, DeltaLogInfo, FlushPack, RpcError, SegmentId, StatusReason,
};

use crate::segflow_proto as pb;

#[derive(Debug, thiserror::Error)]
pub enum ProtoConversionError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
}

impl segflow_error::ChromaError for ProtoConversionError {
    fn code(&self) -> segflow_error::ErrorCodes {
        segflow_error::ErrorCodes::InvalidArgument
    }
}

impl From<ChannelPosition> for pb::ChannelPosition {
    fn from(value: ChannelPosition) -> Self {
        pb::ChannelPosition {
            channel_name: value.channel_name,
            msg_id: value.msg_id,
            timestamp: value.timestamp,
        }
    }
}

impl From<pb::ChannelPosition> for ChannelPosition {
    fn from(value: pb::ChannelPosition) -> Self {
        ChannelPosition::new(value.channel_name, value.msg_id, value.timestamp)
    }
}

impl From<DeltaLogInfo> for pb::DeltaLogInfo {
    fn from(value: DeltaLogInfo) -> Self {
        pb::DeltaLogInfo {
            path: value.path,
            row_count: value.num_rows,
            time_start: value.timestamp_from,
            time_end: value.timestamp_to,
        }
    }
}

impl From<pb::DeltaLogInfo> for DeltaLogInfo {
    fn from(value: pb::DeltaLogInfo) -> Self {
        DeltaLogInfo {
            path: value.path,
            num_rows: value.row_count,
            timestamp_from: value.time_start,
            timestamp_to: value.time_end,
        }
    }
}

/// `(SegmentId, Allocation, channel)` because `Allocation` itself carries no
/// channel (it is scoped by the request that produced it).
pub fn allocation_to_proto(alloc: &Allocation, channel: &str) -> pb::SegmentAllocation {
    pb::SegmentAllocation {
        segment_id: alloc.segment_id.0,
        count: alloc.num_of_rows as u32,
        expire_time: alloc.expire_time.timestamp(),
        channel: channel.to_string(),
    }
}

pub fn flush_pack_to_request(pack: FlushPack, source_node_id: &str) -> pb::SaveBinlogPathsRequest {
    pb::SaveBinlogPathsRequest {
        segment_id: pack.segment_id.0,
        source_node_id: source_node_id.to_string(),
        flushed: pack.flushed,
        dropped: pack.dropped,
        field2_binlog: pack
            .insert_logs
            .into_iter()
            .map(|(field, path)| pb::FieldBinlog {
                field_id: field.0,
                path,
            })
            .collect(),
        field2_statslog: pack
            .stats_logs
            .into_iter()
            .map(|(field, path)| pb::FieldBinlog {
                field_id: field.0,
                path,
            })
            .collect(),
        deltalogs: pack.delta_logs.into_iter().map(Into::into).collect(),
        position: Some(pack.position.into()),
    }
}

pub fn request_to_flush_pack(
    req: pb::SaveBinlogPathsRequest,
) -> Result<(FlushPack, String), ProtoConversionError> {
    let position = req
        .position
        .ok_or(ProtoConversionError::MissingField("position"))?
        .into();
    let insert_logs: HashMap<_, _> = req
        .field2_binlog
        .into_iter()
        .map(|fb| (segflow_types::FieldId(fb.field_id), fb.path))
        .collect();
    let stats_logs: HashMap<_, _> = req
        .field2_statslog
        .into_iter()
        .map(|fb| (segflow_types::FieldId(fb.field_id), fb.path))
        .collect();
    Ok((
        FlushPack {
            segment_id: SegmentId(req.segment_id),
            insert_logs,
            stats_logs,
            delta_logs: req.deltalogs.into_iter().map(Into::into).collect(),
            position,
            flushed: req.flushed,
            dropped: req.dropped,
            err: None,
        },
        req.source_node_id,
    ))
}

/// A newly-created growing segment pushed to the owning DN's replica
/// (spec §4.4/§4.7), as opposed to the batch view `GetRecoveryInfo` returns.
pub fn new_segment_to_proto(
    segment_id: SegmentId,
    collection_id: segflow_types::CollectionId,
    partition_id: segflow_types::PartitionId,
    channel: &str,
    start_position: ChannelPosition,
) -> pb::NewSegmentInfo {
    pb::NewSegmentInfo {
        segment_id: segment_id.0,
        collection_id: collection_id.0,
        partition_id: partition_id.0,
        channel: channel.to_string(),
        start_position: Some(start_position.into()),
    }
}

impl From<StatusReason> for pb::Status {
    fn from(reason: StatusReason) -> Self {
        pb::Status {
            error_code: pb::ErrorCode::UnexpectedError as i32,
            reason: reason.as_str().to_string(),
            detail: String::new(),
        }
    }
}

impl From<&RpcError> for pb::Status {
    fn from(err: &RpcError) -> Self {
        pb::Status {
            error_code: pb::ErrorCode::UnexpectedError as i32,
            reason: err.reason.as_str().to_string(),
            detail: err.message.clone(),
        }
    }
}

pub fn status_ok() -> pb::Status {
    pb::Status {
        error_code: pb::ErrorCode::Success as i32,
        reason: String::new(),
        detail: String::new(),
    }
}
