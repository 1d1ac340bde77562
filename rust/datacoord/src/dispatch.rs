//! DC -> DN dispatch (spec §4.10): the two calls the coordinator makes into
//! a data node outside of the initial `WatchDmChannels` handshake —
//! registering a newly allocated segment on an already-watched channel, and
//! forwarding a seal as a `FlushSegments` signal. Mirrors
//! `DataCoordService::dial_data_node`'s dial-per-call approach since both
//! call sites need it independently of the RPC surface's own connection.

use std::collections::HashMap;

use async_trait::async_trait;

use segflow_proto::data_node_client::DataNodeClient;
use segflow_proto::{new_segment_to_proto, FlushSegmentsRequest, SyncSegmentsRequest};
use segflow_types::{ChannelPosition, CollectionId, PartitionId, SegmentId};
use tonic::transport::Channel;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown data node {0}")]
    UnknownNode(String),
    #[error("failed to reach data node {0}: {1}")]
    Unreachable(String, String),
}

/// The DC-side half of the two calls a data node doesn't learn about
/// through `WatchDmChannels`'s one-shot recovery snapshot.
#[async_trait]
pub trait DataNodeDispatcher: Send + Sync {
    async fn sync_new_segment(
        &self,
        node_id: &str,
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channel: &str,
        start_position: ChannelPosition,
    ) -> Result<(), DispatchError>;

    async fn flush_segments(
        &self,
        node_id: &str,
        segment_ids: Vec<SegmentId>,
    ) -> Result<(), DispatchError>;
}

pub struct GrpcDataNodeDispatcher {
    data_nodes: HashMap<String, String>,
}

impl GrpcDataNodeDispatcher {
    pub fn new(data_nodes: HashMap<String, String>) -> Self {
        GrpcDataNodeDispatcher { data_nodes }
    }

    async fn dial(&self, node_id: &str) -> Result<DataNodeClient<Channel>, DispatchError> {
        let endpoint = self
            .data_nodes
            .get(node_id)
            .ok_or_else(|| DispatchError::UnknownNode(node_id.to_string()))?;
        DataNodeClient::connect(endpoint.clone())
            .await
            .map_err(|err| DispatchError::Unreachable(node_id.to_string(), err.to_string()))
    }
}

#[async_trait]
impl DataNodeDispatcher for GrpcDataNodeDispatcher {
    async fn sync_new_segment(
        &self,
        node_id: &str,
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channel: &str,
        start_position: ChannelPosition,
    ) -> Result<(), DispatchError> {
        let mut client = self.dial(node_id).await?;
        client
            .sync_segments(SyncSegmentsRequest {
                segments: vec![new_segment_to_proto(
                    segment_id,
                    collection_id,
                    partition_id,
                    channel,
                    start_position,
                )],
            })
            .await
            .map_err(|err| DispatchError::Unreachable(node_id.to_string(), err.to_string()))?;
        Ok(())
    }

    async fn flush_segments(
        &self,
        node_id: &str,
        segment_ids: Vec<SegmentId>,
    ) -> Result<(), DispatchError> {
        let mut client = self.dial(node_id).await?;
        client
            .flush_segments(FlushSegmentsRequest {
                segment_ids: segment_ids.into_iter().map(|id| id.0).collect(),
                collection_id: 0,
            })
            .await
            .map_err(|err| DispatchError::Unreachable(node_id.to_string(), err.to_string()))?;
        Ok(())
    }
}

/// Test double that records calls instead of dialing anything.
#[cfg(test)]
pub struct RecordingDispatcher {
    pub synced: parking_lot::Mutex<Vec<(String, SegmentId)>>,
    pub flushed: parking_lot::Mutex<Vec<(String, Vec<SegmentId>)>>,
}

#[cfg(test)]
impl RecordingDispatcher {
    pub fn new() -> Self {
        RecordingDispatcher {
            synced: parking_lot::Mutex::new(Vec::new()),
            flushed: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl DataNodeDispatcher for RecordingDispatcher {
    async fn sync_new_segment(
        &self,
        node_id: &str,
        segment_id: SegmentId,
        _collection_id: CollectionId,
        _partition_id: PartitionId,
        _channel: &str,
        _start_position: ChannelPosition,
    ) -> Result<(), DispatchError> {
        self.synced.lock().push((node_id.to_string(), segment_id));
        Ok(())
    }

    async fn flush_segments(
        &self,
        node_id: &str,
        segment_ids: Vec<SegmentId>,
    ) -> Result<(), DispatchError> {
        self.flushed.lock().push((node_id.to_string(), segment_ids));
        Ok(())
    }
}
