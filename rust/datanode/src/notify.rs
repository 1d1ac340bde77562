//! `notifyFunc` (spec §4.9/§7): reports a completed flush to the DC via
//! `SaveBinlogPaths`, retrying transient RPC failures with exponential
//! backoff indefinitely — safe because the meta update is idempotent on
//! `(segmentID, position)`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};

use segflow_proto::data_coord_client::DataCoordClient;
use segflow_proto::{flush_pack_to_request, ErrorCode};
use segflow_types::{FlushPack, StatusReason};
use tonic::transport::Channel;

#[derive(Debug)]
pub enum NotifyError {
    /// The DC rejected this report because the channel is no longer owned
    /// by this node (spec §7 stale-owner); fatal for this flow graph only.
    ChannelNotWatched,
    /// Anything else non-retryable; fatal for the whole process.
    Fatal(String),
}

#[async_trait]
pub trait FlushNotifier: Send + Sync {
    async fn notify(&self, pack: FlushPack) -> Result<(), NotifyError>;
}

pub struct GrpcFlushNotifier {
    client: DataCoordClient<Channel>,
    node_id: String,
}

impl GrpcFlushNotifier {
    pub fn new(client: DataCoordClient<Channel>, node_id: impl Into<String>) -> Self {
        GrpcFlushNotifier {
            client,
            node_id: node_id.into(),
        }
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(30))
            .without_max_times()
            .with_jitter()
    }
}

#[async_trait]
impl FlushNotifier for GrpcFlushNotifier {
    async fn notify(&self, pack: FlushPack) -> Result<(), NotifyError> {
        let segment_id = pack.segment_id;
        let request = flush_pack_to_request(pack, &self.node_id);
        let client = self.client.clone();

        let attempt = || {
            let mut client = client.clone();
            let request = request.clone();
            async move { client.save_binlog_paths(request).await }
        };

        let response = attempt
            .retry(Self::backoff())
            .when(|status: &tonic::Status| {
                matches!(
                    status.code(),
                    tonic::Code::Unavailable
                        | tonic::Code::DeadlineExceeded
                        | tonic::Code::Aborted
                        | tonic::Code::ResourceExhausted
                )
            })
            .notify(|err, dur| {
                tracing::warn!(%segment_id, %err, ?dur, "retrying SaveBinlogPaths");
            })
            .await
            .map_err(|err| NotifyError::Fatal(err.to_string()))?;

        let status = response.into_inner();
        if status.error_code == ErrorCode::Success as i32 {
            return Ok(());
        }
        match StatusReason::parse(&status.reason) {
            Some(StatusReason::ChannelNotWatched) => Err(NotifyError::ChannelNotWatched),
            _ => Err(NotifyError::Fatal(status.detail)),
        }
    }
}

/// Test/in-process notifier that records packs instead of calling out over
/// RPC; used by the flow graph's own tests.
pub struct RecordingNotifier {
    pub packs: Arc<parking_lot::Mutex<Vec<FlushPack>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier {
            packs: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlushNotifier for RecordingNotifier {
    async fn notify(&self, pack: FlushPack) -> Result<(), NotifyError> {
        self.packs.lock().push(pack);
        Ok(())
    }
}
