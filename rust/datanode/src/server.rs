use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use segflow_config::{registry::Registry, Configurable};
use segflow_error::ChromaError;
use segflow_proto::data_coord_client::DataCoordClient;
use segflow_proto::data_node_server::{DataNode, DataNodeServer};
use segflow_proto::{
    status_ok, ComponentStateCode, ComponentStates, FlushSegmentsRequest, GetComponentStatesRequest,
    GetRecoveryInfoRequest, Status as PbStatus, SyncSegmentsRequest, WatchDmChannelsRequest,
};
use segflow_storage::Storage;
use segflow_system::System;
use segflow_types::{ChannelPosition, CollectionId, PartitionId, SegmentId};
use tokio::signal::unix::{signal, SignalKind};
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

use crate::config::DataNodeConfig;
use crate::flow_graph::{FlowGraph, FlowGraphConfig};
use crate::flush_manager::RendezvousFlushManager;
use crate::notify::GrpcFlushNotifier;
use crate::replica::SegmentReplica;

#[derive(Debug, thiserror::Error)]
enum DataNodeStartupError {
    #[error("failed to dial data coordinator at startup: {0}")]
    DataCoordUnreachable(#[from] tonic::transport::Error),
}

impl ChromaError for DataNodeStartupError {
    fn code(&self) -> segflow_error::ErrorCodes {
        segflow_error::ErrorCodes::Unavailable
    }
}

/// DC↔DN RPC surface (spec §4.10), the data-node side: `WatchDmChannels`
/// spins up a flow graph for each newly-assigned channel (recovering its
/// existing segments from the DC's `GetRecoveryInfo` first); `FlushSegments`
/// forwards the DC's `flushCh` signal into the right channel's flow graph.
pub struct DataNodeService {
    port: u16,
    node_id: String,
    data_coord_addr: String,
    #[allow(dead_code)]
    storage: Arc<Storage>,
    replica: Arc<SegmentReplica>,
    flush_manager: Arc<RendezvousFlushManager>,
    flow_config: FlowGraphConfig,
    system: System,
    channels: Mutex<HashMap<String, Arc<FlowGraph>>>,
    serving: Arc<AtomicBool>,
}

impl DataNodeService {
    fn not_serving(&self) -> Option<PbStatus> {
        if self.serving.load(Ordering::Acquire) {
            None
        } else {
            Some(segflow_types::StatusReason::ServerNotServing.into())
        }
    }

    async fn dial_data_coord(&self) -> Result<DataCoordClient<Channel>, tonic::transport::Error> {
        DataCoordClient::connect(self.data_coord_addr.clone()).await
    }

    pub async fn run(self) {
        let health_reporter = tonic_health::server::health_reporter();
        let (health_reporter, health_service) = health_reporter;
        health_reporter
            .set_serving::<DataNodeServer<DataNodeService>>()
            .await;

        let serving = self.serving.clone();
        let port = self.port;
        serving.store(true, Ordering::Release);

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let shutdown = async move {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            tracing::info!("data node received shutdown signal");
        };

        let addr = format!("0.0.0.0:{port}").parse().expect("invalid bind address");
        tracing::info!(%addr, "starting data node gRPC server");

        if let Err(err) = Server::builder()
            .add_service(health_service)
            .add_service(DataNodeServer::new(self))
            .serve_with_shutdown(addr, shutdown)
            .await
        {
            tracing::error!(%err, "data node server exited with error");
        }
    }
}

#[async_trait::async_trait]
impl Configurable<DataNodeConfig> for DataNodeService {
    async fn try_from_config(config: &DataNodeConfig, registry: &Registry) -> Result<Self, Box<dyn ChromaError>> {
        let storage = Arc::new(Storage::try_from_config(&config.storage, registry).await?);
        let replica = Arc::new(SegmentReplica::new());

        let notify_client = DataCoordClient::connect(config.data_coord_addr.clone())
            .await
            .map_err(|err| Box::new(DataNodeStartupError::from(err)) as Box<dyn ChromaError>)?;
        let notifier = Arc::new(GrpcFlushNotifier::new(notify_client, config.node_id.clone()));
        let flush_manager = Arc::new(RendezvousFlushManager::new(notifier));

        Ok(DataNodeService {
            port: config.port,
            node_id: config.node_id.clone(),
            data_coord_addr: config.data_coord_addr.clone(),
            storage,
            replica,
            flush_manager,
            flow_config: config.flow_graph.clone(),
            system: System::new(),
            channels: Mutex::new(HashMap::new()),
            serving: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait::async_trait]
impl DataNode for DataNodeService {
    async fn watch_dm_channels(
        &self,
        request: Request<WatchDmChannelsRequest>,
    ) -> Result<Response<PbStatus>, Status> {
        if let Some(status) = self.not_serving() {
            return Ok(Response::new(status));
        }
        let req = request.into_inner();

        let recovery = match self.dial_data_coord().await {
            Ok(mut client) => client
                .get_recovery_info(GetRecoveryInfoRequest {
                    collection_id: req.collection_id,
                    partition_id: 0,
                })
                .await
                .map(|r| r.into_inner()),
            Err(err) => Err(tonic::Status::unavailable(err.to_string())),
        };

        let recovery = match recovery {
            Ok(recovery) => Some(recovery),
            Err(err) => {
                tracing::warn!(%err, "recovery info unavailable, watching channels cold");
                None
            }
        };

        for channel_name in &req.channel_names {
            let graph = Arc::new(FlowGraph::build(
                &self.system,
                &self.flow_config,
                self.replica.clone(),
                self.flush_manager.clone(),
                self.storage.clone(),
            ));

            if let Some(recovery) = &recovery {
                let by_segment: HashMap<i64, &segflow_proto::SegmentBinlogs> =
                    recovery.binlogs.iter().map(|b| (b.segment_id, b)).collect();
                if let Some(info) = recovery.channels.iter().find(|c| &c.channel_name == channel_name) {
                    let seek = info
                        .seek_position
                        .clone()
                        .map(ChannelPosition::from)
                        .unwrap_or_else(|| ChannelPosition::zero(channel_name.clone()));
                    for segment_id in info.unflushed_segments.iter().chain(info.flushed_segments.iter()) {
                        let num_rows = by_segment.get(segment_id).map(|b| b.num_rows).unwrap_or(0);
                        self.replica.add_flushed_segment(
                            SegmentId(*segment_id),
                            CollectionId(req.collection_id),
                            PartitionId(0),
                            channel_name.clone(),
                            seek.clone(),
                            num_rows,
                        );
                    }
                }
            }

            self.channels.lock().insert(channel_name.clone(), graph);
            tracing::info!(channel = %channel_name, node_id = %self.node_id, "now watching channel");
        }

        Ok(Response::new(status_ok()))
    }

    async fn flush_segments(
        &self,
        request: Request<FlushSegmentsRequest>,
    ) -> Result<Response<PbStatus>, Status> {
        if let Some(status) = self.not_serving() {
            return Ok(Response::new(status));
        }
        let req = request.into_inner();

        let mut by_channel: HashMap<String, Vec<SegmentId>> = HashMap::new();
        for segment_id in &req.segment_ids {
            if let Some(channel) = self.replica.channel_of(SegmentId(*segment_id)) {
                by_channel.entry(channel).or_default().push(SegmentId(*segment_id));
            }
        }

        let targets: Vec<(Arc<FlowGraph>, Vec<SegmentId>)> = {
            let channels = self.channels.lock();
            by_channel
                .into_iter()
                .filter_map(|(channel, ids)| channels.get(&channel).cloned().map(|g| (g, ids)))
                .collect()
        };
        for (graph, ids) in targets {
            graph.force_flush(ids).await;
        }

        Ok(Response::new(status_ok()))
    }

    async fn sync_segments(
        &self,
        request: Request<SyncSegmentsRequest>,
    ) -> Result<Response<PbStatus>, Status> {
        if let Some(status) = self.not_serving() {
            return Ok(Response::new(status));
        }
        let req = request.into_inner();
        for segment in req.segments {
            let start_position = segment
                .start_position
                .map(ChannelPosition::from)
                .unwrap_or_else(|| ChannelPosition::zero(segment.channel.clone()));
            self.replica.add_normal_segment(
                SegmentId(segment.segment_id),
                CollectionId(segment.collection_id),
                PartitionId(segment.partition_id),
                segment.channel,
                start_position,
            );
        }
        Ok(Response::new(status_ok()))
    }

    async fn get_component_states(
        &self,
        _request: Request<GetComponentStatesRequest>,
    ) -> Result<Response<ComponentStates>, Status> {
        let state = if self.serving.load(Ordering::Acquire) {
            ComponentStateCode::Healthy
        } else {
            ComponentStateCode::NotReady
        };
        Ok(Response::new(ComponentStates { state: state as i32 }))
    }
}
