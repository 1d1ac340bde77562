//! C10: the `DataCoord` gRPC surface, wired over the C1-C6 collaborators.
//! Structured the way `rust-sysdb`'s `SysdbService` is: a service struct
//! holding its dependencies, a `run(self)` that builds a `tonic` server with
//! a health service and signal-based graceful shutdown, and a
//! `Configurable<DataCoordConfig>` impl used by the binary entrypoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use segflow_channel::ChannelManager;
use segflow_config::{registry::Registry, Configurable};
use segflow_error::ChromaError;
use segflow_metastore::{FlushUpdate, InMemoryMetaStore, MetaStore};
use segflow_proto::data_coord_server::{DataCoord, DataCoordServer};
use segflow_proto::data_node_client::DataNodeClient;
use segflow_proto::{
    allocation_to_proto, request_to_flush_pack, status_ok, AssignSegmentIdRequest,
    AssignSegmentIdResponse, ComponentStateCode, ComponentStates, CompleteCompactionRequest,
    FieldBinlog, FlushRequest, FlushResponse, GetComponentStatesRequest, GetRecoveryInfoRequest,
    GetRecoveryInfoResponse, ManualCompactionRequest, ManualCompactionResponse,
    RecoveryChannelInfo, SaveBinlogPathsRequest, SegmentBinlogs, Status as PbStatus,
    WatchChannelsRequest, WatchDmChannelsRequest,
};
use segflow_storage::Storage;
use segflow_types::{
    ChannelPosition, CollectionId, FieldId, PartitionId, PlanType, SegmentId, SegmentState,
};
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
};
use tonic::{transport::Server, Request, Response, Status};

use crate::compaction::CompactionHandler;
use crate::config::DataCoordConfig;
use crate::dispatch::GrpcDataNodeDispatcher;
use crate::flush_policy::FlushPolicy;
use crate::policy::PolicyStore;
use crate::segment_allocator::SegmentAllocator;

#[derive(Debug, thiserror::Error)]
#[error("not enough segments flushed yet")]
struct FlushPending;

pub struct DataCoordService {
    port: u16,
    #[allow(dead_code)]
    storage: Storage,
    meta: Arc<dyn MetaStore>,
    channels: Arc<ChannelManager>,
    allocator: Arc<SegmentAllocator>,
    flush_policy: Arc<FlushPolicy>,
    compaction: Arc<CompactionHandler>,
    data_nodes: HashMap<String, String>,
    /// Flips once `run` has bound the listener; every RPC checks this first
    /// (spec §4.10/§6: `UnexpectedError`/`serverNotServing`).
    serving: Arc<AtomicBool>,
}

impl DataCoordService {
    fn not_serving(&self) -> Option<Status> {
        if self.serving.load(Ordering::Acquire) {
            None
        } else {
            Some(Status::unavailable(
                segflow_types::StatusReason::ServerNotServing.as_str(),
            ))
        }
    }

    async fn dial_data_node(
        &self,
        node_id: &str,
    ) -> Result<DataNodeClient<tonic::transport::Channel>, Status> {
        let endpoint = self
            .data_nodes
            .get(node_id)
            .ok_or_else(|| Status::not_found(format!("unknown data node {node_id}")))?;
        DataNodeClient::connect(endpoint.clone())
            .await
            .map_err(|err| Status::unavailable(err.to_string()))
    }

    pub async fn run(self) {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let addr = format!("[::]:{}", self.port)
            .parse()
            .expect("failed to parse listen address");

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<DataCoordServer<DataCoordService>>()
            .await;
        self.serving.store(true, Ordering::Release);

        tracing::info!(%addr, "data coordinator listening");

        Server::builder()
            .add_service(health_service)
            .add_service(DataCoordServer::new(self))
            .serve_with_shutdown(addr, async move {
                select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
                }
            })
            .await
            .expect("data coordinator server failed");
    }
}

#[async_trait::async_trait]
impl Configurable<DataCoordConfig> for DataCoordService {
    async fn try_from_config(
        config: &DataCoordConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let storage = Storage::try_from_config(&config.storage, registry).await?;

        let meta: Arc<dyn MetaStore> = Arc::new(InMemoryMetaStore::new());
        let allocator: Arc<dyn segflow_allocator::Allocator> =
            Arc::new(segflow_allocator::LocalAllocator::new());
        let channels = Arc::new(ChannelManager::default());
        let policies = Arc::new(PolicyStore::new());

        for node_id in config.data_nodes.keys() {
            channels.register_node(node_id.clone());
        }

        let dispatcher: Arc<dyn crate::dispatch::DataNodeDispatcher> =
            Arc::new(GrpcDataNodeDispatcher::new(config.data_nodes.clone()));

        let flush_policy = Arc::new(FlushPolicy::new(
            meta.clone(),
            policies.clone(),
            channels.clone(),
            dispatcher.clone(),
            config.flush_scan_interval(),
        ));
        let segment_allocator = Arc::new(SegmentAllocator::new(
            meta.clone(),
            allocator.clone(),
            channels.clone(),
            policies.clone(),
            flush_policy.clone(),
            dispatcher,
        ));
        let compaction = Arc::new(CompactionHandler::new(meta.clone(), allocator.clone()));

        // FlushPolicy is shared with the RPC handlers (`Flush`,
        // `ManualCompaction` call `seal_all_segments` directly), so the
        // periodic scan runs as a plain background task over the same
        // `Arc` rather than taking exclusive ownership through the actor
        // system (spec §9's cyclic-reference note: break shared ownership
        // with the cheapest mechanism that still lets the owner tear down).
        let scan_policy = flush_policy.clone();
        let scan_interval = flush_policy.scan_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval);
            loop {
                ticker.tick().await;
                scan_policy.scan_all_tracked().await;
            }
        });

        Ok(DataCoordService {
            port: config.port,
            storage,
            meta,
            channels,
            allocator: segment_allocator,
            flush_policy,
            compaction,
            data_nodes: config.data_nodes.clone(),
            serving: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait::async_trait]
impl DataCoord for DataCoordService {
    async fn flush(
        &self,
        request: Request<FlushRequest>,
    ) -> Result<Response<FlushResponse>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        let sealed = self
            .flush_policy
            .seal_all_segments(CollectionId(req.collection_id))
            .await;
        Ok(Response::new(FlushResponse {
            status: Some(status_ok()),
            segment_ids: sealed.into_iter().map(|id| id.0).collect(),
        }))
    }

    async fn assign_segment_id(
        &self,
        request: Request<AssignSegmentIdRequest>,
    ) -> Result<Response<AssignSegmentIdResponse>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        let mut allocations = Vec::new();
        for alloc_req in req.requests {
            let allocated = self
                .allocator
                .alloc_segment(
                    CollectionId(alloc_req.collection_id),
                    PartitionId(alloc_req.partition_id),
                    &alloc_req.channel,
                    alloc_req.count as u64,
                )
                .await
                .map_err(|err| Status::internal(err.to_string()))?;
            for allocation in allocated {
                allocations.push(allocation_to_proto(&allocation, &alloc_req.channel));
            }
        }
        Ok(Response::new(AssignSegmentIdResponse {
            status: Some(status_ok()),
            allocations,
        }))
    }

    async fn save_binlog_paths(
        &self,
        request: Request<SaveBinlogPathsRequest>,
    ) -> Result<Response<PbStatus>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        let (pack, source_node_id) =
            request_to_flush_pack(req).map_err(|err| Status::invalid_argument(err.to_string()))?;

        let segment = self
            .meta
            .get_segment(pack.segment_id)
            .await
            .map_err(|err| Status::not_found(err.to_string()))?;
        if !self
            .channels
            .matches(segment.insert_channel(), &source_node_id)
        {
            return Ok(Response::new(
                segflow_types::StatusReason::ChannelNotWatched.into(),
            ));
        }

        let update = FlushUpdate {
            segment_id: pack.segment_id,
            flushed: pack.flushed,
            dropped: pack.dropped,
            binlogs: pack.insert_logs.into_iter().collect::<HashMap<FieldId, String>>(),
            statslogs: pack.stats_logs.into_iter().collect(),
            deltalogs: pack.delta_logs,
            checkpoint: pack.position,
        };
        self.meta
            .update_flush_segments_info(update)
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        Ok(Response::new(status_ok()))
    }

    async fn get_recovery_info(
        &self,
        request: Request<GetRecoveryInfoRequest>,
    ) -> Result<Response<GetRecoveryInfoResponse>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        let segments = self
            .meta
            .list_by_partition(CollectionId(req.collection_id), PartitionId(req.partition_id))
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        let binlogs = segments
            .iter()
            .map(|segment| SegmentBinlogs {
                segment_id: segment.segment_id.0,
                field_binlogs: flatten_logs(&segment.binlogs),
                statslogs: flatten_logs(&segment.statslogs),
                deltalogs: segment.deltalogs.iter().cloned().map(Into::into).collect(),
                num_rows: segment.num_rows,
            })
            .collect();

        let mut by_channel: HashMap<String, (Vec<i64>, Vec<i64>)> = HashMap::new();
        for segment in &segments {
            let entry = by_channel
                .entry(segment.insert_channel().to_string())
                .or_default();
            if segment.is_terminal() {
                entry.1.push(segment.segment_id.0);
            } else {
                entry.0.push(segment.segment_id.0);
            }
        }
        let mut channels = Vec::new();
        for (channel_name, (unflushed, flushed)) in by_channel {
            let seek_position = self
                .meta
                .channel_checkpoint(&channel_name)
                .await
                .unwrap_or_else(|| ChannelPosition::zero(channel_name.clone()));
            channels.push(RecoveryChannelInfo {
                channel_name,
                seek_position: Some(seek_position.into()),
                unflushed_segments: unflushed,
                flushed_segments: flushed,
            });
        }

        Ok(Response::new(GetRecoveryInfoResponse {
            status: Some(status_ok()),
            binlogs,
            channels,
        }))
    }

    async fn watch_channels(
        &self,
        request: Request<WatchChannelsRequest>,
    ) -> Result<Response<PbStatus>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        for channel_name in req.channel_names {
            let node_id = self
                .channels
                .watch(&channel_name, CollectionId(req.collection_id))
                .map_err(|err| Status::unavailable(err.to_string()))?;
            let mut client = self.dial_data_node(&node_id).await?;
            client
                .watch_dm_channels(WatchDmChannelsRequest {
                    channel_names: vec![channel_name.clone()],
                    collection_id: req.collection_id,
                })
                .await?;
            self.channels
                .ack_watch(&channel_name)
                .map_err(|err| Status::internal(err.to_string()))?;
        }
        Ok(Response::new(status_ok()))
    }

    async fn manual_compaction(
        &self,
        request: Request<ManualCompactionRequest>,
    ) -> Result<Response<ManualCompactionResponse>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        let sealed = self
            .flush_policy
            .seal_all_segments(CollectionId(req.collection_id))
            .await;

        // `seal_all_segments` only dispatches `FlushSegments` to the owning
        // data nodes; the binlogs land asynchronously via `SaveBinlogPaths`.
        // Poll briefly for them to land before giving up on compacting this
        // batch (spec §4.6 assumes flushed inputs; it does not itself wait).
        let wait_for_flush = || async {
            let mut flushed = Vec::new();
            for id in &sealed {
                if let Ok(segment) = self.meta.get_segment(*id).await {
                    if segment.state == SegmentState::Flushed {
                        flushed.push(*id);
                    }
                }
            }
            if flushed.len() >= 2 {
                Ok(flushed)
            } else {
                Err(FlushPending)
            }
        };
        let flushed = wait_for_flush
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(std::time::Duration::from_millis(50))
                    .with_max_delay(std::time::Duration::from_millis(500))
                    .with_max_times(8),
            )
            .await
            .unwrap_or_default();

        if flushed.len() < 2 {
            return Ok(Response::new(ManualCompactionResponse {
                status: Some(segflow_types::StatusReason::CompactionDisabled.into()),
                plan_id: 0,
            }));
        }
        let plan_id = self
            .compaction
            .submit_plan(
                flushed,
                PlanType::Merge,
                req.timetravel,
                Utc::now() + chrono::Duration::minutes(10),
            )
            .await
            .map_err(|err| Status::aborted(err.to_string()))?;
        Ok(Response::new(ManualCompactionResponse {
            status: Some(status_ok()),
            plan_id: plan_id.0,
        }))
    }

    async fn complete_compaction(
        &self,
        request: Request<CompleteCompactionRequest>,
    ) -> Result<Response<PbStatus>, Status> {
        if let Some(status) = self.not_serving() {
            return Err(status);
        }
        let req = request.into_inner();
        self.compaction
            .complete(
                segflow_types::PlanId(req.plan_id),
                SegmentId(req.result_segment_id),
                req.num_rows,
            )
            .await
            .map_err(|err| Status::internal(err.to_string()))?;
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
        Ok(Response::new(ComponentStates {
            state: state as i32,
        }))
    }
}

fn flatten_logs(logs: &HashMap<FieldId, Vec<String>>) -> Vec<FieldBinlog> {
    logs.iter()
        .flat_map(|(field, paths)| {
            paths.iter().map(move |path| FieldBinlog {
                field_id: field.0,
                path: path.clone(),
            })
        })
        .collect()
}
