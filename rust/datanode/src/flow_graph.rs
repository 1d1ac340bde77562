//! DN Flow Graph (spec §4.8): a fixed four-node pipeline per virtual
//! channel — stream source, DD filter, insert buffer, delete buffer — each
//! modeled as a `segflow_system::Component` so the bounded mpsc queue
//! feeding each one gives the ordering and backpressure guarantees spec
//! §4.8/§5 call for: messages flow through each node in the order they
//! arrive, and a full queue suspends the sender.
//!
//! The four nodes share the capability set spec §9 calls for
//! (`Handler<FlowMessage>`, effectively `Process(batch) -> batch'`) by all
//! handling the same message enum and forwarding what they don't consume,
//! rather than a deep per-node trait hierarchy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use segflow_storage::Storage;
use segflow_system::{Component, ComponentContext, ComponentHandle, Handler, ReceiverForMessage, System};
use segflow_types::{ChannelPosition, CollectionId, DeltaLogInfo, FieldId, FlushPack, SegmentId};

use crate::flush_manager::{FlushWork, RendezvousFlushManager};
use crate::replica::SegmentReplica;

/// One tuple emitted by the stream source: insert/delete row deltas keyed
/// by the segment they belong to, plus the position they advance the
/// channel to.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    pub collection_id: CollectionId,
    pub insert_rows: HashMap<SegmentId, u64>,
    pub deletes: HashMap<SegmentId, Vec<DeltaLogInfo>>,
    pub position: ChannelPosition,
}

#[derive(Debug, Clone)]
pub enum FlowMessage {
    Batch(StreamBatch),
    /// The `flushCh` signal (spec §4.5/§4.8): force these segments to
    /// flush now regardless of threshold.
    ForceFlush(Vec<SegmentId>),
    /// Emitted by the DD filter when its collection is dropped.
    ClearSignal(CollectionId),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowGraphConfig {
    #[serde(default = "FlowGraphConfig::default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "FlowGraphConfig::default_insert_threshold")]
    pub insert_flush_threshold_rows: u64,
    #[serde(default = "FlowGraphConfig::default_delete_threshold")]
    pub delete_flush_threshold_count: usize,
}

impl FlowGraphConfig {
    fn default_queue_size() -> usize {
        1024
    }
    fn default_insert_threshold() -> u64 {
        10_000
    }
    fn default_delete_threshold() -> usize {
        1_000
    }
}

impl Default for FlowGraphConfig {
    fn default() -> Self {
        FlowGraphConfig {
            queue_size: Self::default_queue_size(),
            insert_flush_threshold_rows: Self::default_insert_threshold(),
            delete_flush_threshold_count: Self::default_delete_threshold(),
        }
    }
}

struct StreamSourceStage {
    queue_size: usize,
    downstream: Box<dyn ReceiverForMessage<FlowMessage>>,
}

#[async_trait]
impl Component for StreamSourceStage {
    fn get_name() -> &'static str {
        "dn-flow-graph-stream-source"
    }

    fn queue_size(&self) -> usize {
        self.queue_size
    }
}

#[async_trait]
impl Handler<FlowMessage> for StreamSourceStage {
    type Result = ();

    async fn handle(&mut self, message: FlowMessage, _ctx: &ComponentContext<Self>) {
        if let Err(err) = self.downstream.send(message, None).await {
            tracing::error!(%err, "dd-filter queue rejected batch");
        }
    }
}

struct DdFilterStage {
    queue_size: usize,
    dropped_collections: Arc<RwLock<HashSet<CollectionId>>>,
    downstream: Box<dyn ReceiverForMessage<FlowMessage>>,
}

#[async_trait]
impl Component for DdFilterStage {
    fn get_name() -> &'static str {
        "dn-flow-graph-dd-filter"
    }

    fn queue_size(&self) -> usize {
        self.queue_size
    }
}

#[async_trait]
impl Handler<FlowMessage> for DdFilterStage {
    type Result = ();

    async fn handle(&mut self, message: FlowMessage, _ctx: &ComponentContext<Self>) {
        let forward = match &message {
            FlowMessage::Batch(batch) => !self.dropped_collections.read().contains(&batch.collection_id),
            FlowMessage::ClearSignal(collection_id) => {
                self.dropped_collections.write().insert(*collection_id);
                true
            }
            FlowMessage::ForceFlush(_) => true,
        };
        if forward {
            if let Err(err) = self.downstream.send(message, None).await {
                tracing::error!(%err, "insert-buffer queue rejected message");
            }
        }
    }
}

#[derive(Default)]
struct PendingInserts {
    rows_since_flush: HashMap<SegmentId, u64>,
    last_position: HashMap<SegmentId, ChannelPosition>,
}

struct InsertBufferStage {
    queue_size: usize,
    threshold: u64,
    replica: Arc<SegmentReplica>,
    flush_manager: Arc<RendezvousFlushManager>,
    storage: Arc<Storage>,
    dropped_collections: Arc<RwLock<HashSet<CollectionId>>>,
    pending: PendingInserts,
    downstream: Box<dyn ReceiverForMessage<FlowMessage>>,
}

impl InsertBufferStage {
    fn submit_flush(&mut self, segment_id: SegmentId, forced: bool) {
        let rows = self.pending.rows_since_flush.remove(&segment_id).unwrap_or(0);
        if rows == 0 && !forced {
            return;
        }
        let position = self
            .pending
            .last_position
            .get(&segment_id)
            .cloned()
            .unwrap_or_else(|| ChannelPosition::zero(""));
        let storage = self.storage.clone();
        let collection_id = self.replica.collection_of(segment_id);
        let dropped_collections = self.dropped_collections.clone();
        let work: FlushWork = Box::pin(async move {
            let key = format!("insert_log/{}/{}", segment_id, position.timestamp);
            let err = storage
                .put_bytes(&key, format!("rows={rows}").into_bytes())
                .await
                .err()
                .map(|e| e.to_string());
            // Checked at completion, not submission: a drop signal that
            // arrives while this write is in flight still marks the pack.
            let dropped = collection_id
                .map(|c| dropped_collections.read().contains(&c))
                .unwrap_or(false);
            FlushPack {
                segment_id,
                insert_logs: if err.is_none() {
                    HashMap::from([(FieldId(0), key)])
                } else {
                    HashMap::new()
                },
                stats_logs: HashMap::new(),
                delta_logs: Vec::new(),
                position,
                flushed: forced,
                dropped,
                err,
            }
        });
        self.flush_manager.flush_buffer_data(segment_id, work);
    }
}

#[async_trait]
impl Component for InsertBufferStage {
    fn get_name() -> &'static str {
        "dn-flow-graph-insert-buffer"
    }

    fn queue_size(&self) -> usize {
        self.queue_size
    }
}

#[async_trait]
impl Handler<FlowMessage> for InsertBufferStage {
    type Result = ();

    async fn handle(&mut self, message: FlowMessage, _ctx: &ComponentContext<Self>) {
        match &message {
            FlowMessage::Batch(batch) => {
                for (segment_id, rows) in &batch.insert_rows {
                    if let Err(err) = self.replica.add_rows(*segment_id, *rows, batch.position.clone()) {
                        tracing::warn!(%err, %segment_id, "insert buffer dropped rows for unknown segment");
                        continue;
                    }
                    *self.pending.rows_since_flush.entry(*segment_id).or_insert(0) += rows;
                    self.pending.last_position.insert(*segment_id, batch.position.clone());
                    if self.pending.rows_since_flush[segment_id] >= self.threshold {
                        self.submit_flush(*segment_id, false);
                    }
                }
            }
            FlowMessage::ForceFlush(segment_ids) => {
                for segment_id in segment_ids {
                    self.submit_flush(*segment_id, true);
                }
            }
            FlowMessage::ClearSignal(_) => {}
        }
        if let Err(err) = self.downstream.send(message, None).await {
            tracing::error!(%err, "delete-buffer queue rejected message");
        }
    }
}

#[derive(Default)]
struct PendingDeletes {
    logs: HashMap<SegmentId, Vec<DeltaLogInfo>>,
    last_position: HashMap<SegmentId, ChannelPosition>,
}

struct DeleteBufferStage {
    queue_size: usize,
    threshold: usize,
    replica: Arc<SegmentReplica>,
    flush_manager: Arc<RendezvousFlushManager>,
    storage: Arc<Storage>,
    dropped_collections: Arc<RwLock<HashSet<CollectionId>>>,
    pending: PendingDeletes,
}

impl DeleteBufferStage {
    fn submit_flush(&mut self, segment_id: SegmentId, forced: bool) {
        let logs = self.pending.logs.remove(&segment_id).unwrap_or_default();
        if logs.is_empty() && !forced {
            return;
        }
        let position = self
            .pending
            .last_position
            .get(&segment_id)
            .cloned()
            .unwrap_or_else(|| ChannelPosition::zero(""));
        let storage = self.storage.clone();
        let collection_id = self.replica.collection_of(segment_id);
        let dropped_collections = self.dropped_collections.clone();
        let work: FlushWork = Box::pin(async move {
            let key = format!("delta_log/{}/{}", segment_id, position.timestamp);
            let bytes = format!("deletes={}", logs.len()).into_bytes();
            let err = storage.put_bytes(&key, bytes).await.err().map(|e| e.to_string());
            let mut delta_logs = logs;
            if err.is_none() {
                delta_logs.push(DeltaLogInfo {
                    path: key,
                    num_rows: delta_logs.iter().map(|d| d.num_rows).sum(),
                    timestamp_from: position.timestamp,
                    timestamp_to: position.timestamp,
                });
            }
            let dropped = collection_id
                .map(|c| dropped_collections.read().contains(&c))
                .unwrap_or(false);
            FlushPack {
                segment_id,
                insert_logs: HashMap::new(),
                stats_logs: HashMap::new(),
                delta_logs,
                position,
                flushed: forced,
                dropped,
                err,
            }
        });
        self.flush_manager.flush_buffer_data(segment_id, work);
    }
}

#[async_trait]
impl Component for DeleteBufferStage {
    fn get_name() -> &'static str {
        "dn-flow-graph-delete-buffer"
    }

    fn queue_size(&self) -> usize {
        self.queue_size
    }
}

#[async_trait]
impl Handler<FlowMessage> for DeleteBufferStage {
    type Result = ();

    async fn handle(&mut self, message: FlowMessage, _ctx: &ComponentContext<Self>) {
        match message {
            FlowMessage::Batch(batch) => {
                for (segment_id, deltas) in batch.deletes {
                    self.pending.logs.entry(segment_id).or_default().extend(deltas);
                    self.pending.last_position.insert(segment_id, batch.position.clone());
                    if self.pending.logs.get(&segment_id).map(|v| v.len()).unwrap_or(0) >= self.threshold {
                        self.submit_flush(segment_id, false);
                    }
                }
            }
            FlowMessage::ForceFlush(segment_ids) => {
                for segment_id in segment_ids {
                    self.submit_flush(segment_id, true);
                }
            }
            FlowMessage::ClearSignal(_) => {}
        }
    }
}

/// Owns the four `ComponentHandle`s for one channel's flow graph. Built
/// bottom-up (delete buffer first) so each stage's downstream receiver
/// exists before the upstream stage that forwards to it is constructed;
/// torn down in reverse (spec §9's cyclic-reference note).
pub struct FlowGraph {
    entry: ComponentHandle<StreamSourceStage>,
    dd_filter: ComponentHandle<DdFilterStage>,
    insert_buffer: ComponentHandle<InsertBufferStage>,
    delete_buffer: ComponentHandle<DeleteBufferStage>,
    dropped_collections: Arc<RwLock<HashSet<CollectionId>>>,
}

impl FlowGraph {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        system: &System,
        config: &FlowGraphConfig,
        replica: Arc<SegmentReplica>,
        flush_manager: Arc<RendezvousFlushManager>,
        storage: Arc<Storage>,
    ) -> FlowGraph {
        let dropped_collections = Arc::new(RwLock::new(HashSet::new()));

        let delete_buffer = system.start_component(DeleteBufferStage {
            queue_size: config.queue_size,
            threshold: config.delete_flush_threshold_count,
            replica: replica.clone(),
            flush_manager: flush_manager.clone(),
            storage: storage.clone(),
            dropped_collections: dropped_collections.clone(),
            pending: PendingDeletes::default(),
        });

        let insert_buffer = system.start_component(InsertBufferStage {
            queue_size: config.queue_size,
            threshold: config.insert_flush_threshold_rows,
            replica,
            flush_manager,
            storage,
            dropped_collections: dropped_collections.clone(),
            pending: PendingInserts::default(),
            downstream: delete_buffer.receiver(),
        });
        let dd_filter = system.start_component(DdFilterStage {
            queue_size: config.queue_size,
            dropped_collections: dropped_collections.clone(),
            downstream: insert_buffer.receiver(),
        });

        let entry = system.start_component(StreamSourceStage {
            queue_size: config.queue_size,
            downstream: dd_filter.receiver(),
        });

        FlowGraph {
            entry,
            dd_filter,
            insert_buffer,
            delete_buffer,
            dropped_collections,
        }
    }

    /// Retries on a full input queue (spec §4.8: "queue-full at the input
    /// of any node backpressures the stream source").
    pub async fn ingest(&self, batch: StreamBatch) {
        self.send_with_backpressure(FlowMessage::Batch(batch)).await;
    }

    pub async fn force_flush(&self, segment_ids: Vec<SegmentId>) {
        self.send_with_backpressure(FlowMessage::ForceFlush(segment_ids)).await;
    }

    pub async fn mark_collection_dropped(&self, collection_id: CollectionId) {
        self.send_with_backpressure(FlowMessage::ClearSignal(collection_id)).await;
    }

    pub fn is_collection_dropped(&self, collection_id: CollectionId) -> bool {
        self.dropped_collections.read().contains(&collection_id)
    }

    async fn send_with_backpressure(&self, message: FlowMessage) {
        let mut entry = self.entry.clone();
        loop {
            match entry.send(message.clone(), None).await {
                Ok(()) => return,
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }

    pub fn close(mut self) {
        self.entry.stop();
        self.dd_filter.stop();
        self.insert_buffer.stop();
        self.delete_buffer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use segflow_types::PartitionId;

    fn storage() -> Arc<Storage> {
        Arc::new(Storage::new_test_storage())
    }

    #[tokio::test]
    async fn insert_rows_flush_once_threshold_crossed() {
        let system = System::new();
        let replica = Arc::new(SegmentReplica::new());
        replica.add_normal_segment(SegmentId(1), CollectionId(1), PartitionId(1), "ch-1", ChannelPosition::zero("ch-1"));
        let notifier = Arc::new(RecordingNotifier::new());
        let flush_manager = Arc::new(RendezvousFlushManager::new(notifier.clone()));
        let config = FlowGraphConfig {
            queue_size: 16,
            insert_flush_threshold_rows: 100,
            delete_flush_threshold_count: 10,
        };
        let graph = FlowGraph::build(&system, &config, replica, flush_manager, storage());

        graph
            .ingest(StreamBatch {
                collection_id: CollectionId(1),
                insert_rows: HashMap::from([(SegmentId(1), 150)]),
                deletes: HashMap::new(),
                position: ChannelPosition::new("ch-1", vec![1], 1),
            })
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.packs.lock().len(), 1);
        assert_eq!(notifier.packs.lock()[0].segment_id, SegmentId(1));
    }

    #[tokio::test]
    async fn dd_filter_drops_batches_for_dropped_collections() {
        let system = System::new();
        let replica = Arc::new(SegmentReplica::new());
        replica.add_normal_segment(SegmentId(1), CollectionId(1), PartitionId(1), "ch-1", ChannelPosition::zero("ch-1"));
        let notifier = Arc::new(RecordingNotifier::new());
        let flush_manager = Arc::new(RendezvousFlushManager::new(notifier.clone()));
        let config = FlowGraphConfig {
            queue_size: 16,
            insert_flush_threshold_rows: 1,
            delete_flush_threshold_count: 10,
        };
        let graph = FlowGraph::build(&system, &config, replica, flush_manager, storage());

        graph.mark_collection_dropped(CollectionId(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        graph
            .ingest(StreamBatch {
                collection_id: CollectionId(1),
                insert_rows: HashMap::from([(SegmentId(1), 10)]),
                deletes: HashMap::new(),
                position: ChannelPosition::new("ch-1", vec![1], 1),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(notifier.packs.lock().is_empty());
    }

    #[tokio::test]
    async fn force_flush_of_dropped_collection_reports_dropped_pack() {
        let system = System::new();
        let replica = Arc::new(SegmentReplica::new());
        replica.add_normal_segment(SegmentId(1), CollectionId(1), PartitionId(1), "ch-1", ChannelPosition::zero("ch-1"));
        let notifier = Arc::new(RecordingNotifier::new());
        let flush_manager = Arc::new(RendezvousFlushManager::new(notifier.clone()));
        let config = FlowGraphConfig::default();
        let graph = FlowGraph::build(&system, &config, replica, flush_manager, storage());

        graph
            .ingest(StreamBatch {
                collection_id: CollectionId(1),
                insert_rows: HashMap::from([(SegmentId(1), 5)]),
                deletes: HashMap::new(),
                position: ChannelPosition::new("ch-1", vec![1], 1),
            })
            .await;
        graph.mark_collection_dropped(CollectionId(1)).await;
        graph.force_flush(vec![SegmentId(1)]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.packs.lock().len(), 1);
        assert!(notifier.packs.lock()[0].dropped);
    }

    #[tokio::test]
    async fn force_flush_flushes_even_without_rows() {
        let system = System::new();
        let replica = Arc::new(SegmentReplica::new());
        replica.add_normal_segment(SegmentId(1), CollectionId(1), PartitionId(1), "ch-1", ChannelPosition::zero("ch-1"));
        let notifier = Arc::new(RecordingNotifier::new());
        let flush_manager = Arc::new(RendezvousFlushManager::new(notifier.clone()));
        let config = FlowGraphConfig::default();
        let graph = FlowGraph::build(&system, &config, replica, flush_manager, storage());

        graph
            .ingest(StreamBatch {
                collection_id: CollectionId(1),
                insert_rows: HashMap::from([(SegmentId(1), 5)]),
                deletes: HashMap::new(),
                position: ChannelPosition::new("ch-1", vec![1], 1),
            })
            .await;
        graph.force_flush(vec![SegmentId(1)]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.packs.lock().len(), 1);
        assert!(notifier.packs.lock()[0].flushed);
    }
}
