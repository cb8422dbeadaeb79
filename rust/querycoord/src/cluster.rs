//! Membership registry and placement kernel.
//!
//! One [`QueryNode`] handle per live worker, single-node RPC fan-out, and
//! the cost-based assignment of segments and stream channels to nodes.

use crate::channel_unsubscribe::ChannelUnsubscribeHandler;
use crate::config::NodeClientConfig;
use crate::meta::MetaReplica;
use crate::node::{MockQueryNode, NodeClient, NodeRpcError, NodeState, QueryNode};
use parking_lot::RwLock;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::quiver_proto::query_node_client::QueryNodeClient;
use quiver_types::quiver_proto::{
    AddQueryChannelRequest, GetSegmentInfoRequest, LoadSegmentsRequest, MsgBase, MsgType,
    ReleaseCollectionRequest, ReleasePartitionsRequest, ReleaseSegmentsRequest, SegmentInfo,
    WatchDeltaChannelsRequest, WatchDmChannelsRequest,
};
use quiver_types::{CollectionId, NodeId, SegmentId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tonic::transport::Endpoint;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no query node available for placement")]
    NoAvailableNode,
    #[error("no query node has enough memory for the request of {0} bytes")]
    InsufficientMemory(i64),
}

impl QuiverError for PlacementError {
    fn code(&self) -> ErrorCodes {
        match self {
            PlacementError::NoAvailableNode => ErrorCodes::Unavailable,
            PlacementError::InsufficientMemory(_) => ErrorCodes::ResourceExhausted,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegisterNodeError {
    #[error("failed to build endpoint for node {node_id} at {address}: {source}")]
    BadAddress {
        node_id: NodeId,
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
}

impl QuiverError for RegisterNodeError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

pub struct Cluster {
    meta: Arc<MetaReplica>,
    unsubscribe: Arc<ChannelUnsubscribeHandler>,
    client_config: NodeClientConfig,
    nodes: RwLock<HashMap<NodeId, Arc<QueryNode>>>,
    node_added: Notify,
    /// Placement gives up waiting for a registration after this long.
    wait_for_node: Duration,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes.read().len())
            .finish()
    }
}

impl Cluster {
    pub fn new(
        meta: Arc<MetaReplica>,
        unsubscribe: Arc<ChannelUnsubscribeHandler>,
        client_config: NodeClientConfig,
        wait_for_node: Duration,
    ) -> Arc<Self> {
        Arc::new(Cluster {
            meta,
            unsubscribe,
            client_config,
            nodes: RwLock::new(HashMap::new()),
            node_added: Notify::new(),
            wait_for_node,
        })
    }

    // ---------------- membership ----------------

    /// Register a node discovered through the session registry. Idempotent;
    /// re-registering an online node is a no-op, re-registering an offline
    /// one replaces the stale handle.
    pub fn register_node(
        &self,
        node_id: NodeId,
        address: String,
    ) -> Result<(), RegisterNodeError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", address))
            .map_err(|source| RegisterNodeError::BadAddress {
                node_id,
                address: address.clone(),
                source,
            })?
            .connect_timeout(self.client_config.connect_timeout)
            .timeout(self.client_config.request_timeout);
        let client = NodeClient::Grpc(QueryNodeClient::new(endpoint.connect_lazy()));
        self.register_node_with_client(node_id, address, client);
        Ok(())
    }

    /// Test seam: register a node backed by an in-process mock.
    pub fn register_mock_node(&self, node_id: NodeId, mock: MockQueryNode) -> Arc<QueryNode> {
        let address = format!("mock-{}", node_id);
        self.register_node_with_client(node_id, address, NodeClient::Mock(mock));
        self.get_node(node_id).expect("node just registered")
    }

    fn register_node_with_client(&self, node_id: NodeId, address: String, client: NodeClient) {
        {
            let mut nodes = self.nodes.write();
            match nodes.get(&node_id) {
                Some(existing) if existing.is_online() => return,
                _ => {
                    nodes.insert(node_id, QueryNode::new(node_id, address, client));
                }
            }
        }
        tracing::info!(node_id, "registered query node");
        self.node_added.notify_waiters();
    }

    /// Mark a node offline and journal the channel subscriptions it leaves
    /// behind so the unsubscribe handler can free them.
    pub async fn stop_node(&self, node_id: NodeId) {
        let node = self.get_node(node_id);
        if let Some(node) = node {
            node.set_state(NodeState::Offline);
        }
        let info = self.meta.get_watched_channels_by_node(node_id);
        if !info.collection_channels.is_empty() {
            if let Err(e) = self.unsubscribe.enqueue(info).await {
                tracing::error!(node_id, "failed to journal channel unsubscribe: {}", e);
            }
        }
        tracing::info!(node_id, "stopped query node");
    }

    /// Forget an offline node entirely. Called after its load has been
    /// drained onto the survivors.
    pub fn remove_node_info(&self, node_id: NodeId) {
        self.nodes.write().remove(&node_id);
    }

    pub fn has_node(&self, node_id: NodeId) -> bool {
        self.nodes.read().contains_key(&node_id)
    }

    pub fn is_online(&self, node_id: NodeId) -> bool {
        self.get_node(node_id).map(|n| n.is_online()).unwrap_or(false)
    }

    pub fn online_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .read()
            .values()
            .filter(|n| n.is_online())
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn offline_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .read()
            .values()
            .filter(|n| !n.is_online())
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<Arc<QueryNode>> {
        self.nodes.read().get(&node_id).cloned()
    }

    fn get_node_checked(&self, node_id: NodeId) -> Result<Arc<QueryNode>, NodeRpcError> {
        self.get_node(node_id)
            .ok_or(NodeRpcError::NodeNotFound(node_id))
    }

    // ---------------- single-node RPCs ----------------

    pub async fn load_segments(
        &self,
        node_id: NodeId,
        req: LoadSegmentsRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?.load_segments(req).await
    }

    pub async fn watch_dm_channels(
        &self,
        node_id: NodeId,
        req: WatchDmChannelsRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?.watch_dm_channels(req).await
    }

    pub async fn watch_delta_channels(
        &self,
        node_id: NodeId,
        req: WatchDeltaChannelsRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?
            .watch_delta_channels(req)
            .await
    }

    pub async fn add_query_channel(
        &self,
        node_id: NodeId,
        req: AddQueryChannelRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?.add_query_channel(req).await
    }

    pub async fn release_segments(
        &self,
        node_id: NodeId,
        req: ReleaseSegmentsRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?.release_segments(req).await
    }

    pub async fn release_collection(
        &self,
        node_id: NodeId,
        req: ReleaseCollectionRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?
            .release_collection(req)
            .await
    }

    pub async fn release_partitions(
        &self,
        node_id: NodeId,
        req: ReleasePartitionsRequest,
    ) -> Result<(), NodeRpcError> {
        self.get_node_checked(node_id)?
            .release_partitions(req)
            .await
    }

    pub fn has_watched_query_channel(
        &self,
        node_id: NodeId,
        collection_id: CollectionId,
    ) -> bool {
        self.get_node(node_id)
            .map(|n| n.has_watched_query_channel(collection_id))
            .unwrap_or(false)
    }

    pub fn has_watched_delta_channel(
        &self,
        node_id: NodeId,
        collection_id: CollectionId,
    ) -> bool {
        self.get_node(node_id)
            .map(|n| n.has_watched_delta_channel(collection_id))
            .unwrap_or(false)
    }

    /// Pull-through segment probe: resolves the owning node from meta and
    /// asks it directly.
    pub async fn get_segment_info_by_id(
        &self,
        segment_id: SegmentId,
    ) -> Result<Option<SegmentInfo>, NodeRpcError> {
        let Some(owned) = self.meta.get_segment(segment_id) else {
            return Ok(None);
        };
        let node = self.get_node_checked(owned.node_id)?;
        let infos = node
            .get_segment_info(GetSegmentInfoRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                segment_ids: vec![segment_id],
            })
            .await?;
        Ok(infos.into_iter().find(|i| i.segment_id == segment_id))
    }

    // ---------------- placement kernel ----------------

    fn candidate_nodes(&self, exclude: &[NodeId], include: &[NodeId]) -> Vec<Arc<QueryNode>> {
        let mut candidates: Vec<Arc<QueryNode>> = self
            .nodes
            .read()
            .values()
            .filter(|n| n.is_online())
            .filter(|n| !exclude.contains(&n.id))
            .filter(|n| include.is_empty() || include.contains(&n.id))
            .cloned()
            .collect();
        candidates.sort_by_key(|n| n.id);
        candidates
    }

    async fn wait_for_candidates(
        &self,
        wait: bool,
        exclude: &[NodeId],
        include: &[NodeId],
    ) -> Result<Vec<Arc<QueryNode>>, PlacementError> {
        let deadline = tokio::time::Instant::now() + self.wait_for_node;
        loop {
            let candidates = self.candidate_nodes(exclude, include);
            if !candidates.is_empty() {
                return Ok(candidates);
            }
            if !wait {
                return Err(PlacementError::NoAvailableNode);
            }
            let notified = self.node_added.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // A registration may have slipped in between the emptiness
                // check and the wait; look once more before giving up.
                let candidates = self.candidate_nodes(exclude, include);
                if !candidates.is_empty() {
                    return Ok(candidates);
                }
                return Err(PlacementError::NoAvailableNode);
            }
        }
    }

    /// Assign a destination node to every load request, minimizing the
    /// projected memory usage rate of the chosen node. With two or more
    /// candidates, one collection's whole batch is never left on a single
    /// node.
    pub async fn allocate_segments_to_query_node(
        &self,
        reqs: &mut [LoadSegmentsRequest],
        wait: bool,
        exclude: &[NodeId],
        include: &[NodeId],
    ) -> Result<(), PlacementError> {
        if reqs.is_empty() {
            return Ok(());
        }
        let candidates = self.wait_for_candidates(wait, exclude, include).await?;
        self.refresh_candidate_metrics(&candidates).await;

        // Bytes and request counts tentatively assigned within this batch.
        let mut pending_bytes: HashMap<NodeId, i64> = HashMap::new();
        let mut pending_count: HashMap<NodeId, usize> = HashMap::new();

        for req in reqs.iter_mut() {
            let req_size: i64 = req.infos.iter().map(|i| i.segment_size).sum();
            let chosen = pick_segment_destination(
                &candidates,
                &pending_bytes,
                &pending_count,
                req_size,
                None,
            )
            .ok_or(PlacementError::InsufficientMemory(req_size))?;
            req.dst_node_id = chosen;
            *pending_bytes.entry(chosen).or_default() += req_size;
            *pending_count.entry(chosen).or_default() += 1;
        }

        // Colocation floor: when ties put every segment of a collection on
        // one node even though others are available, spread the largest
        // request once with that node excluded.
        if candidates.len() >= 2 {
            let mut by_collection: HashMap<CollectionId, Vec<usize>> = HashMap::new();
            for (idx, req) in reqs.iter().enumerate() {
                by_collection.entry(req.collection_id).or_default().push(idx);
            }
            for indexes in by_collection.values() {
                if indexes.len() < 2 {
                    continue;
                }
                let first = reqs[indexes[0]].dst_node_id;
                if !indexes.iter().all(|i| reqs[*i].dst_node_id == first) {
                    continue;
                }
                let largest = *indexes
                    .iter()
                    .max_by_key(|i| {
                        reqs[**i].infos.iter().map(|x| x.segment_size).sum::<i64>()
                    })
                    .expect("non-empty");
                let req_size: i64 =
                    reqs[largest].infos.iter().map(|i| i.segment_size).sum();
                if let Some(other) = pick_segment_destination(
                    &candidates,
                    &pending_bytes,
                    &pending_count,
                    req_size,
                    Some(first),
                ) {
                    *pending_bytes.entry(first).or_default() -= req_size;
                    reqs[largest].dst_node_id = other;
                    *pending_bytes.entry(other).or_default() += req_size;
                }
            }
        }

        Ok(())
    }

    /// Assign a destination to every dm-channel watch request. Channels of
    /// the same collection prefer distinct nodes.
    pub async fn allocate_channels_to_query_node(
        &self,
        reqs: &mut [WatchDmChannelsRequest],
        wait: bool,
        exclude: &[NodeId],
    ) -> Result<(), PlacementError> {
        if reqs.is_empty() {
            return Ok(());
        }
        let candidates = self.wait_for_candidates(wait, exclude, &[]).await?;

        // (collection, node) -> channels placed this batch.
        let mut pending: HashMap<(CollectionId, NodeId), usize> = HashMap::new();
        let mut pending_total: HashMap<NodeId, usize> = HashMap::new();

        for req in reqs.iter_mut() {
            let chosen = candidates
                .iter()
                .min_by_key(|n| {
                    let same_collection = n.dm_channel_count_of(req.collection_id)
                        + pending.get(&(req.collection_id, n.id)).copied().unwrap_or(0);
                    let total = pending_total.get(&n.id).copied().unwrap_or(0);
                    (same_collection, total, n.id)
                })
                .expect("candidates is non-empty");
            req.node_id = chosen.id;
            *pending.entry((req.collection_id, chosen.id)).or_default() += 1;
            *pending_total.entry(chosen.id).or_default() += 1;
        }
        Ok(())
    }

    async fn refresh_candidate_metrics(&self, candidates: &[Arc<QueryNode>]) {
        let futures = candidates.iter().map(|node| {
            let node = node.clone();
            async move {
                if let Err(e) = node.sync_memory_metrics().await {
                    // Keep the cached snapshot; a node that never reported
                    // looks full and will not attract placements.
                    tracing::warn!(node_id = node.id, "failed to refresh node metrics: {}", e);
                }
            }
        });
        futures::future::join_all(futures).await;
    }
}

/// Choose the online node minimizing the projected usage rate after taking
/// `req_size` more bytes. Ties break on assigned-segment count, then id.
/// Returns `None` if no candidate can hold the request at all.
fn pick_segment_destination(
    candidates: &[Arc<QueryNode>],
    pending_bytes: &HashMap<NodeId, i64>,
    pending_count: &HashMap<NodeId, usize>,
    req_size: i64,
    exclude: Option<NodeId>,
) -> Option<NodeId> {
    let mut best: Option<(f64, usize, NodeId)> = None;
    for node in candidates {
        if Some(node.id) == exclude {
            continue;
        }
        let mem = node.cached_memory();
        let pending = pending_bytes.get(&node.id).copied().unwrap_or(0);
        let projected = mem.memory_usage as i64 + pending + req_size;
        if mem.memory_total == 0 || projected >= mem.memory_total as i64 {
            continue;
        }
        let cost = projected as f64 / mem.memory_total as f64;
        let count = node.segment_count() + pending_count.get(&node.id).copied().unwrap_or(0);
        let key = (cost, count, node.id);
        match &best {
            Some((best_cost, best_count, best_id)) => {
                let better = cost < *best_cost
                    || (cost == *best_cost && count < *best_count)
                    || (cost == *best_cost && count == *best_count && node.id < *best_id);
                if better {
                    best = Some(key);
                }
            }
            None => best = Some(key),
        }
    }
    best.map(|(_, _, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_unsubscribe::ChannelUnsubscribeHandler;
    use crate::meta::MetaReplica;
    use quiver_broker::LocalIdAllocator;
    use quiver_metakv::{MemoryMetaKv, MetaKv};
    use quiver_msgstream::{MemoryMessageBus, MessageBus};
    use quiver_types::quiver_proto::SegmentLoadInfo;

    const GIB: u64 = 1 << 30;

    async fn test_cluster() -> Arc<Cluster> {
        let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryMessageBus::new());
        let allocator = Arc::new(LocalIdAllocator::new());
        let meta = MetaReplica::new(kv.clone(), bus.clone(), allocator)
            .await
            .unwrap();
        let unsubscribe = ChannelUnsubscribeHandler::new(kv, bus).await.unwrap();
        Cluster::new(
            meta,
            unsubscribe,
            NodeClientConfig::default(),
            Duration::from_millis(200),
        )
    }

    fn load_req(collection_id: CollectionId, segment_id: SegmentId, size: i64) -> LoadSegmentsRequest {
        LoadSegmentsRequest {
            base: Some(MsgBase::new(MsgType::LoadSegments)),
            dst_node_id: 0,
            infos: vec![SegmentLoadInfo {
                segment_id,
                partition_id: 10,
                collection_id,
                num_of_rows: 1,
                binlog_paths: vec![],
                compaction_from: vec![],
                index_infos: vec![],
                segment_size: size,
            }],
            schema: None,
            source_node_id: 0,
            collection_id,
        }
    }

    #[tokio::test]
    async fn test_allocation_prefers_cooler_node() {
        let cluster = test_cluster().await;
        cluster.register_mock_node(1, MockQueryNode::new(1, 8 * GIB, 10 * GIB));
        cluster.register_mock_node(2, MockQueryNode::new(2, GIB, 10 * GIB));

        let mut reqs = vec![load_req(1, 100, (64 << 20) as i64)];
        cluster
            .allocate_segments_to_query_node(&mut reqs, false, &[], &[])
            .await
            .unwrap();
        assert_eq!(reqs[0].dst_node_id, 2);
    }

    #[tokio::test]
    async fn test_allocation_excludes_and_includes() {
        let cluster = test_cluster().await;
        cluster.register_mock_node(1, MockQueryNode::new(1, 0, 10 * GIB));
        cluster.register_mock_node(2, MockQueryNode::new(2, 0, 10 * GIB));

        let mut reqs = vec![load_req(1, 100, 1)];
        cluster
            .allocate_segments_to_query_node(&mut reqs, false, &[1], &[])
            .await
            .unwrap();
        assert_eq!(reqs[0].dst_node_id, 2);

        let mut reqs = vec![load_req(1, 101, 1)];
        cluster
            .allocate_segments_to_query_node(&mut reqs, false, &[], &[1])
            .await
            .unwrap();
        assert_eq!(reqs[0].dst_node_id, 1);
    }

    #[tokio::test]
    async fn test_collection_never_lands_on_single_node_when_two_exist() {
        let cluster = test_cluster().await;
        // Node 1 is markedly cooler, so naive cost assignment would send
        // everything there.
        cluster.register_mock_node(1, MockQueryNode::new(1, 0, 100 * GIB));
        cluster.register_mock_node(2, MockQueryNode::new(2, 50 * GIB, 100 * GIB));

        let mut reqs = vec![
            load_req(7, 100, 1 << 20),
            load_req(7, 101, 2 << 20),
            load_req(7, 102, 1 << 20),
        ];
        cluster
            .allocate_segments_to_query_node(&mut reqs, false, &[], &[])
            .await
            .unwrap();
        let mut nodes: Vec<NodeId> = reqs.iter().map(|r| r.dst_node_id).collect();
        nodes.sort_unstable();
        nodes.dedup();
        assert!(nodes.len() >= 2, "placement was {:?}", reqs.iter().map(|r| r.dst_node_id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_no_available_node_without_wait() {
        let cluster = test_cluster().await;
        let mut reqs = vec![load_req(1, 100, 1)];
        let err = cluster
            .allocate_segments_to_query_node(&mut reqs, false, &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::NoAvailableNode));
    }

    #[tokio::test]
    async fn test_wait_for_node_times_out() {
        let cluster = test_cluster().await;
        let mut reqs = vec![load_req(1, 100, 1)];
        let err = cluster
            .allocate_segments_to_query_node(&mut reqs, true, &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::NoAvailableNode));
    }

    #[tokio::test]
    async fn test_wait_for_node_resumes_on_registration() {
        let cluster = test_cluster().await;
        let waiter = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                let mut reqs = vec![load_req(1, 100, 1)];
                cluster
                    .allocate_segments_to_query_node(&mut reqs, true, &[], &[])
                    .await
                    .map(|_| reqs[0].dst_node_id)
            })
        };
        tokio::task::yield_now().await;
        cluster.register_mock_node(3, MockQueryNode::new(3, 0, GIB));
        assert_eq!(waiter.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_memory() {
        let cluster = test_cluster().await;
        cluster.register_mock_node(1, MockQueryNode::new(1, 0, GIB));
        let mut reqs = vec![load_req(1, 100, 2 * GIB as i64)];
        let err = cluster
            .allocate_segments_to_query_node(&mut reqs, false, &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::InsufficientMemory(_)));
    }

    #[tokio::test]
    async fn test_channels_of_same_collection_spread_across_nodes() {
        let cluster = test_cluster().await;
        cluster.register_mock_node(1, MockQueryNode::new(1, 0, GIB));
        cluster.register_mock_node(2, MockQueryNode::new(2, 0, GIB));

        let mut reqs: Vec<WatchDmChannelsRequest> = (0..2)
            .map(|i| WatchDmChannelsRequest {
                base: Some(MsgBase::new(MsgType::WatchDmChannels)),
                node_id: 0,
                collection_id: 1,
                partition_ids: vec![],
                infos: vec![quiver_types::quiver_proto::VchannelInfo {
                    collection_id: 1,
                    channel_name: format!("quiver-dml_{}_1v0", i),
                    seek_position: None,
                    unflushed_segment_ids: vec![],
                    flushed_segment_ids: vec![],
                    dropped_segment_ids: vec![],
                }],
                schema: None,
            })
            .collect();
        cluster
            .allocate_channels_to_query_node(&mut reqs, false, &[])
            .await
            .unwrap();
        assert_ne!(reqs[0].node_id, reqs[1].node_id);
    }

    #[tokio::test]
    async fn test_get_segment_info_by_id_pulls_from_owner() {
        let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryMessageBus::new());
        let meta = MetaReplica::new(
            kv.clone(),
            bus.clone(),
            Arc::new(LocalIdAllocator::new()),
        )
        .await
        .unwrap();
        let unsubscribe = ChannelUnsubscribeHandler::new(kv, bus).await.unwrap();
        let cluster = Cluster::new(
            meta.clone(),
            unsubscribe,
            NodeClientConfig::default(),
            Duration::from_millis(200),
        );
        cluster.register_mock_node(1, MockQueryNode::new(1, 0, GIB));

        let mut req = load_req(1, 100, 64 << 20);
        req.dst_node_id = 1;
        cluster.load_segments(1, req).await.unwrap();
        let mut saves = std::collections::HashMap::new();
        saves.insert(
            1i64,
            vec![quiver_types::quiver_proto::SegmentInfo {
                segment_id: 100,
                collection_id: 1,
                partition_id: 10,
                node_id: 1,
                mem_size: 64 << 20,
                num_rows: 1,
                segment_state: quiver_types::quiver_proto::SegmentState::Sealed as i32,
                compaction_from: vec![],
            }],
        );
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        let info = cluster.get_segment_info_by_id(100).await.unwrap().unwrap();
        assert_eq!(info.node_id, 1);
        assert!(cluster.get_segment_info_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_node_marks_offline() {
        let cluster = test_cluster().await;
        cluster.register_mock_node(1, MockQueryNode::new(1, 0, GIB));
        assert_eq!(cluster.online_node_ids(), vec![1]);

        cluster.stop_node(1).await;
        assert!(cluster.online_node_ids().is_empty());
        assert_eq!(cluster.offline_node_ids(), vec![1]);

        cluster.remove_node_info(1);
        assert!(!cluster.has_node(1));
    }
}
