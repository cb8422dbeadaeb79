//! Coordinator-side view of one query node: its RPC client plus the cached
//! bookkeeping (capacity, assigned segments and channels, watched query and
//! delta channels) the placement kernel and completion predicates consult.

use crate::metrics::{self, NodeSystemInfo};
use parking_lot::RwLock;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::quiver_proto::query_node_client::QueryNodeClient;
use quiver_types::quiver_proto::{
    AddQueryChannelRequest, GetMetricsRequest, GetSegmentInfoRequest, LoadSegmentsRequest,
    MsgBase, MsgType, QueryChannelInfo, ReleaseCollectionRequest, ReleasePartitionsRequest,
    ReleaseSegmentsRequest, SegmentInfo, VchannelInfo, WatchDeltaChannelsRequest,
    WatchDmChannelsRequest,
};
use quiver_types::{CollectionId, NodeId, SegmentId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tonic::transport::Channel;

#[derive(Debug, Error)]
pub enum NodeRpcError {
    #[error("rpc to node {node_id} failed: {source}")]
    Grpc {
        node_id: NodeId,
        #[source]
        source: tonic::Status,
    },
    #[error("node {node_id} rejected request: {reason}")]
    Rejected { node_id: NodeId, reason: String },
    #[error("node {0} is not registered")]
    NodeNotFound(NodeId),
}

impl QuiverError for NodeRpcError {
    fn code(&self) -> ErrorCodes {
        match self {
            NodeRpcError::Grpc { source, .. } => source.code().into(),
            NodeRpcError::Rejected { .. } => ErrorCodes::Internal,
            NodeRpcError::NodeNotFound(_) => ErrorCodes::NotFound,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Online,
    Offline,
}

#[derive(Clone, Debug)]
pub enum NodeClient {
    Grpc(QueryNodeClient<Channel>),
    Mock(MockQueryNode),
}

/// One registered query node. Cheap to share; all mutable state is behind
/// its own lock and none is held across an RPC.
pub struct QueryNode {
    pub id: NodeId,
    pub address: String,
    client: NodeClient,
    state: RwLock<NodeState>,
    mem: RwLock<NodeSystemInfo>,
    // Bookkeeping mirrors what this coordinator has successfully pushed to
    // the node; the meta replica stays the source of truth.
    segments: RwLock<HashMap<SegmentId, CollectionId>>,
    dm_channels: RwLock<HashMap<String, CollectionId>>,
    watched_query_channels: RwLock<HashMap<CollectionId, QueryChannelInfo>>,
    watched_delta_channels: RwLock<HashMap<CollectionId, Vec<VchannelInfo>>>,
}

impl Debug for QueryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryNode")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl QueryNode {
    pub fn new(id: NodeId, address: String, client: NodeClient) -> Arc<Self> {
        Arc::new(QueryNode {
            id,
            address,
            client,
            state: RwLock::new(NodeState::Online),
            mem: RwLock::new(NodeSystemInfo::default()),
            segments: RwLock::new(HashMap::new()),
            dm_channels: RwLock::new(HashMap::new()),
            watched_query_channels: RwLock::new(HashMap::new()),
            watched_delta_channels: RwLock::new(HashMap::new()),
        })
    }

    pub fn is_online(&self) -> bool {
        *self.state.read() == NodeState::Online
    }

    pub fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    pub fn dm_channel_count_of(&self, collection_id: CollectionId) -> usize {
        self.dm_channels
            .read()
            .values()
            .filter(|c| **c == collection_id)
            .count()
    }

    pub fn has_watched_query_channel(&self, collection_id: CollectionId) -> bool {
        self.watched_query_channels.read().contains_key(&collection_id)
    }

    pub fn has_watched_delta_channel(&self, collection_id: CollectionId) -> bool {
        self.watched_delta_channels.read().contains_key(&collection_id)
    }

    /// Last metrics snapshot pulled from the node.
    pub fn cached_memory(&self) -> NodeSystemInfo {
        self.mem.read().clone()
    }

    fn check_status(
        &self,
        status: quiver_types::quiver_proto::Status,
    ) -> Result<(), NodeRpcError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(NodeRpcError::Rejected {
                node_id: self.id,
                reason: status.reason,
            })
        }
    }

    fn grpc_err(&self, source: tonic::Status) -> NodeRpcError {
        NodeRpcError::Grpc {
            node_id: self.id,
            source,
        }
    }

    pub async fn load_segments(&self, req: LoadSegmentsRequest) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .load_segments(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.load_segments(req.clone())?,
        };
        self.check_status(status)?;
        let mut segments = self.segments.write();
        for info in &req.infos {
            segments.insert(info.segment_id, info.collection_id);
        }
        Ok(())
    }

    pub async fn watch_dm_channels(
        &self,
        req: WatchDmChannelsRequest,
    ) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .watch_dm_channels(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.watch_dm_channels(req.clone())?,
        };
        self.check_status(status)?;
        let mut channels = self.dm_channels.write();
        for info in &req.infos {
            channels.insert(info.channel_name.clone(), req.collection_id);
        }
        Ok(())
    }

    pub async fn watch_delta_channels(
        &self,
        req: WatchDeltaChannelsRequest,
    ) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .watch_delta_channels(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.watch_delta_channels(req.clone())?,
        };
        self.check_status(status)?;
        self.watched_delta_channels
            .write()
            .insert(req.collection_id, req.infos);
        Ok(())
    }

    pub async fn add_query_channel(
        &self,
        req: AddQueryChannelRequest,
    ) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .add_query_channel(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.add_query_channel(req.clone())?,
        };
        self.check_status(status)?;
        self.watched_query_channels.write().insert(
            req.collection_id,
            QueryChannelInfo {
                collection_id: req.collection_id,
                query_channel: req.query_channel,
                query_result_channel: req.query_result_channel,
                global_sealed_segments: req.global_sealed_segments,
                seek_position: req.seek_position,
            },
        );
        Ok(())
    }

    pub async fn release_segments(
        &self,
        req: ReleaseSegmentsRequest,
    ) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .release_segments(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.release_segments(req.clone())?,
        };
        self.check_status(status)?;
        let mut segments = self.segments.write();
        for segment_id in &req.segment_ids {
            segments.remove(segment_id);
        }
        Ok(())
    }

    pub async fn release_collection(
        &self,
        req: ReleaseCollectionRequest,
    ) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .release_collection(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.release_collection(req.clone())?,
        };
        self.check_status(status)?;
        let collection_id = req.collection_id;
        self.segments
            .write()
            .retain(|_, coll| *coll != collection_id);
        self.dm_channels
            .write()
            .retain(|_, coll| *coll != collection_id);
        self.watched_query_channels.write().remove(&collection_id);
        self.watched_delta_channels.write().remove(&collection_id);
        Ok(())
    }

    pub async fn release_partitions(
        &self,
        req: ReleasePartitionsRequest,
    ) -> Result<(), NodeRpcError> {
        let status = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                client
                    .release_partitions(req.clone())
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner()
            }
            NodeClient::Mock(mock) => mock.release_partitions(req.clone())?,
        };
        self.check_status(status)
    }

    pub async fn get_segment_info(
        &self,
        req: GetSegmentInfoRequest,
    ) -> Result<Vec<SegmentInfo>, NodeRpcError> {
        match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                let resp = client
                    .get_segment_info(req)
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner();
                match resp.status {
                    Some(status) if !status.is_success() => Err(NodeRpcError::Rejected {
                        node_id: self.id,
                        reason: status.reason,
                    }),
                    _ => Ok(resp.infos),
                }
            }
            NodeClient::Mock(mock) => Ok(mock.get_segment_info(req)),
        }
    }

    /// Pull a fresh capacity snapshot from the node and cache it.
    pub async fn sync_memory_metrics(&self) -> Result<NodeSystemInfo, NodeRpcError> {
        let info = match &self.client {
            NodeClient::Grpc(client) => {
                let mut client = client.clone();
                let resp = client
                    .get_metrics(GetMetricsRequest {
                        base: Some(MsgBase::new(MsgType::Undefined)),
                        request: metrics::system_info_request(),
                    })
                    .await
                    .map_err(|e| self.grpc_err(e))?
                    .into_inner();
                serde_json::from_str::<NodeSystemInfo>(&resp.response).map_err(|e| {
                    NodeRpcError::Rejected {
                        node_id: self.id,
                        reason: format!("malformed system_info payload: {}", e),
                    }
                })?
            }
            NodeClient::Mock(mock) => mock.system_info(),
        };
        *self.mem.write() = info.clone();
        Ok(info)
    }
}

/// In-process stand-in for a query node. Records every request it serves
/// and lets tests fail the next N calls of any method.
#[derive(Clone, Debug, Default)]
pub struct MockQueryNode {
    inner: Arc<parking_lot::Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    node_id: NodeId,
    memory_usage: u64,
    memory_total: u64,
    down: bool,
    fail_next: HashMap<&'static str, u32>,
    load_segments: Vec<LoadSegmentsRequest>,
    watch_dm_channels: Vec<WatchDmChannelsRequest>,
    watch_delta_channels: Vec<WatchDeltaChannelsRequest>,
    add_query_channel: Vec<AddQueryChannelRequest>,
    release_segments: Vec<ReleaseSegmentsRequest>,
    release_collections: Vec<CollectionId>,
    release_partitions: Vec<ReleasePartitionsRequest>,
}

impl MockQueryNode {
    pub fn new(node_id: NodeId, memory_usage: u64, memory_total: u64) -> Self {
        let mock = MockQueryNode::default();
        {
            let mut state = mock.inner.lock();
            state.node_id = node_id;
            state.memory_usage = memory_usage;
            state.memory_total = memory_total;
        }
        mock
    }

    /// Simulate an unreachable node; every RPC fails until cleared.
    pub fn set_down(&self, down: bool) {
        self.inner.lock().down = down;
    }

    pub fn fail_next(&self, method: &'static str, times: u32) {
        self.inner.lock().fail_next.insert(method, times);
    }

    pub fn set_memory(&self, usage: u64, total: u64) {
        let mut state = self.inner.lock();
        state.memory_usage = usage;
        state.memory_total = total;
    }

    pub fn load_segment_requests(&self) -> Vec<LoadSegmentsRequest> {
        self.inner.lock().load_segments.clone()
    }

    pub fn watch_dm_channel_requests(&self) -> Vec<WatchDmChannelsRequest> {
        self.inner.lock().watch_dm_channels.clone()
    }

    pub fn watch_delta_channel_requests(&self) -> Vec<WatchDeltaChannelsRequest> {
        self.inner.lock().watch_delta_channels.clone()
    }

    pub fn add_query_channel_requests(&self) -> Vec<AddQueryChannelRequest> {
        self.inner.lock().add_query_channel.clone()
    }

    pub fn release_segment_requests(&self) -> Vec<ReleaseSegmentsRequest> {
        self.inner.lock().release_segments.clone()
    }

    pub fn released_collections(&self) -> Vec<CollectionId> {
        self.inner.lock().release_collections.clone()
    }

    pub fn release_partition_requests(&self) -> Vec<ReleasePartitionsRequest> {
        self.inner.lock().release_partitions.clone()
    }

    fn system_info(&self) -> NodeSystemInfo {
        let state = self.inner.lock();
        NodeSystemInfo {
            node_id: state.node_id,
            name: format!("querynode-{}", state.node_id),
            memory_usage: state.memory_usage,
            memory_total: state.memory_total,
        }
    }

    fn gate(&self, method: &'static str) -> Result<(), NodeRpcError> {
        let mut state = self.inner.lock();
        if state.down {
            return Err(NodeRpcError::Grpc {
                node_id: state.node_id,
                source: tonic::Status::unavailable("node is down"),
            });
        }
        if let Some(remaining) = state.fail_next.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NodeRpcError::Rejected {
                    node_id: state.node_id,
                    reason: format!("injected {} failure", method),
                });
            }
        }
        Ok(())
    }

    fn ok() -> quiver_types::quiver_proto::Status {
        quiver_types::quiver_proto::Status::success()
    }

    fn load_segments(
        &self,
        req: LoadSegmentsRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("load_segments")?;
        self.inner.lock().load_segments.push(req);
        Ok(Self::ok())
    }

    fn watch_dm_channels(
        &self,
        req: WatchDmChannelsRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("watch_dm_channels")?;
        self.inner.lock().watch_dm_channels.push(req);
        Ok(Self::ok())
    }

    fn watch_delta_channels(
        &self,
        req: WatchDeltaChannelsRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("watch_delta_channels")?;
        self.inner.lock().watch_delta_channels.push(req);
        Ok(Self::ok())
    }

    fn add_query_channel(
        &self,
        req: AddQueryChannelRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("add_query_channel")?;
        self.inner.lock().add_query_channel.push(req);
        Ok(Self::ok())
    }

    fn release_segments(
        &self,
        req: ReleaseSegmentsRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("release_segments")?;
        self.inner.lock().release_segments.push(req);
        Ok(Self::ok())
    }

    fn release_collection(
        &self,
        req: ReleaseCollectionRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("release_collection")?;
        self.inner.lock().release_collections.push(req.collection_id);
        Ok(Self::ok())
    }

    fn release_partitions(
        &self,
        req: ReleasePartitionsRequest,
    ) -> Result<quiver_types::quiver_proto::Status, NodeRpcError> {
        self.gate("release_partitions")?;
        self.inner.lock().release_partitions.push(req);
        Ok(Self::ok())
    }

    fn get_segment_info(&self, req: GetSegmentInfoRequest) -> Vec<SegmentInfo> {
        let state = self.inner.lock();
        let mut infos = Vec::new();
        for load in &state.load_segments {
            for info in &load.infos {
                if req.segment_ids.is_empty() || req.segment_ids.contains(&info.segment_id) {
                    infos.push(SegmentInfo {
                        segment_id: info.segment_id,
                        collection_id: info.collection_id,
                        partition_id: info.partition_id,
                        node_id: state.node_id,
                        mem_size: info.segment_size,
                        num_rows: info.num_of_rows,
                        segment_state: quiver_types::quiver_proto::SegmentState::Sealed as i32,
                        compaction_from: info.compaction_from.clone(),
                    });
                }
            }
        }
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_node() -> (Arc<QueryNode>, MockQueryNode) {
        let mock = MockQueryNode::new(1, 0, 1 << 30);
        let node = QueryNode::new(1, "localhost:21123".to_string(), NodeClient::Mock(mock.clone()));
        (node, mock)
    }

    fn load_req(segment_id: SegmentId, collection_id: CollectionId) -> LoadSegmentsRequest {
        LoadSegmentsRequest {
            base: Some(MsgBase::new(MsgType::LoadSegments)),
            dst_node_id: 1,
            infos: vec![quiver_types::quiver_proto::SegmentLoadInfo {
                segment_id,
                partition_id: 10,
                collection_id,
                num_of_rows: 128,
                binlog_paths: vec![],
                compaction_from: vec![],
                index_infos: vec![],
                segment_size: 64 << 20,
            }],
            schema: None,
            source_node_id: 0,
            collection_id,
        }
    }

    #[tokio::test]
    async fn test_load_then_release_collection_clears_bookkeeping() {
        let (node, mock) = mock_node();
        node.load_segments(load_req(100, 1)).await.unwrap();
        assert_eq!(node.segment_count(), 1);
        assert_eq!(mock.load_segment_requests().len(), 1);

        node.release_collection(ReleaseCollectionRequest {
            base: Some(MsgBase::new(MsgType::ReleaseCollection)),
            collection_id: 1,
            node_id: 1,
        })
        .await
        .unwrap();
        assert_eq!(node.segment_count(), 0);
        assert_eq!(mock.released_collections(), vec![1]);
    }

    #[tokio::test]
    async fn test_fail_next_then_succeed() {
        let (node, mock) = mock_node();
        mock.fail_next("load_segments", 1);
        assert!(node.load_segments(load_req(100, 1)).await.is_err());
        node.load_segments(load_req(100, 1)).await.unwrap();
        assert_eq!(node.segment_count(), 1);
    }

    #[tokio::test]
    async fn test_down_node_reports_transient_error() {
        let (node, mock) = mock_node();
        mock.set_down(true);
        let err = node.load_segments(load_req(100, 1)).await.unwrap_err();
        assert!(quiver_error::QuiverError::code(&err).is_transient());
    }

    #[tokio::test]
    async fn test_metrics_snapshot_cached() {
        let (node, mock) = mock_node();
        mock.set_memory(512 << 20, 1 << 30);
        let info = node.sync_memory_metrics().await.unwrap();
        assert_eq!(info.memory_usage, 512 << 20);
        assert_eq!(node.cached_memory().memory_usage, 512 << 20);
    }
}
