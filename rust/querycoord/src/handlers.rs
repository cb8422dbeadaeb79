//! Request handlers: the coordinator's RPC surface as plain async methods
//! over the wire request/response types. A gRPC service impl in the
//! deployment shell is a mechanical wrapper around these.
//!
//! Load endpoints acknowledge once the trigger task is accepted; progress
//! is observable through `ShowCollections`/`ShowPartitions`. Release
//! endpoints return only when the fleet is drained.

use crate::coord::QueryCoord;
use crate::metrics::{self, CoordSystemInfo, SYSTEM_INFO_METRICS};
use crate::task::trigger::{
    LoadBalanceTask, LoadCollectionTask, LoadPartitionsTask, ReleaseCollectionTask,
    ReleasePartitionsTask,
};
use crate::task::{QueryCoordTask, TaskError};
use quiver_types::quiver_proto::{
    ComponentInfo, ComponentStates, CreateQueryChannelRequest, CreateQueryChannelResponse,
    ErrorCode, GetMetricsRequest, GetMetricsResponse, GetPartitionStatesRequest,
    GetPartitionStatesResponse, GetSegmentInfoRequest, GetSegmentInfoResponse,
    LoadBalanceRequest, LoadCollectionRequest, LoadPartitionsRequest, LoadType, MsgBase,
    ReleaseCollectionRequest, ReleasePartitionsRequest, ShowCollectionsRequest,
    ShowCollectionsResponse, ShowPartitionsRequest, ShowPartitionsResponse, Status,
};

fn status_from_task_error(e: &TaskError) -> Status {
    Status::error(e.code, e.reason.clone())
}

impl QueryCoord {
    fn not_ready(&self) -> Option<Status> {
        if self.is_healthy() {
            None
        } else {
            Some(Status::error(
                ErrorCode::NotReadyServe,
                "query coordinator is not ready to serve",
            ))
        }
    }

    async fn alloc_base(&self, msg_type: quiver_types::quiver_proto::MsgType) -> Result<MsgBase, TaskError> {
        let msg_id = self.env.allocator.alloc_id().await?;
        let timestamp = self.env.allocator.alloc_timestamp().await?;
        Ok(MsgBase {
            msg_type: msg_type as i32,
            msg_id,
            timestamp,
            source_id: self.config.node_id,
        })
    }

    /// Asynchronous: success means the load was accepted.
    pub async fn load_collection(&self, mut req: LoadCollectionRequest) -> Status {
        if let Some(status) = self.not_ready() {
            return status;
        }
        // A collection already loaded whole is a no-op at placement level.
        if let Some(info) = self.env.meta.get_collection(req.collection_id) {
            if info.load_type() == LoadType::LoadCollection {
                return Status::success();
            }
        }
        let base = match self.alloc_base(quiver_types::quiver_proto::MsgType::LoadCollection).await {
            Ok(base) => base,
            Err(e) => return status_from_task_error(&e),
        };
        let task_id = base.msg_id;
        req.base = Some(base);
        let task = LoadCollectionTask::new(task_id, self.config.task.retry_budget, req);
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            return status_from_task_error(&e);
        }
        match task.core().wait_to_finish().await {
            Ok(()) => Status::success(),
            Err(e) => status_from_task_error(&e),
        }
    }

    pub async fn load_partitions(&self, mut req: LoadPartitionsRequest) -> Status {
        if let Some(status) = self.not_ready() {
            return status;
        }
        if req.partition_ids.is_empty() {
            return Status::error(
                ErrorCode::UnexpectedError,
                "loadPartitions requires at least one partition id",
            );
        }
        if req
            .partition_ids
            .iter()
            .all(|p| self.env.meta.has_partition(req.collection_id, *p))
        {
            return Status::success();
        }
        let base = match self.alloc_base(quiver_types::quiver_proto::MsgType::LoadPartitions).await {
            Ok(base) => base,
            Err(e) => return status_from_task_error(&e),
        };
        let task_id = base.msg_id;
        req.base = Some(base);
        let task = LoadPartitionsTask::new(task_id, self.config.task.retry_budget, req);
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            return status_from_task_error(&e);
        }
        match task.core().wait_to_finish().await {
            Ok(()) => Status::success(),
            Err(e) => status_from_task_error(&e),
        }
    }

    /// Synchronous: returns once every node has dropped the collection.
    pub async fn release_collection(&self, mut req: ReleaseCollectionRequest) -> Status {
        if let Some(status) = self.not_ready() {
            return status;
        }
        let base = match self
            .alloc_base(quiver_types::quiver_proto::MsgType::ReleaseCollection)
            .await
        {
            Ok(base) => base,
            Err(e) => return status_from_task_error(&e),
        };
        let task_id = base.msg_id;
        req.base = Some(base);
        req.node_id = 0;
        let task = ReleaseCollectionTask::new(task_id, req);
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            return status_from_task_error(&e);
        }
        match task.core().wait_to_finish().await {
            Ok(()) => Status::success(),
            Err(e) => status_from_task_error(&e),
        }
    }

    pub async fn release_partitions(&self, mut req: ReleasePartitionsRequest) -> Status {
        if let Some(status) = self.not_ready() {
            return status;
        }
        if req.partition_ids.is_empty() {
            return Status::error(
                ErrorCode::UnexpectedError,
                "releasePartitions requires at least one partition id",
            );
        }
        let base = match self
            .alloc_base(quiver_types::quiver_proto::MsgType::ReleasePartitions)
            .await
        {
            Ok(base) => base,
            Err(e) => return status_from_task_error(&e),
        };
        let task_id = base.msg_id;
        req.base = Some(base);
        req.node_id = 0;
        let task = ReleasePartitionsTask::new(task_id, req);
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            return status_from_task_error(&e);
        }
        match task.core().wait_to_finish().await {
            Ok(()) => Status::success(),
            Err(e) => status_from_task_error(&e),
        }
    }

    pub async fn show_collections(&self, req: ShowCollectionsRequest) -> ShowCollectionsResponse {
        if let Some(status) = self.not_ready() {
            return ShowCollectionsResponse {
                status: Some(status),
                collection_ids: vec![],
                in_memory_percentages: vec![],
            };
        }
        let loaded = self.env.meta.show_collections();
        let selected: Vec<_> = if req.collection_ids.is_empty() {
            loaded
        } else {
            let mut selected = Vec::with_capacity(req.collection_ids.len());
            for id in &req.collection_ids {
                match loaded.iter().find(|c| c.collection_id == *id) {
                    Some(info) => selected.push(info.clone()),
                    None => {
                        return ShowCollectionsResponse {
                            status: Some(Status::error(
                                ErrorCode::UnexpectedError,
                                format!("collection {} has not been loaded", id),
                            )),
                            collection_ids: vec![],
                            in_memory_percentages: vec![],
                        }
                    }
                }
            }
            selected
        };
        ShowCollectionsResponse {
            status: Some(Status::success()),
            collection_ids: selected.iter().map(|c| c.collection_id).collect(),
            in_memory_percentages: selected.iter().map(|c| c.in_memory_percentage).collect(),
        }
    }

    pub async fn show_partitions(&self, req: ShowPartitionsRequest) -> ShowPartitionsResponse {
        if let Some(status) = self.not_ready() {
            return ShowPartitionsResponse {
                status: Some(status),
                partition_ids: vec![],
                in_memory_percentages: vec![],
            };
        }
        let Some(collection) = self.env.meta.get_collection(req.collection_id) else {
            return ShowPartitionsResponse {
                status: Some(Status::error(
                    ErrorCode::UnexpectedError,
                    format!("collection {} has not been loaded", req.collection_id),
                )),
                partition_ids: vec![],
                in_memory_percentages: vec![],
            };
        };
        let partition_ids = if req.partition_ids.is_empty() {
            collection.partition_ids.clone()
        } else {
            for id in &req.partition_ids {
                if !collection.partition_ids.contains(id) {
                    return ShowPartitionsResponse {
                        status: Some(Status::error(
                            ErrorCode::UnexpectedError,
                            format!("partition {} has not been loaded", id),
                        )),
                        partition_ids: vec![],
                        in_memory_percentages: vec![],
                    };
                }
            }
            req.partition_ids.clone()
        };
        let states = self
            .env
            .meta
            .get_partition_states(req.collection_id, &partition_ids);
        ShowPartitionsResponse {
            status: Some(Status::success()),
            partition_ids,
            in_memory_percentages: states.iter().map(|s| s.in_memory_percentage).collect(),
        }
    }

    pub async fn get_partition_states(
        &self,
        req: GetPartitionStatesRequest,
    ) -> GetPartitionStatesResponse {
        if let Some(status) = self.not_ready() {
            return GetPartitionStatesResponse {
                status: Some(status),
                partition_descriptions: vec![],
            };
        }
        GetPartitionStatesResponse {
            status: Some(Status::success()),
            partition_descriptions: self
                .env
                .meta
                .get_partition_states(req.collection_id, &req.partition_ids),
        }
    }

    pub async fn get_segment_info(&self, req: GetSegmentInfoRequest) -> GetSegmentInfoResponse {
        if let Some(status) = self.not_ready() {
            return GetSegmentInfoResponse {
                status: Some(status),
                infos: vec![],
            };
        }
        let mut infos = Vec::with_capacity(req.segment_ids.len());
        for segment_id in &req.segment_ids {
            match self.env.meta.get_segment(*segment_id) {
                Some(info) => infos.push(info),
                None => {
                    return GetSegmentInfoResponse {
                        status: Some(Status::error(
                            ErrorCode::UnexpectedError,
                            format!("segment {} has not been loaded", segment_id),
                        )),
                        infos: vec![],
                    }
                }
            }
        }
        GetSegmentInfoResponse {
            status: Some(Status::success()),
            infos,
        }
    }

    pub async fn load_balance(&self, mut req: LoadBalanceRequest) -> Status {
        if let Some(status) = self.not_ready() {
            return status;
        }
        if req.source_node_ids.is_empty() {
            return Status::error(
                ErrorCode::UnexpectedError,
                "loadBalance requires at least one source node",
            );
        }
        for node_id in &req.source_node_ids {
            if !self.env.cluster.has_node(*node_id) {
                return Status::error(
                    ErrorCode::UnexpectedError,
                    format!("source node {} is not registered", node_id),
                );
            }
        }
        let base = match self
            .alloc_base(quiver_types::quiver_proto::MsgType::LoadBalanceSegments)
            .await
        {
            Ok(base) => base,
            Err(e) => return status_from_task_error(&e),
        };
        let task_id = base.msg_id;
        req.base = Some(base);
        let task = LoadBalanceTask::new(task_id, self.config.task.retry_budget, req);
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            return status_from_task_error(&e);
        }
        match task.core().wait_to_finish().await {
            Ok(()) => Status::success(),
            Err(e) => status_from_task_error(&e),
        }
    }

    pub async fn create_query_channel(
        &self,
        req: CreateQueryChannelRequest,
    ) -> CreateQueryChannelResponse {
        if let Some(status) = self.not_ready() {
            return CreateQueryChannelResponse {
                status: Some(status),
                ..Default::default()
            };
        }
        match self.env.meta.get_query_channel_info(req.collection_id).await {
            Ok(info) => CreateQueryChannelResponse {
                status: Some(Status::success()),
                query_channel: info.query_channel,
                query_result_channel: info.query_result_channel,
                seek_position: info.seek_position,
                global_sealed_segments: info.global_sealed_segments,
            },
            Err(e) => CreateQueryChannelResponse {
                status: Some(Status::error(ErrorCode::UnexpectedError, e.to_string())),
                ..Default::default()
            },
        }
    }

    pub async fn get_component_states(&self) -> ComponentStates {
        ComponentStates {
            state: Some(ComponentInfo {
                node_id: self.config.node_id,
                role: "querycoord".to_string(),
                state_code: self.state_code() as i32,
            }),
            status: Some(Status::success()),
        }
    }

    pub async fn get_metrics(&self, req: GetMetricsRequest) -> GetMetricsResponse {
        let component_name = format!("querycoord-{}", self.config.node_id);
        let metric_type = match metrics::parse_metric_type(&req.request) {
            Ok(metric_type) => metric_type,
            Err(e) => {
                return GetMetricsResponse {
                    status: Some(Status::error(ErrorCode::UnexpectedError, e.to_string())),
                    response: String::new(),
                    component_name,
                }
            }
        };
        if metric_type != SYSTEM_INFO_METRICS {
            return GetMetricsResponse {
                status: Some(Status::error(
                    ErrorCode::UnexpectedError,
                    format!("unsupported metric type {}", metric_type),
                )),
                response: String::new(),
                component_name,
            };
        }

        let collections = self.env.meta.show_collections();
        let segment_count = collections
            .iter()
            .map(|c| self.env.meta.get_segments_of_collection(c.collection_id).len())
            .sum();
        let connected_nodes = self
            .env
            .cluster
            .online_node_ids()
            .into_iter()
            .filter_map(|id| self.env.cluster.get_node(id))
            .map(|n| n.cached_memory())
            .collect();
        let info = CoordSystemInfo {
            node_id: self.config.node_id,
            name: self.config.service_name.clone(),
            collection_count: collections.len(),
            segment_count,
            connected_nodes,
        };
        match serde_json::to_string(&info) {
            Ok(response) => GetMetricsResponse {
                status: Some(Status::success()),
                response,
                component_name,
            },
            Err(e) => GetMetricsResponse {
                status: Some(Status::error(ErrorCode::UnexpectedError, e.to_string())),
                response: String::new(),
                component_name,
            },
        }
    }
}
