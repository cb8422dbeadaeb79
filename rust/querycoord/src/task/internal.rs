//! Leaf tasks bound to a single destination node. Each wraps one typed
//! node RPC; the scheduler's waiter handles retry, reschedule, and the
//! parent's bookkeeping.

use crate::task::{assign, QueryCoordTask, TaskCore, TaskEnv, TaskError};
use prost::Message;
use quiver_types::quiver_proto::{
    AddQueryChannelRequest, LoadSegmentsRequest, MsgType, ReleaseCollectionRequest,
    ReleasePartitionsRequest, ReleaseSegmentsRequest, TriggerCondition,
    WatchDeltaChannelsRequest, WatchDmChannelsRequest,
};
use quiver_types::{NodeId, TaskId, Timestamp};
use std::sync::Arc;

fn base_timestamp(base: &Option<quiver_types::quiver_proto::MsgBase>) -> Timestamp {
    base.as_ref().map(|b| b.timestamp).unwrap_or(0)
}

/// Load a batch of sealed segments onto one node.
#[derive(Debug)]
pub struct LoadSegmentsTask {
    core: TaskCore,
    pub req: LoadSegmentsRequest,
}

impl LoadSegmentsTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        retry_budget: i32,
        req: LoadSegmentsRequest,
    ) -> Arc<Self> {
        Arc::new(LoadSegmentsTask {
            core: TaskCore::new(task_id, condition, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for LoadSegmentsTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::LoadSegments
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .load_segments(self.req.dst_node_id, self.req.clone())
            .await?;
        Ok(())
    }

    /// Re-place this task's segments with the dead destination excluded.
    async fn reschedule(
        &self,
        env: &TaskEnv,
    ) -> Result<Vec<Arc<dyn QueryCoordTask>>, TaskError> {
        let parent = self
            .core
            .parent()
            .ok_or_else(|| TaskError::internal("orphan load-segments task"))?;
        // Unmerge so the placement kernel is free to split the batch.
        let load_reqs: Vec<LoadSegmentsRequest> = self
            .req
            .infos
            .iter()
            .map(|info| LoadSegmentsRequest {
                base: self.req.base.clone(),
                dst_node_id: 0,
                infos: vec![info.clone()],
                schema: self.req.schema.clone(),
                source_node_id: self.req.source_node_id,
                collection_id: self.req.collection_id,
            })
            .collect();
        assign::assign_internal_task(
            env,
            parent,
            load_reqs,
            Vec::new(),
            false,
            &[self.req.dst_node_id],
            &[],
        )
        .await
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.dst_node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.dst_node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }
}

/// Subscribe one node to a collection's dm channels.
#[derive(Debug)]
pub struct WatchDmChannelsTask {
    core: TaskCore,
    pub req: WatchDmChannelsRequest,
}

impl WatchDmChannelsTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        retry_budget: i32,
        req: WatchDmChannelsRequest,
    ) -> Arc<Self> {
        Arc::new(WatchDmChannelsTask {
            core: TaskCore::new(task_id, condition, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for WatchDmChannelsTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::WatchDmChannels
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .watch_dm_channels(self.req.node_id, self.req.clone())
            .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        env: &TaskEnv,
    ) -> Result<Vec<Arc<dyn QueryCoordTask>>, TaskError> {
        let parent = self
            .core
            .parent()
            .ok_or_else(|| TaskError::internal("orphan watch-dm-channels task"))?;
        let watch_reqs = vec![WatchDmChannelsRequest {
            node_id: 0,
            ..self.req.clone()
        }];
        assign::assign_internal_task(
            env,
            parent,
            Vec::new(),
            watch_reqs,
            false,
            &[self.req.node_id],
            &[],
        )
        .await
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }
}

/// Subscribe one node to a collection's delta channels.
#[derive(Debug)]
pub struct WatchDeltaChannelsTask {
    core: TaskCore,
    pub req: WatchDeltaChannelsRequest,
}

impl WatchDeltaChannelsTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        retry_budget: i32,
        req: WatchDeltaChannelsRequest,
    ) -> Arc<Self> {
        Arc::new(WatchDeltaChannelsTask {
            core: TaskCore::new(task_id, condition, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for WatchDeltaChannelsTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::WatchDeltaChannels
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .watch_delta_channels(self.req.node_id, self.req.clone())
            .await?;
        Ok(())
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }
}

/// Hand one node the collection's query channel to consume.
#[derive(Debug)]
pub struct WatchQueryChannelTask {
    core: TaskCore,
    pub req: AddQueryChannelRequest,
}

impl WatchQueryChannelTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        retry_budget: i32,
        req: AddQueryChannelRequest,
    ) -> Arc<Self> {
        Arc::new(WatchQueryChannelTask {
            core: TaskCore::new(task_id, condition, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for WatchQueryChannelTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::WatchQueryChannels
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .add_query_channel(self.req.node_id, self.req.clone())
            .await?;
        Ok(())
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }
}

/// Evict segments from one node.
#[derive(Debug)]
pub struct ReleaseSegmentsTask {
    core: TaskCore,
    pub req: ReleaseSegmentsRequest,
}

impl ReleaseSegmentsTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        retry_budget: i32,
        req: ReleaseSegmentsRequest,
    ) -> Arc<Self> {
        Arc::new(ReleaseSegmentsTask {
            core: TaskCore::new(task_id, condition, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for ReleaseSegmentsTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::ReleaseSegments
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .release_segments(self.req.node_id, self.req.clone())
            .await?;
        Ok(())
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }

    fn honors_retry_budget(&self) -> bool {
        false
    }
}

/// Per-node release children reuse the trigger request types with the
/// node id filled in; they are built here so the scheduler can treat all
/// internal tasks uniformly.
#[derive(Debug)]
pub struct ReleaseCollectionOnNodeTask {
    core: TaskCore,
    pub req: ReleaseCollectionRequest,
}

impl ReleaseCollectionOnNodeTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        req: ReleaseCollectionRequest,
    ) -> Arc<Self> {
        Arc::new(ReleaseCollectionOnNodeTask {
            // Releases retry without bound; the budget is a formality.
            core: TaskCore::new(task_id, condition, i32::MAX),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for ReleaseCollectionOnNodeTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::ReleaseCollection
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .release_collection(self.req.node_id, self.req.clone())
            .await?;
        Ok(())
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }

    fn honors_retry_budget(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct ReleasePartitionsOnNodeTask {
    core: TaskCore,
    pub req: ReleasePartitionsRequest,
}

impl ReleasePartitionsOnNodeTask {
    pub fn new(
        task_id: TaskId,
        condition: TriggerCondition,
        req: ReleasePartitionsRequest,
    ) -> Arc<Self> {
        Arc::new(ReleasePartitionsOnNodeTask {
            core: TaskCore::new(task_id, condition, i32::MAX),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for ReleasePartitionsOnNodeTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::ReleasePartitions
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        env.cluster
            .release_partitions(self.req.node_id, self.req.clone())
            .await?;
        Ok(())
    }

    fn is_valid(&self, env: &TaskEnv) -> bool {
        env.cluster.is_online(self.req.node_id)
    }

    fn dst_node_id(&self) -> Option<NodeId> {
        Some(self.req.node_id)
    }

    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        Some(self.req.collection_id)
    }

    fn honors_retry_budget(&self) -> bool {
        false
    }
}
