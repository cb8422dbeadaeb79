//! Trigger tasks: the top-level units of intent the scheduler executes.
//! Each one decomposes into internal child tasks bound to specific nodes.

use crate::task::internal::{ReleaseCollectionOnNodeTask, ReleasePartitionsOnNodeTask};
use crate::task::{assign, QueryCoordTask, TaskCore, TaskEnv, TaskError};
use prost::Message;
use quiver_types::channel::{self, DELTA_CHANNEL_PREFIX, DM_CHANNEL_PREFIX};
use quiver_types::quiver_proto::{
    CollectionSchema, ErrorCode, HandoffSegmentsRequest, LoadBalanceRequest,
    LoadCollectionRequest, LoadPartitionsRequest, LoadSegmentsRequest, LoadType, MsgBase,
    MsgType, ReleaseCollectionRequest, ReleasePartitionsRequest, ReleaseSegmentsRequest,
    SegmentBinlogs, TriggerCondition, VchannelInfo, WatchDmChannelsRequest,
};
use quiver_types::{CollectionId, PartitionId, SegmentId, TaskId, Timestamp};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn base_timestamp(base: &Option<MsgBase>) -> Timestamp {
    base.as_ref().map(|b| b.timestamp).unwrap_or(0)
}

/// The per-partition recovery topology flattened into placement inputs.
struct LoadPlan {
    load_reqs: Vec<LoadSegmentsRequest>,
    watch_reqs: Vec<WatchDmChannelsRequest>,
    delta_infos: Vec<VchannelInfo>,
    segment_ids: Vec<SegmentId>,
}

fn merge_vchannel_info(merged: &mut BTreeMap<String, VchannelInfo>, incoming: VchannelInfo) {
    match merged.get_mut(&incoming.channel_name) {
        Some(existing) => {
            for id in incoming.unflushed_segment_ids {
                if !existing.unflushed_segment_ids.contains(&id) {
                    existing.unflushed_segment_ids.push(id);
                }
            }
            for id in incoming.flushed_segment_ids {
                if !existing.flushed_segment_ids.contains(&id) {
                    existing.flushed_segment_ids.push(id);
                }
            }
            for id in incoming.dropped_segment_ids {
                if !existing.dropped_segment_ids.contains(&id) {
                    existing.dropped_segment_ids.push(id);
                }
            }
            // Keep the earliest seek position so no mutation is skipped.
            let incoming_pos = incoming.seek_position;
            if let (Some(current), Some(candidate)) =
                (existing.seek_position.as_ref(), incoming_pos.as_ref())
            {
                if candidate.msg_id < current.msg_id {
                    existing.seek_position = incoming_pos;
                }
            }
        }
        None => {
            merged.insert(incoming.channel_name.clone(), incoming);
        }
    }
}

fn delta_channel_from_dm(info: &VchannelInfo) -> Result<VchannelInfo, TaskError> {
    let name = channel::convert_channel_name(
        &info.channel_name,
        DM_CHANNEL_PREFIX,
        DELTA_CHANNEL_PREFIX,
    )
    .map_err(|e| TaskError::internal(e.to_string()))?;
    let seek_position = info.seek_position.clone().map(|mut p| {
        p.channel_name = name.clone();
        p
    });
    Ok(VchannelInfo {
        collection_id: info.collection_id,
        channel_name: name,
        seek_position,
        unflushed_segment_ids: vec![],
        flushed_segment_ids: vec![],
        dropped_segment_ids: vec![],
    })
}

/// Query the recovery topology of every partition and turn it into one
/// load request per sealed segment plus one watch request per unique dm
/// channel.
async fn build_load_plan(
    env: &TaskEnv,
    collection_id: CollectionId,
    partition_ids: &[PartitionId],
    schema: Option<&CollectionSchema>,
) -> Result<LoadPlan, TaskError> {
    let mut load_reqs = Vec::new();
    let mut segment_ids = Vec::new();
    let mut merged_channels: BTreeMap<String, VchannelInfo> = BTreeMap::new();

    for partition_id in partition_ids {
        let (channels, binlogs) = env
            .broker
            .get_recovery_info(collection_id, *partition_id)
            .await?;
        for segment_binlogs in &binlogs {
            let load_info = env
                .broker
                .generate_segment_load_info(collection_id, *partition_id, segment_binlogs, true)
                .await?;
            segment_ids.push(load_info.segment_id);
            load_reqs.push(LoadSegmentsRequest {
                base: Some(MsgBase::new(MsgType::LoadSegments)),
                dst_node_id: 0,
                infos: vec![load_info],
                schema: schema.cloned(),
                source_node_id: 0,
                collection_id,
            });
        }
        for vchannel in channels {
            merge_vchannel_info(&mut merged_channels, vchannel);
        }
    }

    let mut watch_reqs = Vec::new();
    let mut delta_infos = Vec::new();
    for vchannel in merged_channels.into_values() {
        delta_infos.push(delta_channel_from_dm(&vchannel)?);
        watch_reqs.push(WatchDmChannelsRequest {
            base: Some(MsgBase::new(MsgType::WatchDmChannels)),
            node_id: 0,
            collection_id,
            partition_ids: partition_ids.to_vec(),
            infos: vec![vchannel],
            schema: schema.cloned(),
        });
    }

    Ok(LoadPlan {
        load_reqs,
        watch_reqs,
        delta_infos,
        segment_ids,
    })
}

// ---------------- LoadCollection ----------------

#[derive(Debug)]
pub struct LoadCollectionTask {
    core: TaskCore,
    pub req: LoadCollectionRequest,
}

impl LoadCollectionTask {
    pub fn new(task_id: TaskId, retry_budget: i32, req: LoadCollectionRequest) -> Arc<Self> {
        Arc::new(LoadCollectionTask {
            core: TaskCore::new(task_id, TriggerCondition::GrpcRequest, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for LoadCollectionTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::LoadCollection
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    fn collection_id(&self) -> Option<CollectionId> {
        Some(self.req.collection_id)
    }

    async fn pre_execute(&self, env: &TaskEnv) -> Result<(), TaskError> {
        if let Some(info) = env.meta.get_collection(self.req.collection_id) {
            if info.load_type() == LoadType::LoadPartition {
                return Err(TaskError::new(
                    ErrorCode::UnexpectedError,
                    format!(
                        "collection {} has partitions loaded; release them before loading the collection",
                        self.req.collection_id
                    ),
                ));
            }
        }
        Ok(())
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        let collection_id = self.req.collection_id;
        let partition_ids = env.broker.show_partition_ids(collection_id).await?;
        env.meta
            .add_collection(collection_id, LoadType::LoadCollection, self.req.schema.clone())
            .await?;
        env.meta.add_partitions(collection_id, &partition_ids).await?;

        let plan =
            build_load_plan(env, collection_id, &partition_ids, self.req.schema.as_ref())
                .await?;
        env.meta
            .set_delta_channel_infos(collection_id, plan.delta_infos.clone())
            .await?;
        if !plan.segment_ids.is_empty() {
            env.broker
                .acquire_segments_refer_lock(self.core.task_id(), &plan.segment_ids)
                .await?;
        }

        let parent: Arc<dyn QueryCoordTask> = self.clone();
        let children = assign::assign_internal_task(
            env,
            parent,
            plan.load_reqs,
            plan.watch_reqs,
            true,
            &[],
            &[],
        )
        .await?;
        for child in children {
            self.core.add_child(child);
        }
        Ok(())
    }

    async fn post_execute(&self, env: &TaskEnv) -> Result<(), TaskError> {
        if let Err(e) = env
            .broker
            .release_segments_refer_lock(self.core.task_id(), &[])
            .await
        {
            tracing::warn!(task_id = self.core.task_id(), "failed to release refer lock: {}", e);
        }
        Ok(())
    }

    async fn roll_back(self: Arc<Self>, env: &TaskEnv) -> Vec<Arc<dyn QueryCoordTask>> {
        let collection_id = self.req.collection_id;
        if let Err(e) = env.meta.release_collection(collection_id).await {
            tracing::error!(collection_id, "rollback failed to wipe collection meta: {}", e);
        }
        let parent: Arc<dyn QueryCoordTask> = self.clone();
        release_collection_children(env, &parent, collection_id).await
    }
}

/// One per-node release child for every online node.
async fn release_collection_children(
    env: &TaskEnv,
    parent: &Arc<dyn QueryCoordTask>,
    collection_id: CollectionId,
) -> Vec<Arc<dyn QueryCoordTask>> {
    let mut children: Vec<Arc<dyn QueryCoordTask>> = Vec::new();
    for node_id in env.cluster.online_node_ids() {
        let task_id = match env.allocator.alloc_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("failed to allocate rollback task id: {}", e);
                continue;
            }
        };
        let child = ReleaseCollectionOnNodeTask::new(
            task_id,
            parent.core().trigger_condition(),
            ReleaseCollectionRequest {
                base: Some(MsgBase::new(MsgType::ReleaseCollection)),
                collection_id,
                node_id,
            },
        );
        child.core().set_parent(parent);
        children.push(child);
    }
    children
}

// ---------------- LoadPartitions ----------------

#[derive(Debug)]
pub struct LoadPartitionsTask {
    core: TaskCore,
    pub req: LoadPartitionsRequest,
    added_collection: AtomicBool,
}

impl LoadPartitionsTask {
    pub fn new(task_id: TaskId, retry_budget: i32, req: LoadPartitionsRequest) -> Arc<Self> {
        Arc::new(LoadPartitionsTask {
            core: TaskCore::new(task_id, TriggerCondition::GrpcRequest, retry_budget),
            req,
            added_collection: AtomicBool::new(false),
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for LoadPartitionsTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::LoadPartitions
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    fn collection_id(&self) -> Option<CollectionId> {
        Some(self.req.collection_id)
    }

    fn partition_ids(&self) -> Vec<PartitionId> {
        self.req.partition_ids.clone()
    }

    async fn pre_execute(&self, env: &TaskEnv) -> Result<(), TaskError> {
        if let Some(info) = env.meta.get_collection(self.req.collection_id) {
            if info.load_type() == LoadType::LoadCollection {
                return Err(TaskError::new(
                    ErrorCode::UnexpectedError,
                    format!(
                        "collection {} is loaded as a whole; release it before loading partitions",
                        self.req.collection_id
                    ),
                ));
            }
        }
        Ok(())
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        let collection_id = self.req.collection_id;
        if !env.meta.has_collection(collection_id) {
            self.added_collection.store(true, Ordering::SeqCst);
        }
        env.meta
            .add_collection(collection_id, LoadType::LoadPartition, self.req.schema.clone())
            .await?;
        env.meta
            .add_partitions(collection_id, &self.req.partition_ids)
            .await?;

        let plan = build_load_plan(
            env,
            collection_id,
            &self.req.partition_ids,
            self.req.schema.as_ref(),
        )
        .await?;
        env.meta
            .set_delta_channel_infos(collection_id, plan.delta_infos.clone())
            .await?;
        if !plan.segment_ids.is_empty() {
            env.broker
                .acquire_segments_refer_lock(self.core.task_id(), &plan.segment_ids)
                .await?;
        }

        let parent: Arc<dyn QueryCoordTask> = self.clone();
        let children = assign::assign_internal_task(
            env,
            parent,
            plan.load_reqs,
            plan.watch_reqs,
            true,
            &[],
            &[],
        )
        .await?;
        for child in children {
            self.core.add_child(child);
        }
        Ok(())
    }

    async fn post_execute(&self, env: &TaskEnv) -> Result<(), TaskError> {
        if let Err(e) = env
            .broker
            .release_segments_refer_lock(self.core.task_id(), &[])
            .await
        {
            tracing::warn!(task_id = self.core.task_id(), "failed to release refer lock: {}", e);
        }
        Ok(())
    }

    /// Releases the collection if this task created it, else just the
    /// partitions it tried to load.
    async fn roll_back(self: Arc<Self>, env: &TaskEnv) -> Vec<Arc<dyn QueryCoordTask>> {
        let collection_id = self.req.collection_id;
        let parent: Arc<dyn QueryCoordTask> = self.clone();
        if self.added_collection.load(Ordering::SeqCst) {
            if let Err(e) = env.meta.release_collection(collection_id).await {
                tracing::error!(collection_id, "rollback failed to wipe collection meta: {}", e);
            }
            return release_collection_children(env, &parent, collection_id).await;
        }

        if let Err(e) = env
            .meta
            .release_partitions(collection_id, &self.req.partition_ids)
            .await
        {
            tracing::error!(collection_id, "rollback failed to release partitions: {}", e);
        }
        let mut children: Vec<Arc<dyn QueryCoordTask>> = Vec::new();
        for node_id in env.cluster.online_node_ids() {
            let task_id = match env.allocator.alloc_id().await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!("failed to allocate rollback task id: {}", e);
                    continue;
                }
            };
            let child = ReleasePartitionsOnNodeTask::new(
                task_id,
                self.core.trigger_condition(),
                ReleasePartitionsRequest {
                    base: Some(MsgBase::new(MsgType::ReleasePartitions)),
                    collection_id,
                    partition_ids: self.req.partition_ids.clone(),
                    node_id,
                },
            );
            child.core().set_parent(&parent);
            children.push(child);
        }
        children
    }
}

// ---------------- ReleaseCollection ----------------

#[derive(Debug)]
pub struct ReleaseCollectionTask {
    core: TaskCore,
    pub req: ReleaseCollectionRequest,
}

impl ReleaseCollectionTask {
    pub fn new(task_id: TaskId, req: ReleaseCollectionRequest) -> Arc<Self> {
        Arc::new(ReleaseCollectionTask {
            core: TaskCore::new(task_id, TriggerCondition::GrpcRequest, i32::MAX),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for ReleaseCollectionTask {
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

    fn collection_id(&self) -> Option<CollectionId> {
        Some(self.req.collection_id)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        let collection_id = self.req.collection_id;
        // Proxies must stop producing DQL frames before the query channel
        // can go away; safe to repeat on a collection that is already gone.
        env.broker.release_dql_message_stream(collection_id).await?;

        if env.meta.has_collection(collection_id) {
            let parent: Arc<dyn QueryCoordTask> = self.clone();
            for child in release_collection_children(env, &parent, collection_id).await {
                self.core.add_child(child);
            }
        }
        Ok(())
    }

    fn honors_retry_budget(&self) -> bool {
        false
    }
}

// ---------------- ReleasePartitions ----------------

#[derive(Debug)]
pub struct ReleasePartitionsTask {
    core: TaskCore,
    pub req: ReleasePartitionsRequest,
}

impl ReleasePartitionsTask {
    pub fn new(task_id: TaskId, req: ReleasePartitionsRequest) -> Arc<Self> {
        Arc::new(ReleasePartitionsTask {
            core: TaskCore::new(task_id, TriggerCondition::GrpcRequest, i32::MAX),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for ReleasePartitionsTask {
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

    fn collection_id(&self) -> Option<CollectionId> {
        Some(self.req.collection_id)
    }

    fn partition_ids(&self) -> Vec<PartitionId> {
        self.req.partition_ids.clone()
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        let collection_id = self.req.collection_id;
        if !env.meta.has_collection(collection_id) {
            return Ok(());
        }
        let parent: Arc<dyn QueryCoordTask> = self.clone();
        for node_id in env.cluster.online_node_ids() {
            let task_id = env.allocator.alloc_id().await?;
            let child = ReleasePartitionsOnNodeTask::new(
                task_id,
                self.core.trigger_condition(),
                ReleasePartitionsRequest {
                    base: Some(MsgBase::new(MsgType::ReleasePartitions)),
                    collection_id,
                    partition_ids: self.req.partition_ids.clone(),
                    node_id,
                },
            );
            child.core().set_parent(&parent);
            self.core.add_child(child);
        }
        Ok(())
    }

    fn honors_retry_budget(&self) -> bool {
        false
    }
}

// ---------------- Handoff ----------------

#[derive(Debug)]
pub struct HandoffTask {
    core: TaskCore,
    pub req: HandoffSegmentsRequest,
}

impl HandoffTask {
    pub fn new(task_id: TaskId, retry_budget: i32, req: HandoffSegmentsRequest) -> Arc<Self> {
        Arc::new(HandoffTask {
            core: TaskCore::new(task_id, TriggerCondition::Handoff, retry_budget),
            req,
        })
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for HandoffTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::HandoffSegments
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        let mut load_reqs = Vec::new();
        for seg in &self.req.segment_infos {
            let collection_id = seg.collection_id;
            let partition_id = seg.partition_id;
            let Some(collection) = env.meta.get_collection(collection_id) else {
                tracing::info!(
                    segment_id = seg.segment_id,
                    collection_id,
                    "skipping handoff for unloaded collection"
                );
                continue;
            };
            if env.meta.is_partition_released(collection_id, partition_id) {
                tracing::info!(
                    segment_id = seg.segment_id,
                    partition_id,
                    "skipping handoff for released partition"
                );
                continue;
            }
            if !env.meta.has_partition(collection_id, partition_id) {
                if collection.load_type() == LoadType::LoadCollection {
                    // A partition created after the load is discovered here.
                    env.meta.add_partitions(collection_id, &[partition_id]).await?;
                } else {
                    tracing::info!(
                        segment_id = seg.segment_id,
                        partition_id,
                        "skipping handoff for unloaded partition"
                    );
                    continue;
                }
            }
            if env.meta.has_segment(seg.segment_id) {
                return Err(TaskError::new(
                    ErrorCode::UnexpectedError,
                    format!("handoff target segment {} is already resident", seg.segment_id),
                ));
            }
            for from in &seg.compaction_from {
                if !env.meta.has_segment(*from) {
                    return Err(TaskError::new(
                        ErrorCode::UnexpectedError,
                        format!(
                            "segment {} compacted from {} which is not resident",
                            seg.segment_id, from
                        ),
                    ));
                }
            }

            let (_, binlogs) = env
                .broker
                .get_recovery_info(collection_id, partition_id)
                .await?;
            let Some(segment_binlogs) = pick_segment_binlogs(&binlogs, seg.segment_id) else {
                return Err(TaskError::new(
                    ErrorCode::UnexpectedError,
                    format!("no binlog found for handoff segment {}", seg.segment_id),
                ));
            };
            let mut load_info = env
                .broker
                .generate_segment_load_info(collection_id, partition_id, segment_binlogs, true)
                .await?;
            load_info.compaction_from = seg.compaction_from.clone();
            load_reqs.push(LoadSegmentsRequest {
                base: Some(MsgBase::new(MsgType::LoadSegments)),
                dst_node_id: 0,
                infos: vec![load_info],
                schema: collection.schema.clone(),
                source_node_id: 0,
                collection_id,
            });
        }

        let parent: Arc<dyn QueryCoordTask> = self.clone();
        let children =
            assign::assign_internal_task(env, parent, load_reqs, Vec::new(), false, &[], &[])
                .await?;
        for child in children {
            self.core.add_child(child);
        }
        Ok(())
    }
}

fn pick_segment_binlogs(binlogs: &[SegmentBinlogs], segment_id: SegmentId) -> Option<&SegmentBinlogs> {
    binlogs.iter().find(|b| b.segment_id == segment_id)
}

// ---------------- LoadBalance ----------------

#[derive(Debug)]
pub struct LoadBalanceTask {
    core: TaskCore,
    pub req: LoadBalanceRequest,
}

impl LoadBalanceTask {
    pub fn new(task_id: TaskId, retry_budget: i32, req: LoadBalanceRequest) -> Arc<Self> {
        let condition = TriggerCondition::try_from(req.balance_reason)
            .unwrap_or(TriggerCondition::LoadBalance);
        Arc::new(LoadBalanceTask {
            core: TaskCore::new(task_id, condition, retry_budget),
            req,
        })
    }

    fn is_node_down(&self) -> bool {
        self.req.balance_reason == TriggerCondition::NodeDown as i32
    }

    /// Regenerate load and watch work for everything the dead nodes owned.
    async fn execute_node_down(&self, env: &TaskEnv) -> Result<(Vec<LoadSegmentsRequest>, Vec<WatchDmChannelsRequest>), TaskError> {
        let mut lost_segments: HashMap<CollectionId, HashSet<SegmentId>> = HashMap::new();
        let mut lost_partitions: HashMap<CollectionId, HashSet<PartitionId>> = HashMap::new();
        let mut lost_channels: HashMap<CollectionId, HashSet<String>> = HashMap::new();
        for node_id in &self.req.source_node_ids {
            for seg in env.meta.get_segments_by_node(*node_id) {
                lost_segments
                    .entry(seg.collection_id)
                    .or_default()
                    .insert(seg.segment_id);
                lost_partitions
                    .entry(seg.collection_id)
                    .or_default()
                    .insert(seg.partition_id);
            }
            for chan in env.meta.get_dm_channel_infos_by_node(*node_id) {
                lost_channels
                    .entry(chan.collection_id)
                    .or_default()
                    .insert(chan.dm_channel);
            }
        }

        let mut load_reqs = Vec::new();
        let mut watch_reqs = Vec::new();
        let mut collections: HashSet<CollectionId> = lost_segments.keys().copied().collect();
        collections.extend(lost_channels.keys().copied());

        for collection_id in collections {
            let Some(collection) = env.meta.get_collection(collection_id) else {
                continue;
            };
            let segments = lost_segments.remove(&collection_id).unwrap_or_default();
            let channels = lost_channels.remove(&collection_id).unwrap_or_default();
            let partitions = lost_partitions.remove(&collection_id).unwrap_or_default();
            let mut merged_channels: BTreeMap<String, VchannelInfo> = BTreeMap::new();

            for partition_id in &partitions {
                let (recovered_channels, binlogs) = env
                    .broker
                    .get_recovery_info(collection_id, *partition_id)
                    .await?;
                for segment_binlogs in &binlogs {
                    if !segments.contains(&segment_binlogs.segment_id) {
                        continue;
                    }
                    let load_info = env
                        .broker
                        .generate_segment_load_info(
                            collection_id,
                            *partition_id,
                            segment_binlogs,
                            true,
                        )
                        .await?;
                    load_reqs.push(LoadSegmentsRequest {
                        base: Some(MsgBase::new(MsgType::LoadSegments)),
                        dst_node_id: 0,
                        infos: vec![load_info],
                        schema: collection.schema.clone(),
                        source_node_id: 0,
                        collection_id,
                    });
                }
                for vchannel in recovered_channels {
                    if channels.contains(&vchannel.channel_name) {
                        merge_vchannel_info(&mut merged_channels, vchannel);
                    }
                }
            }
            // A lost channel may belong to a collection with no lost
            // segments; recover its topology through any loaded partition.
            if merged_channels.is_empty() && !channels.is_empty() {
                for partition_id in &collection.partition_ids {
                    let (recovered_channels, _) = env
                        .broker
                        .get_recovery_info(collection_id, *partition_id)
                        .await?;
                    for vchannel in recovered_channels {
                        if channels.contains(&vchannel.channel_name) {
                            merge_vchannel_info(&mut merged_channels, vchannel);
                        }
                    }
                    if !merged_channels.is_empty() {
                        break;
                    }
                }
            }
            for vchannel in merged_channels.into_values() {
                watch_reqs.push(WatchDmChannelsRequest {
                    base: Some(MsgBase::new(MsgType::WatchDmChannels)),
                    node_id: 0,
                    collection_id,
                    partition_ids: collection.partition_ids.clone(),
                    infos: vec![vchannel],
                    schema: collection.schema.clone(),
                });
            }
        }
        Ok((load_reqs, watch_reqs))
    }

    /// Move an explicit set of sealed segments off their current owners.
    /// Returns the load requests plus the per-source eviction of the moved
    /// copies, which runs only after every load landed.
    async fn execute_manual_balance(
        &self,
        env: &TaskEnv,
    ) -> Result<(Vec<LoadSegmentsRequest>, Vec<ReleaseSegmentsRequest>), TaskError> {
        let mut load_reqs = Vec::new();
        let mut evictions: HashMap<(i64, CollectionId), Vec<SegmentId>> = HashMap::new();
        for segment_id in &self.req.sealed_segment_ids {
            let Some(seg) = env.meta.get_segment(*segment_id) else {
                return Err(TaskError::new(
                    ErrorCode::UnexpectedError,
                    format!("segment {} is not loaded", segment_id),
                ));
            };
            let schema = env
                .meta
                .get_collection(seg.collection_id)
                .and_then(|c| c.schema);
            let (_, binlogs) = env
                .broker
                .get_recovery_info(seg.collection_id, seg.partition_id)
                .await?;
            let Some(segment_binlogs) = pick_segment_binlogs(&binlogs, *segment_id) else {
                return Err(TaskError::new(
                    ErrorCode::UnexpectedError,
                    format!("no binlog found for segment {}", segment_id),
                ));
            };
            let load_info = env
                .broker
                .generate_segment_load_info(
                    seg.collection_id,
                    seg.partition_id,
                    segment_binlogs,
                    true,
                )
                .await?;
            load_reqs.push(LoadSegmentsRequest {
                base: Some(MsgBase::new(MsgType::LoadSegments)),
                dst_node_id: 0,
                infos: vec![load_info],
                schema,
                source_node_id: seg.node_id,
                collection_id: seg.collection_id,
            });
            evictions
                .entry((seg.node_id, seg.collection_id))
                .or_default()
                .push(seg.segment_id);
        }
        let release_reqs = evictions
            .into_iter()
            .map(|((node_id, collection_id), segment_ids)| ReleaseSegmentsRequest {
                base: Some(MsgBase::new(MsgType::ReleaseSegments)),
                node_id,
                collection_id,
                partition_ids: vec![],
                segment_ids,
            })
            .collect();
        Ok((load_reqs, release_reqs))
    }
}

#[async_trait::async_trait]
impl QueryCoordTask for LoadBalanceTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn msg_type(&self) -> MsgType {
        MsgType::LoadBalanceSegments
    }

    fn marshal(&self) -> Vec<u8> {
        self.req.encode_to_vec()
    }

    fn timestamp(&self) -> Timestamp {
        base_timestamp(&self.req.base)
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError> {
        let parent: Arc<dyn QueryCoordTask> = self.clone();
        let children = if self.is_node_down() {
            let (load_reqs, watch_reqs) = self.execute_node_down(env).await?;
            assign::assign_internal_task(
                env,
                parent,
                load_reqs,
                watch_reqs,
                true,
                &self.req.source_node_ids,
                &[],
            )
            .await?
        } else {
            let (load_reqs, release_reqs) = self.execute_manual_balance(env).await?;
            let mut children = assign::assign_internal_task(
                env,
                parent.clone(),
                load_reqs,
                Vec::new(),
                false,
                &self.req.source_node_ids,
                &self.req.dst_node_ids,
            )
            .await?;
            // Evictions run in the low-priority group, after every load
            // landed on its new owner.
            for req in release_reqs {
                let task_id = env.allocator.alloc_id().await?;
                let child = crate::task::internal::ReleaseSegmentsTask::new(
                    task_id,
                    self.core.trigger_condition(),
                    env.retry_budget,
                    req,
                );
                child.core().set_parent(&parent);
                children.push(child);
            }
            children
        };
        for child in children {
            self.core.add_child(child);
        }
        Ok(())
    }

    /// Node-down recovery must not give up; manual balances may.
    fn honors_retry_budget(&self) -> bool {
        !self.is_node_down()
    }
}
