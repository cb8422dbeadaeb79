//! The authoritative in-memory model of what is loaded where.
//!
//! Every mutation stages a full new record, persists it to the meta KV, and
//! only then swaps it into the in-memory maps; a failed persist leaves
//! memory untouched. Segment-placement changes additionally broadcast an
//! ordered change message on the collection's query channel *before* the
//! KV write, journaled under `sealedSegmentChangeInfo/<msg id>` so query
//! nodes can validate what they observe. If the KV write fails after a
//! successful publish the coordinator fail-stops: the broadcast and the
//! durable state have diverged and only a restart reconverges them.

use crate::paths;
use parking_lot::RwLock;
use prost::Message;
use quiver_broker::{AllocError, IdAllocator};
use quiver_error::{ErrorCodes, QuiverError};
use quiver_metakv::{MetaKv, MetaKvError};
use quiver_msgstream::{MessageBus, MsgStreamError};
use quiver_types::quiver_proto::{
    CollectionInfo, CollectionSchema, DmChannelWatchInfo, LoadType, MsgBase, MsgPosition,
    MsgType, PartitionState, PartitionStates, QueryChannelInfo, SealedSegmentsChangeInfo,
    SegmentChangeInfo, SegmentInfo, SegmentState, UnsubscribeChannelInfo, UnsubscribeChannels,
    VchannelInfo,
};
use quiver_types::{
    channel, CollectionId, NodeId, PartitionId, SegmentId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("collection {0} has not been loaded")]
    CollectionNotFound(CollectionId),
    #[error("partition {0} has not been loaded")]
    PartitionNotFound(PartitionId),
    #[error("meta kv failed: {0}")]
    Kv(#[from] MetaKvError),
    #[error("failed to publish segment change message: {0}")]
    Stream(#[from] MsgStreamError),
    #[error("id allocation failed: {0}")]
    Alloc(#[from] AllocError),
    #[error("corrupt record under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: prost::DecodeError,
    },
}

impl QuiverError for MetaError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetaError::CollectionNotFound(_) => ErrorCodes::NotFound,
            MetaError::PartitionNotFound(_) => ErrorCodes::NotFound,
            MetaError::Kv(e) => e.code(),
            MetaError::Stream(e) => e.code(),
            MetaError::Alloc(e) => e.code(),
            MetaError::Corrupt { .. } => ErrorCodes::DataLoss,
        }
    }
}

pub struct MetaReplica {
    kv: Arc<dyn MetaKv>,
    bus: Arc<dyn MessageBus>,
    allocator: Arc<dyn IdAllocator>,
    collections: RwLock<HashMap<CollectionId, CollectionInfo>>,
    segments: RwLock<HashMap<SegmentId, SegmentInfo>>,
    dm_channels: RwLock<HashMap<String, DmChannelWatchInfo>>,
    delta_channels: RwLock<HashMap<CollectionId, Vec<VchannelInfo>>>,
    query_channels: RwLock<HashMap<CollectionId, QueryChannelInfo>>,
    /// Serializes allocate-id, publish, position record, and KV write of
    /// every segment-change broadcast; ordering on each query channel
    /// depends on this being the only publish path.
    stream_lock: AsyncMutex<()>,
}

impl std::fmt::Debug for MetaReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaReplica")
            .field("collections", &self.collections.read().len())
            .field("segments", &self.segments.read().len())
            .finish()
    }
}

impl MetaReplica {
    /// Builds the replica, reloading all persisted state.
    pub async fn new(
        kv: Arc<dyn MetaKv>,
        bus: Arc<dyn MessageBus>,
        allocator: Arc<dyn IdAllocator>,
    ) -> Result<Arc<Self>, MetaError> {
        let replica = MetaReplica {
            kv,
            bus,
            allocator,
            collections: RwLock::new(HashMap::new()),
            segments: RwLock::new(HashMap::new()),
            dm_channels: RwLock::new(HashMap::new()),
            delta_channels: RwLock::new(HashMap::new()),
            query_channels: RwLock::new(HashMap::new()),
            stream_lock: AsyncMutex::new(()),
        };
        replica.reload_from_kv().await?;
        Ok(Arc::new(replica))
    }

    async fn reload_from_kv(&self) -> Result<(), MetaError> {
        fn decode<M: Message + Default>(key: &str, value: &[u8]) -> Result<M, MetaError> {
            M::decode(value).map_err(|source| MetaError::Corrupt {
                key: key.to_string(),
                source,
            })
        }

        for (key, value) in self
            .kv
            .load_with_prefix(paths::COLLECTION_META_PREFIX)
            .await?
        {
            let info: CollectionInfo = decode(&key, &value)?;
            self.collections.write().insert(info.collection_id, info);
        }
        for (key, value) in self.kv.load_with_prefix(paths::SEGMENT_META_PREFIX).await? {
            let info: SegmentInfo = decode(&key, &value)?;
            self.segments.write().insert(info.segment_id, info);
        }
        for (key, value) in self
            .kv
            .load_with_prefix(paths::DM_CHANNEL_META_PREFIX)
            .await?
        {
            let info: DmChannelWatchInfo = decode(&key, &value)?;
            self.dm_channels.write().insert(info.dm_channel.clone(), info);
        }
        for (key, value) in self
            .kv
            .load_with_prefix(paths::DELTA_CHANNEL_META_PREFIX)
            .await?
        {
            let info: VchannelInfo = decode(&key, &value)?;
            self.delta_channels
                .write()
                .entry(info.collection_id)
                .or_default()
                .push(info);
        }
        for (key, value) in self
            .kv
            .load_with_prefix(paths::QUERY_CHANNEL_META_PREFIX)
            .await?
        {
            let info: QueryChannelInfo = decode(&key, &value)?;
            self.query_channels.write().insert(info.collection_id, info);
        }
        Ok(())
    }

    // ---------------- collections and partitions ----------------

    pub fn has_collection(&self, collection_id: CollectionId) -> bool {
        self.collections.read().contains_key(&collection_id)
    }

    pub fn get_collection(&self, collection_id: CollectionId) -> Option<CollectionInfo> {
        self.collections.read().get(&collection_id).cloned()
    }

    pub fn show_collections(&self) -> Vec<CollectionInfo> {
        let mut infos: Vec<CollectionInfo> =
            self.collections.read().values().cloned().collect();
        infos.sort_by_key(|c| c.collection_id);
        infos
    }

    pub fn has_partition(&self, collection_id: CollectionId, partition_id: PartitionId) -> bool {
        self.collections
            .read()
            .get(&collection_id)
            .map(|c| c.partition_ids.contains(&partition_id))
            .unwrap_or(false)
    }

    pub fn is_partition_released(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> bool {
        self.collections
            .read()
            .get(&collection_id)
            .map(|c| c.released_partition_ids.contains(&partition_id))
            .unwrap_or(false)
    }

    /// Idempotently create the collection entry.
    pub async fn add_collection(
        &self,
        collection_id: CollectionId,
        load_type: LoadType,
        schema: Option<CollectionSchema>,
    ) -> Result<(), MetaError> {
        if self.has_collection(collection_id) {
            return Ok(());
        }
        let info = CollectionInfo {
            collection_id,
            partition_ids: vec![],
            partition_states: vec![],
            load_type: load_type as i32,
            schema,
            released_partition_ids: vec![],
            in_memory_percentage: 0,
        };
        self.kv
            .save(&paths::collection_meta_key(collection_id), info.encode_to_vec())
            .await?;
        self.collections.write().insert(collection_id, info);
        Ok(())
    }

    /// Add partitions to a loaded collection. A partition id can be loaded
    /// or released but never both; loading one removes it from the
    /// released set.
    pub async fn add_partitions(
        &self,
        collection_id: CollectionId,
        partition_ids: &[PartitionId],
    ) -> Result<(), MetaError> {
        let mut info = self
            .get_collection(collection_id)
            .ok_or(MetaError::CollectionNotFound(collection_id))?;
        for partition_id in partition_ids {
            if !info.partition_ids.contains(partition_id) {
                info.partition_ids.push(*partition_id);
                info.partition_states.push(PartitionStates {
                    partition_id: *partition_id,
                    state: PartitionState::NotPresent as i32,
                    in_memory_percentage: 0,
                });
            }
            info.released_partition_ids.retain(|p| p != partition_id);
        }
        self.kv
            .save(&paths::collection_meta_key(collection_id), info.encode_to_vec())
            .await?;
        self.collections.write().insert(collection_id, info);
        Ok(())
    }

    /// Drop every trace of a collection. Safe to repeat.
    pub async fn release_collection(&self, collection_id: CollectionId) -> Result<(), MetaError> {
        self.kv
            .remove(&paths::collection_meta_key(collection_id))
            .await?;
        self.kv
            .remove_with_prefix(&format!("{}/{}", paths::SEGMENT_META_PREFIX, collection_id))
            .await?;
        self.kv
            .remove_with_prefix(&format!(
                "{}/{}",
                paths::DM_CHANNEL_META_PREFIX,
                collection_id
            ))
            .await?;
        self.kv
            .remove_with_prefix(&format!(
                "{}/{}",
                paths::DELTA_CHANNEL_META_PREFIX,
                collection_id
            ))
            .await?;
        self.kv
            .remove(&paths::query_channel_meta_key(collection_id))
            .await?;

        self.collections.write().remove(&collection_id);
        self.segments
            .write()
            .retain(|_, s| s.collection_id != collection_id);
        self.dm_channels
            .write()
            .retain(|_, c| c.collection_id != collection_id);
        self.delta_channels.write().remove(&collection_id);
        self.query_channels.write().remove(&collection_id);
        Ok(())
    }

    /// Move partitions to the released set and drop their segment records.
    pub async fn release_partitions(
        &self,
        collection_id: CollectionId,
        partition_ids: &[PartitionId],
    ) -> Result<(), MetaError> {
        let mut info = self
            .get_collection(collection_id)
            .ok_or(MetaError::CollectionNotFound(collection_id))?;
        info.partition_ids.retain(|p| !partition_ids.contains(p));
        info.partition_states
            .retain(|s| !partition_ids.contains(&s.partition_id));
        for partition_id in partition_ids {
            if !info.released_partition_ids.contains(partition_id) {
                info.released_partition_ids.push(*partition_id);
            }
        }

        let removals: Vec<String> = {
            let segments = self.segments.read();
            segments
                .values()
                .filter(|s| {
                    s.collection_id == collection_id
                        && partition_ids.contains(&s.partition_id)
                })
                .map(|s| {
                    paths::segment_meta_key(s.collection_id, s.partition_id, s.segment_id)
                })
                .collect()
        };
        self.kv
            .multi_save_and_remove(
                vec![(
                    paths::collection_meta_key(collection_id),
                    info.encode_to_vec(),
                )],
                removals,
            )
            .await?;

        self.collections.write().insert(collection_id, info);
        self.segments.write().retain(|_, s| {
            s.collection_id != collection_id || !partition_ids.contains(&s.partition_id)
        });
        Ok(())
    }

    /// Advance the collection's loaded percentage; at 100 every loaded
    /// partition is marked in-memory.
    pub async fn update_load_percentage(
        &self,
        collection_id: CollectionId,
        percentage: i64,
    ) -> Result<(), MetaError> {
        let mut info = self
            .get_collection(collection_id)
            .ok_or(MetaError::CollectionNotFound(collection_id))?;
        info.in_memory_percentage = percentage;
        for state in &mut info.partition_states {
            state.in_memory_percentage = percentage;
            state.state = if percentage >= 100 {
                PartitionState::InMemory as i32
            } else {
                PartitionState::PartialInMemory as i32
            };
        }
        self.kv
            .save(&paths::collection_meta_key(collection_id), info.encode_to_vec())
            .await?;
        self.collections.write().insert(collection_id, info);
        Ok(())
    }

    pub fn get_partition_states(
        &self,
        collection_id: CollectionId,
        partition_ids: &[PartitionId],
    ) -> Vec<PartitionStates> {
        let collections = self.collections.read();
        let Some(info) = collections.get(&collection_id) else {
            return partition_ids
                .iter()
                .map(|p| PartitionStates {
                    partition_id: *p,
                    state: PartitionState::NotPresent as i32,
                    in_memory_percentage: 0,
                })
                .collect();
        };
        partition_ids
            .iter()
            .map(|p| {
                info.partition_states
                    .iter()
                    .find(|s| s.partition_id == *p)
                    .cloned()
                    .unwrap_or(PartitionStates {
                        partition_id: *p,
                        state: PartitionState::NotPresent as i32,
                        in_memory_percentage: 0,
                    })
            })
            .collect()
    }

    // ---------------- channels ----------------

    pub async fn set_dm_channel_infos(
        &self,
        infos: Vec<DmChannelWatchInfo>,
    ) -> Result<(), MetaError> {
        if infos.is_empty() {
            return Ok(());
        }
        let saves = infos
            .iter()
            .map(|i| {
                (
                    paths::dm_channel_meta_key(i.collection_id, &i.dm_channel),
                    i.encode_to_vec(),
                )
            })
            .collect();
        self.kv.multi_save(saves).await?;
        let mut channels = self.dm_channels.write();
        for info in infos {
            channels.insert(info.dm_channel.clone(), info);
        }
        Ok(())
    }

    pub fn dm_channel_infos(&self) -> Vec<DmChannelWatchInfo> {
        self.dm_channels.read().values().cloned().collect()
    }

    pub fn get_dm_channel_infos_by_node(&self, node_id: NodeId) -> Vec<DmChannelWatchInfo> {
        self.dm_channels
            .read()
            .values()
            .filter(|c| c.node_id_loaded == node_id)
            .cloned()
            .collect()
    }

    pub async fn set_delta_channel_infos(
        &self,
        collection_id: CollectionId,
        infos: Vec<VchannelInfo>,
    ) -> Result<(), MetaError> {
        if infos.is_empty() {
            return Ok(());
        }
        let saves = infos
            .iter()
            .map(|i| {
                (
                    paths::delta_channel_meta_key(collection_id, &i.channel_name),
                    i.encode_to_vec(),
                )
            })
            .collect();
        self.kv.multi_save(saves).await?;
        self.delta_channels.write().insert(collection_id, infos);
        Ok(())
    }

    pub fn get_delta_channel_infos(&self, collection_id: CollectionId) -> Vec<VchannelInfo> {
        self.delta_channels
            .read()
            .get(&collection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The per-collection query channel record, created on first use.
    pub async fn get_query_channel_info(
        &self,
        collection_id: CollectionId,
    ) -> Result<QueryChannelInfo, MetaError> {
        if let Some(info) = self.query_channels.read().get(&collection_id) {
            return Ok(info.clone());
        }
        let info = QueryChannelInfo {
            collection_id,
            query_channel: channel::query_channel_name(collection_id),
            query_result_channel: channel::query_result_channel_name(collection_id),
            global_sealed_segments: vec![],
            seek_position: None,
        };
        self.kv
            .save(
                &paths::query_channel_meta_key(collection_id),
                info.encode_to_vec(),
            )
            .await?;
        self.query_channels
            .write()
            .insert(collection_id, info.clone());
        Ok(info)
    }

    /// Everything a node would have to unsubscribe from if it vanished:
    /// its dm channels plus the delta and query channels of every
    /// collection it serves.
    pub fn get_watched_channels_by_node(&self, node_id: NodeId) -> UnsubscribeChannelInfo {
        let mut per_collection: HashMap<CollectionId, Vec<String>> = HashMap::new();
        let mut collections: HashSet<CollectionId> = HashSet::new();

        for info in self.dm_channels.read().values() {
            if info.node_id_loaded == node_id {
                per_collection
                    .entry(info.collection_id)
                    .or_default()
                    .push(info.dm_channel.clone());
                collections.insert(info.collection_id);
            }
        }
        for segment in self.segments.read().values() {
            if segment.node_id == node_id {
                collections.insert(segment.collection_id);
            }
        }
        for collection_id in collections {
            let entry = per_collection.entry(collection_id).or_default();
            for delta in self.get_delta_channel_infos(collection_id) {
                entry.push(delta.channel_name);
            }
            if let Some(query) = self.query_channels.read().get(&collection_id) {
                entry.push(query.query_channel.clone());
            }
        }

        let mut collection_channels: Vec<UnsubscribeChannels> = per_collection
            .into_iter()
            .map(|(collection_id, channels)| UnsubscribeChannels {
                collection_id,
                channels,
            })
            .collect();
        collection_channels.sort_by_key(|c| c.collection_id);
        UnsubscribeChannelInfo {
            node_id,
            collection_channels,
        }
    }

    // ---------------- segments ----------------

    pub fn get_segment(&self, segment_id: SegmentId) -> Option<SegmentInfo> {
        self.segments.read().get(&segment_id).cloned()
    }

    pub fn has_segment(&self, segment_id: SegmentId) -> bool {
        self.segments.read().contains_key(&segment_id)
    }

    pub fn get_segment_infos_by_ids(&self, segment_ids: &[SegmentId]) -> Vec<SegmentInfo> {
        let segments = self.segments.read();
        segment_ids
            .iter()
            .filter_map(|id| segments.get(id).cloned())
            .collect()
    }

    pub fn get_segments_by_node(&self, node_id: NodeId) -> Vec<SegmentInfo> {
        let mut out: Vec<SegmentInfo> = self
            .segments
            .read()
            .values()
            .filter(|s| s.node_id == node_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.segment_id);
        out
    }

    pub fn get_segments_of_collection(&self, collection_id: CollectionId) -> Vec<SegmentInfo> {
        let mut out: Vec<SegmentInfo> = self
            .segments
            .read()
            .values()
            .filter(|s| s.collection_id == collection_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.segment_id);
        out
    }

    pub fn global_sealed_segments(&self, collection_id: CollectionId) -> Vec<SegmentInfo> {
        self.get_segments_of_collection(collection_id)
    }

    /// Apply new sealed-segment placements. For every changed segment the
    /// incoming placement goes online and the previous one (plus any
    /// compacted-from predecessors) goes offline, announced in one ordered
    /// message per collection before anything is persisted.
    pub async fn save_global_sealed_seg_infos(
        &self,
        saves: HashMap<CollectionId, Vec<SegmentInfo>>,
    ) -> Result<(), MetaError> {
        for (collection_id, incoming) in saves {
            self.save_collection_sealed_segments(collection_id, incoming)
                .await?;
        }
        Ok(())
    }

    async fn save_collection_sealed_segments(
        &self,
        collection_id: CollectionId,
        incoming: Vec<SegmentInfo>,
    ) -> Result<(), MetaError> {
        // Stage: compute the change set against the current replica.
        let mut change_infos: Vec<SegmentChangeInfo> = Vec::new();
        let mut kv_saves: Vec<(String, Vec<u8>)> = Vec::new();
        let mut kv_removals: Vec<String> = Vec::new();
        let mut online: Vec<SegmentInfo> = Vec::new();
        let mut offline: Vec<SegmentInfo> = Vec::new();
        {
            let segments = self.segments.read();
            for mut seg in incoming {
                seg.segment_state = SegmentState::Sealed as i32;
                let previous = segments.get(&seg.segment_id);
                if previous.map(|p| p == &seg).unwrap_or(false) {
                    // Unchanged placement; repeating it must not publish.
                    continue;
                }
                let mut info = SegmentChangeInfo {
                    online_node_id: seg.node_id,
                    online_segments: vec![seg.clone()],
                    offline_node_id: 0,
                    offline_segments: vec![],
                };
                if let Some(previous) = previous {
                    if previous.state() == SegmentState::Sealed {
                        info.offline_node_id = previous.node_id;
                        info.offline_segments.push(previous.clone());
                        offline.push(previous.clone());
                    }
                }
                change_infos.push(info);
                // Compacted-from predecessors leave the resident set in the
                // same message that brings their successor online.
                for from in &seg.compaction_from {
                    if let Some(old) = segments.get(from) {
                        change_infos.push(SegmentChangeInfo {
                            online_node_id: 0,
                            online_segments: vec![],
                            offline_node_id: old.node_id,
                            offline_segments: vec![old.clone()],
                        });
                        kv_removals.push(paths::segment_meta_key(
                            old.collection_id,
                            old.partition_id,
                            old.segment_id,
                        ));
                        offline.push(old.clone());
                    }
                }
                kv_saves.push((
                    paths::segment_meta_key(seg.collection_id, seg.partition_id, seg.segment_id),
                    seg.encode_to_vec(),
                ));
                online.push(seg);
            }
        }
        if change_infos.is_empty() {
            return Ok(());
        }

        // Broadcast, then persist, then commit, all under the single-writer
        // stream lock.
        let _guard = self.stream_lock.lock().await;
        let mut query_info = self.get_query_channel_info(collection_id).await?;
        let (position, change_msg) = self
            .publish_change_infos(&query_info.query_channel, change_infos)
            .await?;

        query_info.seek_position = Some(position);
        let offline_ids: HashSet<SegmentId> = offline.iter().map(|s| s.segment_id).collect();
        query_info
            .global_sealed_segments
            .retain(|s| !offline_ids.contains(&s.segment_id));
        for seg in &online {
            query_info
                .global_sealed_segments
                .retain(|s| s.segment_id != seg.segment_id);
            query_info.global_sealed_segments.push(seg.clone());
        }

        kv_saves.push((
            paths::change_info_key(change_msg.base.as_ref().map(|b| b.msg_id).unwrap_or(0)),
            change_msg.encode_to_vec(),
        ));
        kv_saves.push((
            paths::query_channel_meta_key(collection_id),
            query_info.encode_to_vec(),
        ));
        if let Err(e) = self.kv.multi_save_and_remove(kv_saves, kv_removals).await {
            // A change message is already on the wire with no durable record
            // behind it; the only safe recovery is a restart that replays
            // from the KV journal.
            panic!(
                "meta kv write failed after publishing segment change for collection {}: {}",
                collection_id, e
            );
        }

        // Commit.
        {
            let mut segments = self.segments.write();
            for id in &offline_ids {
                segments.remove(id);
            }
            for seg in online {
                segments.insert(seg.segment_id, seg);
            }
        }
        self.query_channels
            .write()
            .insert(collection_id, query_info);
        Ok(())
    }

    /// Take segments offline, with no online counterpart: the inverse of
    /// [`MetaReplica::save_global_sealed_seg_infos`]. An empty partition
    /// filter matches the whole collection.
    pub async fn remove_global_sealed_seg_infos(
        &self,
        collection_id: CollectionId,
        partition_ids: &[PartitionId],
    ) -> Result<(), MetaError> {
        let affected: Vec<SegmentInfo> = {
            let segments = self.segments.read();
            segments
                .values()
                .filter(|s| {
                    s.collection_id == collection_id
                        && (partition_ids.is_empty()
                            || partition_ids.contains(&s.partition_id))
                })
                .cloned()
                .collect()
        };
        if affected.is_empty() {
            return Ok(());
        }

        let mut by_node: HashMap<NodeId, Vec<SegmentInfo>> = HashMap::new();
        for seg in &affected {
            by_node.entry(seg.node_id).or_default().push(seg.clone());
        }
        let change_infos: Vec<SegmentChangeInfo> = by_node
            .into_iter()
            .map(|(node_id, segs)| SegmentChangeInfo {
                online_node_id: 0,
                online_segments: vec![],
                offline_node_id: node_id,
                offline_segments: segs,
            })
            .collect();

        let _guard = self.stream_lock.lock().await;
        let mut query_info = self.get_query_channel_info(collection_id).await?;
        let (position, change_msg) = self
            .publish_change_infos(&query_info.query_channel, change_infos)
            .await?;

        let removed_ids: HashSet<SegmentId> = affected.iter().map(|s| s.segment_id).collect();
        query_info.seek_position = Some(position);
        query_info
            .global_sealed_segments
            .retain(|s| !removed_ids.contains(&s.segment_id));

        let kv_saves = vec![
            (
                paths::change_info_key(change_msg.base.as_ref().map(|b| b.msg_id).unwrap_or(0)),
                change_msg.encode_to_vec(),
            ),
            (
                paths::query_channel_meta_key(collection_id),
                query_info.encode_to_vec(),
            ),
        ];
        let kv_removals = affected
            .iter()
            .map(|s| paths::segment_meta_key(s.collection_id, s.partition_id, s.segment_id))
            .collect();
        if let Err(e) = self.kv.multi_save_and_remove(kv_saves, kv_removals).await {
            panic!(
                "meta kv write failed after publishing segment removal for collection {}: {}",
                collection_id, e
            );
        }

        {
            let mut segments = self.segments.write();
            for id in &removed_ids {
                segments.remove(id);
            }
        }
        self.query_channels
            .write()
            .insert(collection_id, query_info);
        Ok(())
    }

    /// The broadcast step: allocate a message id, publish, return the
    /// stream position. Callers hold the stream lock.
    async fn publish_change_infos(
        &self,
        query_channel: &str,
        infos: Vec<SegmentChangeInfo>,
    ) -> Result<(MsgPosition, SealedSegmentsChangeInfo), MetaError> {
        let msg_id = self.allocator.alloc_id().await?;
        let timestamp = self.allocator.alloc_timestamp().await?;
        let change_msg = SealedSegmentsChangeInfo {
            base: Some(MsgBase {
                msg_type: MsgType::SealedSegmentsChangeInfo as i32,
                msg_id,
                timestamp,
                source_id: 0,
            }),
            infos,
        };
        let mut position = self
            .bus
            .produce(query_channel, change_msg.encode_to_vec())
            .await?;
        position.timestamp = timestamp;
        Ok((position, change_msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_broker::LocalIdAllocator;
    use quiver_metakv::testing::FailPointMetaKv;
    use quiver_metakv::MemoryMetaKv;
    use quiver_msgstream::MemoryMessageBus;

    fn segment(
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        node_id: NodeId,
    ) -> SegmentInfo {
        SegmentInfo {
            segment_id,
            collection_id,
            partition_id,
            node_id,
            mem_size: 64 << 20,
            num_rows: 1024,
            segment_state: SegmentState::Sealed as i32,
            compaction_from: vec![],
        }
    }

    async fn replica_with_bus() -> (Arc<MetaReplica>, Arc<MemoryMessageBus>, Arc<dyn MetaKv>) {
        let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
        let bus = Arc::new(MemoryMessageBus::new());
        let meta = MetaReplica::new(
            kv.clone(),
            bus.clone(),
            Arc::new(LocalIdAllocator::starting_at(1)),
        )
        .await
        .unwrap();
        (meta, bus, kv)
    }

    #[tokio::test]
    async fn test_partition_loaded_xor_released() {
        let (meta, _, _) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadPartition, None)
            .await
            .unwrap();
        meta.add_partitions(1, &[10, 11]).await.unwrap();
        meta.release_partitions(1, &[10]).await.unwrap();

        assert!(!meta.has_partition(1, 10));
        assert!(meta.is_partition_released(1, 10));
        assert!(meta.has_partition(1, 11));

        // Loading it again flips it back.
        meta.add_partitions(1, &[10]).await.unwrap();
        assert!(meta.has_partition(1, 10));
        assert!(!meta.is_partition_released(1, 10));
    }

    #[tokio::test]
    async fn test_save_sealed_segments_publishes_ordered_changes() {
        let (meta, bus, _) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap();

        let mut saves = HashMap::new();
        saves.insert(1, vec![segment(100, 1, 10, 1)]);
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        let mut saves = HashMap::new();
        saves.insert(1, vec![segment(101, 1, 10, 2)]);
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        let channel = channel::query_channel_name(1);
        let published = bus.messages(&channel);
        assert_eq!(published.len(), 2);
        let first = SealedSegmentsChangeInfo::decode(published[0].as_slice()).unwrap();
        let second = SealedSegmentsChangeInfo::decode(published[1].as_slice()).unwrap();
        assert!(first.base.unwrap().msg_id < second.base.unwrap().msg_id);

        let query_info = meta.get_query_channel_info(1).await.unwrap();
        assert_eq!(query_info.seek_position.unwrap().msg_id, 1);
        assert_eq!(query_info.global_sealed_segments.len(), 2);
    }

    #[tokio::test]
    async fn test_repeating_identical_placement_publishes_nothing() {
        let (meta, bus, _) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap();

        let mut saves = HashMap::new();
        saves.insert(1, vec![segment(100, 1, 10, 1)]);
        meta.save_global_sealed_seg_infos(saves.clone()).await.unwrap();
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        assert_eq!(bus.messages(&channel::query_channel_name(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_handoff_change_message() {
        let (meta, bus, _) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap();
        let mut saves = HashMap::new();
        saves.insert(1, vec![segment(201, 1, 10, 1), segment(202, 1, 10, 2)]);
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        let mut compacted = segment(203, 1, 10, 1);
        compacted.compaction_from = vec![201, 202];
        let mut saves = HashMap::new();
        saves.insert(1, vec![compacted]);
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        assert!(meta.has_segment(203));
        assert!(!meta.has_segment(201));
        assert!(!meta.has_segment(202));

        let published = bus.messages(&channel::query_channel_name(1));
        let last = SealedSegmentsChangeInfo::decode(published.last().unwrap().as_slice()).unwrap();
        let online: Vec<SegmentId> = last
            .infos
            .iter()
            .flat_map(|i| i.online_segments.iter().map(|s| s.segment_id))
            .collect();
        let offline: Vec<(NodeId, SegmentId)> = last
            .infos
            .iter()
            .flat_map(|i| {
                i.offline_segments
                    .iter()
                    .map(move |s| (i.offline_node_id, s.segment_id))
            })
            .collect();
        assert_eq!(online, vec![203]);
        assert!(offline.contains(&(1, 201)));
        assert!(offline.contains(&(2, 202)));
    }

    #[tokio::test]
    async fn test_remove_sealed_segments_offlines_everything() {
        let (meta, bus, _) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap();
        let mut saves = HashMap::new();
        saves.insert(1, vec![segment(100, 1, 10, 1), segment(101, 1, 11, 2)]);
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        meta.remove_global_sealed_seg_infos(1, &[10]).await.unwrap();
        assert!(!meta.has_segment(100));
        assert!(meta.has_segment(101));

        let published = bus.messages(&channel::query_channel_name(1));
        let last = SealedSegmentsChangeInfo::decode(published.last().unwrap().as_slice()).unwrap();
        assert!(last.infos.iter().all(|i| i.online_segments.is_empty()));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_memory_untouched() {
        let kv_impl = FailPointMetaKv::new();
        let kv: Arc<dyn MetaKv> = Arc::new(kv_impl.clone());
        let bus = Arc::new(MemoryMessageBus::new());
        let meta = MetaReplica::new(
            kv,
            bus,
            Arc::new(LocalIdAllocator::starting_at(1)),
        )
        .await
        .unwrap();

        kv_impl.set_fail_writes(true);
        let err = meta
            .add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::Kv(_)));
        assert!(!meta.has_collection(1));
    }

    #[tokio::test]
    async fn test_reload_round_trip() {
        let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
        let bus = Arc::new(MemoryMessageBus::new());
        {
            let meta = MetaReplica::new(
                kv.clone(),
                bus.clone(),
                Arc::new(LocalIdAllocator::starting_at(1)),
            )
            .await
            .unwrap();
            meta.add_collection(1, LoadType::LoadCollection, None)
                .await
                .unwrap();
            meta.add_partitions(1, &[10]).await.unwrap();
            let mut saves = HashMap::new();
            saves.insert(1, vec![segment(100, 1, 10, 7)]);
            meta.save_global_sealed_seg_infos(saves).await.unwrap();
            meta.set_dm_channel_infos(vec![DmChannelWatchInfo {
                collection_id: 1,
                dm_channel: "quiver-dml_0_1v0".to_string(),
                node_id_loaded: 7,
            }])
            .await
            .unwrap();
        }

        let reloaded = MetaReplica::new(
            kv,
            bus,
            Arc::new(LocalIdAllocator::starting_at(1000)),
        )
        .await
        .unwrap();
        assert!(reloaded.has_collection(1));
        assert!(reloaded.has_partition(1, 10));
        assert_eq!(reloaded.get_segment(100).unwrap().node_id, 7);
        assert_eq!(reloaded.get_dm_channel_infos_by_node(7).len(), 1);
        let query_info = reloaded.get_query_channel_info(1).await.unwrap();
        assert!(query_info.seek_position.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_info_covers_all_channel_kinds() {
        let (meta, _, _) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap();
        meta.set_dm_channel_infos(vec![DmChannelWatchInfo {
            collection_id: 1,
            dm_channel: "quiver-dml_0_1v0".to_string(),
            node_id_loaded: 3,
        }])
        .await
        .unwrap();
        meta.set_delta_channel_infos(
            1,
            vec![VchannelInfo {
                collection_id: 1,
                channel_name: "quiver-delta_0_1v0".to_string(),
                seek_position: None,
                unflushed_segment_ids: vec![],
                flushed_segment_ids: vec![],
                dropped_segment_ids: vec![],
            }],
        )
        .await
        .unwrap();
        meta.get_query_channel_info(1).await.unwrap();

        let info = meta.get_watched_channels_by_node(3);
        assert_eq!(info.node_id, 3);
        assert_eq!(info.collection_channels.len(), 1);
        let channels = &info.collection_channels[0].channels;
        assert!(channels.iter().any(|c| c.starts_with("quiver-dml")));
        assert!(channels.iter().any(|c| c.starts_with("quiver-delta")));
        assert!(channels.iter().any(|c| c.starts_with("quiver-query-")));
    }

    #[tokio::test]
    async fn test_release_collection_clears_everything() {
        let (meta, _, kv) = replica_with_bus().await;
        meta.add_collection(1, LoadType::LoadCollection, None)
            .await
            .unwrap();
        meta.add_partitions(1, &[10]).await.unwrap();
        let mut saves = HashMap::new();
        saves.insert(1, vec![segment(100, 1, 10, 1)]);
        meta.save_global_sealed_seg_infos(saves).await.unwrap();

        meta.release_collection(1).await.unwrap();
        assert!(!meta.has_collection(1));
        assert!(!meta.has_segment(100));
        assert!(kv
            .load_with_prefix(paths::SEGMENT_META_PREFIX)
            .await
            .unwrap()
            .is_empty());
        assert!(kv
            .load_with_prefix(paths::COLLECTION_META_PREFIX)
            .await
            .unwrap()
            .is_empty());
    }
}
