use crate::{
    AllocError, BrokerCallError, GetRecoveryInfoError, ShowPartitionsError,
};
use parking_lot::Mutex;
use quiver_types::quiver_proto::{
    FieldIndexInfo, SegmentBinlogs, SegmentState, SegmentStateInfo, VchannelInfo,
};
use quiver_types::{CollectionId, PartitionId, SegmentId, TaskId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

/// Canned-state broker used in tests: collections, recovery topologies and
/// index descriptors are seeded up front, and every upstream side effect is
/// recorded for assertions.
#[derive(Clone, Debug, Default)]
pub struct TestBroker {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    partitions: HashMap<CollectionId, Vec<PartitionId>>,
    recovery: HashMap<(CollectionId, PartitionId), (Vec<VchannelInfo>, Vec<SegmentBinlogs>)>,
    index_infos: HashMap<SegmentId, Vec<FieldIndexInfo>>,
    segment_states: HashMap<SegmentId, SegmentState>,
    released_dql_streams: Vec<CollectionId>,
    refer_locks: HashMap<TaskId, Vec<SegmentId>>,
    next_id: i64,
    fail_recovery_info: bool,
}

impl TestBroker {
    pub fn new() -> Self {
        TestBroker {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                ..Default::default()
            })),
        }
    }

    pub fn add_collection(&self, collection_id: CollectionId, partitions: Vec<PartitionId>) {
        self.inner.lock().partitions.insert(collection_id, partitions);
    }

    pub fn set_recovery_info(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        channels: Vec<VchannelInfo>,
        binlogs: Vec<SegmentBinlogs>,
    ) {
        self.inner
            .lock()
            .recovery
            .insert((collection_id, partition_id), (channels, binlogs));
    }

    pub fn set_index_info(&self, segment_id: SegmentId, infos: Vec<FieldIndexInfo>) {
        self.inner.lock().index_infos.insert(segment_id, infos);
    }

    pub fn set_segment_state(&self, segment_id: SegmentId, state: SegmentState) {
        self.inner.lock().segment_states.insert(segment_id, state);
    }

    pub fn set_fail_recovery_info(&self, fail: bool) {
        self.inner.lock().fail_recovery_info = fail;
    }

    /// Collections whose DQL stream has been released, in call order.
    pub fn released_dql_streams(&self) -> Vec<CollectionId> {
        self.inner.lock().released_dql_streams.clone()
    }

    /// Segment ids currently pinned under any task's refer lock.
    pub fn locked_segments(&self) -> Vec<SegmentId> {
        let inner = self.inner.lock();
        let mut out: Vec<SegmentId> = inner.refer_locks.values().flatten().copied().collect();
        out.sort_unstable();
        out
    }

    pub async fn show_partition_ids(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<PartitionId>, ShowPartitionsError> {
        self.inner
            .lock()
            .partitions
            .get(&collection_id)
            .cloned()
            .ok_or(ShowPartitionsError::CollectionNotFound(collection_id))
    }

    pub async fn get_recovery_info(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Result<(Vec<VchannelInfo>, Vec<SegmentBinlogs>), GetRecoveryInfoError> {
        let inner = self.inner.lock();
        if inner.fail_recovery_info {
            return Err(GetRecoveryInfoError::Rejected("injected".to_string()));
        }
        inner
            .recovery
            .get(&(collection_id, partition_id))
            .cloned()
            // An unknown partition legitimately has no topology yet.
            .map_or_else(|| Ok((vec![], vec![])), Ok)
    }

    pub async fn get_index_infos(
        &self,
        _collection_id: CollectionId,
        segment_id: SegmentId,
    ) -> Result<Vec<FieldIndexInfo>, tonic::Status> {
        Ok(self
            .inner
            .lock()
            .index_infos
            .get(&segment_id)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn release_dql_message_stream(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), BrokerCallError> {
        self.inner.lock().released_dql_streams.push(collection_id);
        Ok(())
    }

    pub async fn acquire_segments_refer_lock(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<(), BrokerCallError> {
        self.inner
            .lock()
            .refer_locks
            .insert(task_id, segment_ids.to_vec());
        Ok(())
    }

    pub async fn release_segments_refer_lock(
        &self,
        task_id: TaskId,
        _segment_ids: &[SegmentId],
    ) -> Result<(), BrokerCallError> {
        self.inner.lock().refer_locks.remove(&task_id);
        Ok(())
    }

    pub async fn get_segment_states(
        &self,
        segment_ids: &[SegmentId],
    ) -> Result<Vec<SegmentStateInfo>, BrokerCallError> {
        let inner = self.inner.lock();
        Ok(segment_ids
            .iter()
            .map(|id| SegmentStateInfo {
                segment_id: *id,
                state: inner
                    .segment_states
                    .get(id)
                    .copied()
                    .unwrap_or(SegmentState::NotExist) as i32,
            })
            .collect())
    }

    pub async fn alloc_id(&self) -> Result<i64, AllocError> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        Ok(id)
    }

    pub async fn alloc_timestamp(&self) -> Result<Timestamp, AllocError> {
        let mut inner = self.inner.lock();
        let ts = inner.next_id as Timestamp;
        inner.next_id += 1;
        Ok(ts)
    }
}
