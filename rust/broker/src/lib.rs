//! Typed façade over the peer coordinators.
//!
//! The query coordinator never talks to the root, data, or index
//! coordinators directly; every upstream fact it needs (partition lists,
//! recovery topology, index locations, id/timestamp allocation, segment
//! refer locks) flows through [`Broker`].

pub mod config;
mod grpc_broker;
mod test_broker;

pub use config::{BrokerConfig, GrpcBrokerConfig};
pub use grpc_broker::GrpcBroker;
pub use test_broker::TestBroker;

use async_trait::async_trait;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::quiver_proto::{
    CollectionSchema, FieldIndexInfo, SegmentBinlogs, SegmentLoadInfo, SegmentStateInfo,
    VchannelInfo,
};
use quiver_types::{CollectionId, PartitionId, SegmentId, TaskId, Timestamp};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShowPartitionsError {
    #[error("collection {0} does not exist")]
    CollectionNotFound(CollectionId),
    #[error("root coordinator failed: {0}")]
    Grpc(#[from] tonic::Status),
}

impl QuiverError for ShowPartitionsError {
    fn code(&self) -> ErrorCodes {
        match self {
            ShowPartitionsError::CollectionNotFound(_) => ErrorCodes::NotFound,
            ShowPartitionsError::Grpc(e) => e.code().into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GetRecoveryInfoError {
    #[error("data coordinator failed: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("data coordinator rejected recovery request: {0}")]
    Rejected(String),
}

impl QuiverError for GetRecoveryInfoError {
    fn code(&self) -> ErrorCodes {
        match self {
            GetRecoveryInfoError::Grpc(e) => e.code().into(),
            GetRecoveryInfoError::Rejected(_) => ErrorCodes::Unavailable,
        }
    }
}

#[derive(Error, Debug)]
pub enum SegmentLoadInfoError {
    #[error("segment {0} has no binlog descriptors")]
    EmptyBinlogs(SegmentId),
    #[error("index coordinator failed: {0}")]
    Index(#[from] tonic::Status),
}

impl QuiverError for SegmentLoadInfoError {
    fn code(&self) -> ErrorCodes {
        match self {
            SegmentLoadInfoError::EmptyBinlogs(_) => ErrorCodes::Internal,
            SegmentLoadInfoError::Index(e) => e.code().into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum BrokerCallError {
    #[error("peer coordinator failed: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("peer coordinator returned non-success status: {0}")]
    BadStatus(String),
}

impl QuiverError for BrokerCallError {
    fn code(&self) -> ErrorCodes {
        match self {
            BrokerCallError::Grpc(e) => e.code().into(),
            BrokerCallError::BadStatus(_) => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum AllocError {
    #[error("root coordinator failed: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("allocation rejected: {0}")]
    Rejected(String),
}

impl QuiverError for AllocError {
    fn code(&self) -> ErrorCodes {
        match self {
            AllocError::Grpc(e) => e.code().into(),
            AllocError::Rejected(_) => ErrorCodes::Internal,
        }
    }
}

/// Source of globally unique ids and logical timestamps. Backed by the root
/// coordinator in production; tests use [`LocalIdAllocator`].
#[async_trait]
pub trait IdAllocator: Send + Sync + Debug {
    async fn alloc_id(&self) -> Result<i64, AllocError>;
    async fn alloc_timestamp(&self) -> Result<Timestamp, AllocError>;
}

/// Monotonic in-process allocator for tests and tools.
#[derive(Debug, Default)]
pub struct LocalIdAllocator {
    next: std::sync::atomic::AtomicI64,
}

impl LocalIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: i64) -> Self {
        LocalIdAllocator {
            next: std::sync::atomic::AtomicI64::new(first),
        }
    }
}

#[async_trait]
impl IdAllocator for LocalIdAllocator {
    async fn alloc_id(&self) -> Result<i64, AllocError> {
        Ok(self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }

    async fn alloc_timestamp(&self) -> Result<Timestamp, AllocError> {
        Ok(self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst) as Timestamp)
    }
}

#[derive(Debug, Clone)]
pub enum Broker {
    Grpc(GrpcBroker),
    Test(TestBroker),
}

impl Broker {
    /// Lists all partitions of a collection from the root coordinator.
    pub async fn show_partition_ids(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<PartitionId>, ShowPartitionsError> {
        match self {
            Broker::Grpc(grpc) => grpc.show_partition_ids(collection_id).await,
            Broker::Test(test) => test.show_partition_ids(collection_id).await,
        }
    }

    /// Returns the stream channels to watch and the sealed-segment binlogs
    /// needed to restore one partition. Transient failures are retried
    /// internally a few times before being reported.
    pub async fn get_recovery_info(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Result<(Vec<VchannelInfo>, Vec<SegmentBinlogs>), GetRecoveryInfoError> {
        match self {
            Broker::Grpc(grpc) => grpc.get_recovery_info(collection_id, partition_id).await,
            Broker::Test(test) => test.get_recovery_info(collection_id, partition_id).await,
        }
    }

    pub async fn get_index_infos(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
    ) -> Result<Vec<FieldIndexInfo>, tonic::Status> {
        match self {
            Broker::Grpc(grpc) => grpc.get_index_infos(collection_id, segment_id).await,
            Broker::Test(test) => test.get_index_infos(collection_id, segment_id).await,
        }
    }

    /// Synthesizes the per-segment load payload from recovery binlogs,
    /// optionally resolving index files and replacing the indexed field's
    /// raw size with the index footprint.
    pub async fn generate_segment_load_info(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        binlogs: &SegmentBinlogs,
        with_index: bool,
    ) -> Result<SegmentLoadInfo, SegmentLoadInfoError> {
        if binlogs.field_binlogs.is_empty() {
            return Err(SegmentLoadInfoError::EmptyBinlogs(binlogs.segment_id));
        }

        let mut load_info = SegmentLoadInfo {
            segment_id: binlogs.segment_id,
            partition_id,
            collection_id,
            num_of_rows: binlogs.num_of_rows,
            binlog_paths: binlogs.field_binlogs.clone(),
            compaction_from: Vec::new(),
            index_infos: Vec::new(),
            segment_size: 0,
        };

        if with_index {
            load_info.index_infos = self
                .get_index_infos(collection_id, binlogs.segment_id)
                .await?;
        }

        load_info.segment_size = estimate_segment_size(&load_info);
        Ok(load_info)
    }

    /// Tells the root coordinator to stop producing DQL frames to proxies
    /// for this collection. Must precede query-channel destruction.
    pub async fn release_dql_message_stream(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), BrokerCallError> {
        match self {
            Broker::Grpc(grpc) => grpc.release_dql_message_stream(collection_id).await,
            Broker::Test(test) => test.release_dql_message_stream(collection_id).await,
        }
    }

    /// Pins segment files so the data service cannot garbage-collect them
    /// while a load task is in flight.
    pub async fn acquire_segments_refer_lock(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<(), BrokerCallError> {
        match self {
            Broker::Grpc(grpc) => grpc.acquire_segments_refer_lock(task_id, segment_ids).await,
            Broker::Test(test) => test.acquire_segments_refer_lock(task_id, segment_ids).await,
        }
    }

    pub async fn release_segments_refer_lock(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<(), BrokerCallError> {
        match self {
            Broker::Grpc(grpc) => grpc.release_segments_refer_lock(task_id, segment_ids).await,
            Broker::Test(test) => test.release_segments_refer_lock(task_id, segment_ids).await,
        }
    }

    /// Probes whether segments have been flushed by the data service.
    pub async fn get_segment_states(
        &self,
        segment_ids: &[SegmentId],
    ) -> Result<Vec<SegmentStateInfo>, BrokerCallError> {
        match self {
            Broker::Grpc(grpc) => grpc.get_segment_states(segment_ids).await,
            Broker::Test(test) => test.get_segment_states(segment_ids).await,
        }
    }
}

#[async_trait]
impl IdAllocator for Broker {
    async fn alloc_id(&self) -> Result<i64, AllocError> {
        match self {
            Broker::Grpc(grpc) => grpc.alloc_id().await,
            Broker::Test(test) => test.alloc_id().await,
        }
    }

    async fn alloc_timestamp(&self) -> Result<Timestamp, AllocError> {
        match self {
            Broker::Grpc(grpc) => grpc.alloc_timestamp().await,
            Broker::Test(test) => test.alloc_timestamp().await,
        }
    }
}

/// Estimated resident size of a segment once loaded: raw binlog bytes, with
/// indexed fields costed at their index footprint instead.
fn estimate_segment_size(load_info: &SegmentLoadInfo) -> i64 {
    let mut size = 0i64;
    for field_binlog in &load_info.binlog_paths {
        let indexed = load_info
            .index_infos
            .iter()
            .find(|i| i.enable_index && i.field_id == field_binlog.field_id);
        match indexed {
            Some(index) => size += index.index_size,
            None => {
                size += field_binlog
                    .binlogs
                    .iter()
                    .map(|b| b.log_size)
                    .sum::<i64>()
            }
        }
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_types::quiver_proto::{Binlog, FieldBinlog};

    fn binlogs_fixture() -> SegmentBinlogs {
        SegmentBinlogs {
            segment_id: 100,
            insert_channel: "quiver-dml_0_1v0".to_string(),
            num_of_rows: 1024,
            field_binlogs: vec![
                FieldBinlog {
                    field_id: 1,
                    binlogs: vec![Binlog {
                        entries_num: 1024,
                        log_path: "files/1/100/1.log".to_string(),
                        log_size: 4096,
                    }],
                },
                FieldBinlog {
                    field_id: 2,
                    binlogs: vec![Binlog {
                        entries_num: 1024,
                        log_path: "files/1/100/2.log".to_string(),
                        log_size: 1 << 20,
                    }],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_generate_segment_load_info_without_index() {
        let broker = Broker::Test(TestBroker::new());
        let info = broker
            .generate_segment_load_info(1, 10, &binlogs_fixture(), false)
            .await
            .unwrap();
        assert_eq!(info.segment_id, 100);
        assert_eq!(info.segment_size, 4096 + (1 << 20));
        assert!(info.index_infos.is_empty());
    }

    #[tokio::test]
    async fn test_generate_segment_load_info_with_index_replaces_field_size() {
        let test = TestBroker::new();
        test.set_index_info(
            100,
            vec![FieldIndexInfo {
                field_id: 2,
                enable_index: true,
                index_name: "vec_index".to_string(),
                index_id: 7,
                build_id: 9,
                index_params: vec![],
                index_file_paths: vec!["files/index/9".to_string()],
                index_size: 2048,
            }],
        );
        let broker = Broker::Test(test);
        let info = broker
            .generate_segment_load_info(1, 10, &binlogs_fixture(), true)
            .await
            .unwrap();
        // Field 2 is costed at its index size, field 1 at its binlog size.
        assert_eq!(info.segment_size, 4096 + 2048);
        assert_eq!(info.index_infos.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_binlogs_rejected() {
        let broker = Broker::Test(TestBroker::new());
        let empty = SegmentBinlogs {
            segment_id: 5,
            insert_channel: String::new(),
            num_of_rows: 0,
            field_binlogs: vec![],
        };
        let err = broker
            .generate_segment_load_info(1, 10, &empty, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SegmentLoadInfoError::EmptyBinlogs(5)));
    }

    #[tokio::test]
    async fn test_local_allocator_is_monotonic() {
        let alloc = LocalIdAllocator::starting_at(100);
        let first = alloc.alloc_id().await.unwrap();
        let second = alloc.alloc_id().await.unwrap();
        assert!(second > first);
    }
}
