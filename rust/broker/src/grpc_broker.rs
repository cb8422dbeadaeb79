use crate::config::GrpcBrokerConfig;
use crate::{
    AllocError, BrokerCallError, GetRecoveryInfoError, ShowPartitionsError,
};
use backon::{ExponentialBuilder, Retryable};
use quiver_config::Configurable;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::quiver_proto::data_coord_client::DataCoordClient;
use quiver_types::quiver_proto::index_coord_client::IndexCoordClient;
use quiver_types::quiver_proto::root_coord_client::RootCoordClient;
use quiver_types::quiver_proto::{
    AcquireSegmentLockRequest, AllocIdRequest, AllocTimestampRequest, FieldIndexInfo,
    GetIndexInfosRequest, GetRecoveryInfoRequest, GetSegmentStatesRequest, MsgBase, MsgType,
    ReleaseDqlMessageStreamRequest, ReleaseSegmentLockRequest, SegmentBinlogs, SegmentStateInfo,
    ShowPartitionsRequest, VchannelInfo,
};
use quiver_types::{CollectionId, PartitionId, SegmentId, TaskId, Timestamp};
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};

// Lost RPCs to the data coordinator during recovery-info fetches are common
// enough during rolling upgrades that we absorb a few before reporting.
const RECOVERY_INFO_RETRIES: usize = 3;

/// gRPC-backed [`crate::Broker`] variant. Since tonic channels multiplex,
/// cloning is cheap and every call clones its client.
#[derive(Debug, Clone)]
pub struct GrpcBroker {
    root_coord: RootCoordClient<Channel>,
    data_coord: DataCoordClient<Channel>,
    index_coord: IndexCoordClient<Channel>,
}

#[derive(Error, Debug)]
pub(crate) enum GrpcBrokerError {
    #[error("Failed to connect to peer coordinator")]
    FailedToConnect(#[from] tonic::transport::Error),
}

impl QuiverError for GrpcBrokerError {
    fn code(&self) -> ErrorCodes {
        match self {
            GrpcBrokerError::FailedToConnect(_) => ErrorCodes::Internal,
        }
    }
}

#[async_trait::async_trait]
impl Configurable<GrpcBrokerConfig> for GrpcBroker {
    async fn try_from_config(
        config: &GrpcBrokerConfig,
    ) -> Result<Self, Box<dyn QuiverError>> {
        let connect = |endpoint: &str| -> Result<Channel, GrpcBrokerError> {
            let endpoint = Endpoint::from_shared(endpoint.to_string())?
                .connect_timeout(config.connect_timeout)
                .timeout(config.request_timeout);
            Ok(endpoint.connect_lazy())
        };

        let root = connect(&config.root_coord_endpoint).map_err(|e| e.boxed())?;
        let data = connect(&config.data_coord_endpoint).map_err(|e| e.boxed())?;
        let index = connect(&config.index_coord_endpoint).map_err(|e| e.boxed())?;

        Ok(GrpcBroker {
            root_coord: RootCoordClient::new(root),
            data_coord: DataCoordClient::new(data),
            index_coord: IndexCoordClient::new(index),
        })
    }
}

impl GrpcBroker {
    pub async fn show_partition_ids(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<PartitionId>, ShowPartitionsError> {
        let mut client = self.root_coord.clone();
        let resp = client
            .show_partitions(ShowPartitionsRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                collection_id,
                partition_ids: vec![],
            })
            .await?
            .into_inner();
        match resp.status {
            Some(status) if status.is_success() => Ok(resp.partition_ids),
            Some(status) => {
                tracing::warn!(
                    collection_id,
                    reason = %status.reason,
                    "showPartitions returned non-success status"
                );
                Err(ShowPartitionsError::CollectionNotFound(collection_id))
            }
            None => Err(ShowPartitionsError::CollectionNotFound(collection_id)),
        }
    }

    pub async fn get_recovery_info(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Result<(Vec<VchannelInfo>, Vec<SegmentBinlogs>), GetRecoveryInfoError> {
        let fetch = || async {
            let mut client = self.data_coord.clone();
            let resp = client
                .get_recovery_info(GetRecoveryInfoRequest {
                    base: Some(MsgBase::new(MsgType::Undefined)),
                    collection_id,
                    partition_id,
                })
                .await?
                .into_inner();
            match resp.status {
                Some(status) if status.is_success() => Ok((resp.channels, resp.binlogs)),
                Some(status) => Err(GetRecoveryInfoError::Rejected(status.reason)),
                None => Err(GetRecoveryInfoError::Rejected("empty status".to_string())),
            }
        };

        fetch
            .retry(
                ExponentialBuilder::default().with_max_times(RECOVERY_INFO_RETRIES),
            )
            .when(|e: &GetRecoveryInfoError| e.code().is_transient())
            .notify(|e, dur| {
                tracing::warn!(
                    collection_id,
                    partition_id,
                    "getRecoveryInfo failed, retrying in {:?}: {}",
                    dur,
                    e
                );
            })
            .await
    }

    pub async fn get_index_infos(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
    ) -> Result<Vec<FieldIndexInfo>, tonic::Status> {
        let mut client = self.index_coord.clone();
        let resp = client
            .get_index_infos(GetIndexInfosRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                collection_id,
                segment_id,
            })
            .await?
            .into_inner();
        Ok(resp.index_infos)
    }

    pub async fn release_dql_message_stream(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), BrokerCallError> {
        let mut client = self.root_coord.clone();
        let status = client
            .release_dql_message_stream(ReleaseDqlMessageStreamRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                collection_id,
            })
            .await?
            .into_inner();
        if !status.is_success() {
            return Err(BrokerCallError::BadStatus(status.reason));
        }
        Ok(())
    }

    pub async fn acquire_segments_refer_lock(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<(), BrokerCallError> {
        let mut client = self.data_coord.clone();
        let status = client
            .acquire_segment_lock(AcquireSegmentLockRequest {
                task_id,
                node_id: 0,
                segment_ids: segment_ids.to_vec(),
            })
            .await?
            .into_inner();
        if !status.is_success() {
            return Err(BrokerCallError::BadStatus(status.reason));
        }
        Ok(())
    }

    pub async fn release_segments_refer_lock(
        &self,
        task_id: TaskId,
        segment_ids: &[SegmentId],
    ) -> Result<(), BrokerCallError> {
        let mut client = self.data_coord.clone();
        let status = client
            .release_segment_lock(ReleaseSegmentLockRequest {
                task_id,
                node_id: 0,
                segment_ids: segment_ids.to_vec(),
            })
            .await?
            .into_inner();
        if !status.is_success() {
            return Err(BrokerCallError::BadStatus(status.reason));
        }
        Ok(())
    }

    pub async fn get_segment_states(
        &self,
        segment_ids: &[SegmentId],
    ) -> Result<Vec<SegmentStateInfo>, BrokerCallError> {
        let mut client = self.data_coord.clone();
        let resp = client
            .get_segment_states(GetSegmentStatesRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                segment_ids: segment_ids.to_vec(),
            })
            .await?
            .into_inner();
        match resp.status {
            Some(status) if status.is_success() => Ok(resp.states),
            Some(status) => Err(BrokerCallError::BadStatus(status.reason)),
            None => Err(BrokerCallError::BadStatus("empty status".to_string())),
        }
    }

    pub async fn alloc_id(&self) -> Result<i64, AllocError> {
        let mut client = self.root_coord.clone();
        let resp = client
            .alloc_id(AllocIdRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                count: 1,
            })
            .await?
            .into_inner();
        match resp.status {
            Some(status) if status.is_success() => Ok(resp.id),
            Some(status) => Err(AllocError::Rejected(status.reason)),
            None => Err(AllocError::Rejected("empty status".to_string())),
        }
    }

    pub async fn alloc_timestamp(&self) -> Result<Timestamp, AllocError> {
        let mut client = self.root_coord.clone();
        let resp = client
            .alloc_timestamp(AllocTimestampRequest {
                base: Some(MsgBase::new(MsgType::Undefined)),
                count: 1,
            })
            .await?
            .into_inner();
        match resp.status {
            Some(status) if status.is_success() => Ok(resp.timestamp),
            Some(status) => Err(AllocError::Rejected(status.reason)),
            None => Err(AllocError::Rejected("empty status".to_string())),
        }
    }
}
