//! Wire types for the Quiver control plane.
//!
//! These message structs and the client stubs in [`clients`] are
//! hand-maintained in lockstep with `idl/quiver/proto/quiver.proto` so the
//! build does not depend on protoc. Field tags are frozen; append-only.

mod clients;

pub use clients::data_coord_client;
pub use clients::index_coord_client;
pub use clients::query_node_client;
pub use clients::root_coord_client;

// ===================== common =====================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    UnexpectedError = 1,
    NotReadyServe = 2,
    NoAvailableNode = 3,
    InsufficientMemory = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(enumeration = "ErrorCode", tag = "1")]
    pub error_code: i32,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}

/// Message kinds carried in [`MsgBase`]. The 500 block is reserved for the
/// query coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MsgType {
    Undefined = 0,
    LoadCollection = 500,
    ReleaseCollection = 501,
    LoadPartitions = 502,
    ReleasePartitions = 503,
    HandoffSegments = 504,
    LoadBalanceSegments = 505,
    LoadSegments = 506,
    ReleaseSegments = 507,
    WatchDmChannels = 508,
    WatchDeltaChannels = 509,
    WatchQueryChannels = 510,
    SealedSegmentsChangeInfo = 511,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgBase {
    #[prost(enumeration = "MsgType", tag = "1")]
    pub msg_type: i32,
    #[prost(int64, tag = "2")]
    pub msg_id: i64,
    #[prost(uint64, tag = "3")]
    pub timestamp: u64,
    #[prost(int64, tag = "4")]
    pub source_id: i64,
}

/// Envelope used to sniff the message kind out of a marshaled request
/// before decoding it fully: every request carries its [`MsgBase`] at tag 1
/// and protobuf decoding skips the unknown rest.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgHeader {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
}

/// A position in one channel of the message stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgPosition {
    #[prost(string, tag = "1")]
    pub channel_name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub msg_id: i64,
    #[prost(uint64, tag = "3")]
    pub timestamp: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValuePair {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StateCode {
    Initializing = 0,
    Healthy = 1,
    Abnormal = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComponentInfo {
    #[prost(int64, tag = "1")]
    pub node_id: i64,
    #[prost(string, tag = "2")]
    pub role: ::prost::alloc::string::String,
    #[prost(enumeration = "StateCode", tag = "3")]
    pub state_code: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComponentStates {
    #[prost(message, optional, tag = "1")]
    pub state: ::core::option::Option<ComponentInfo>,
    #[prost(message, optional, tag = "2")]
    pub status: ::core::option::Option<Status>,
}

// ===================== schema =====================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    None = 0,
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    Float = 10,
    Double = 11,
    String = 20,
    BinaryVector = 100,
    FloatVector = 101,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldSchema {
    #[prost(int64, tag = "1")]
    pub field_id: i64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub is_primary_key: bool,
    #[prost(enumeration = "DataType", tag = "4")]
    pub data_type: i32,
    #[prost(message, repeated, tag = "5")]
    pub type_params: ::prost::alloc::vec::Vec<KeyValuePair>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CollectionSchema {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub auto_id: bool,
    #[prost(message, repeated, tag = "4")]
    pub fields: ::prost::alloc::vec::Vec<FieldSchema>,
}

// ===================== segments and channels =====================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SegmentState {
    NotExist = 0,
    Growing = 1,
    Sealed = 2,
    Flushing = 3,
    Flushed = 4,
    Dropped = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Binlog {
    #[prost(int64, tag = "1")]
    pub entries_num: i64,
    #[prost(string, tag = "2")]
    pub log_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub log_size: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldBinlog {
    #[prost(int64, tag = "1")]
    pub field_id: i64,
    #[prost(message, repeated, tag = "2")]
    pub binlogs: ::prost::alloc::vec::Vec<Binlog>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldIndexInfo {
    #[prost(int64, tag = "1")]
    pub field_id: i64,
    #[prost(bool, tag = "2")]
    pub enable_index: bool,
    #[prost(string, tag = "3")]
    pub index_name: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub index_id: i64,
    #[prost(int64, tag = "5")]
    pub build_id: i64,
    #[prost(message, repeated, tag = "6")]
    pub index_params: ::prost::alloc::vec::Vec<KeyValuePair>,
    #[prost(string, repeated, tag = "7")]
    pub index_file_paths: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, tag = "8")]
    pub index_size: i64,
}

/// The coordinator's record of one sealed segment's placement. At most one
/// record exists per segment id at any time.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SegmentInfo {
    #[prost(int64, tag = "1")]
    pub segment_id: i64,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, tag = "3")]
    pub partition_id: i64,
    #[prost(int64, tag = "4")]
    pub node_id: i64,
    #[prost(int64, tag = "5")]
    pub mem_size: i64,
    #[prost(int64, tag = "6")]
    pub num_rows: i64,
    #[prost(enumeration = "SegmentState", tag = "7")]
    pub segment_state: i32,
    #[prost(int64, repeated, tag = "8")]
    pub compaction_from: ::prost::alloc::vec::Vec<i64>,
}

/// A virtual stream channel plus the segment topology needed to recover it,
/// as reported by the data coordinator.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VchannelInfo {
    #[prost(int64, tag = "1")]
    pub collection_id: i64,
    #[prost(string, tag = "2")]
    pub channel_name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub seek_position: ::core::option::Option<MsgPosition>,
    #[prost(int64, repeated, tag = "4")]
    pub unflushed_segment_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "5")]
    pub flushed_segment_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "6")]
    pub dropped_segment_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SegmentBinlogs {
    #[prost(int64, tag = "1")]
    pub segment_id: i64,
    #[prost(string, tag = "2")]
    pub insert_channel: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub num_of_rows: i64,
    #[prost(message, repeated, tag = "4")]
    pub field_binlogs: ::prost::alloc::vec::Vec<FieldBinlog>,
}

/// Everything a query node needs to load one sealed segment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SegmentLoadInfo {
    #[prost(int64, tag = "1")]
    pub segment_id: i64,
    #[prost(int64, tag = "2")]
    pub partition_id: i64,
    #[prost(int64, tag = "3")]
    pub collection_id: i64,
    #[prost(int64, tag = "4")]
    pub num_of_rows: i64,
    #[prost(message, repeated, tag = "5")]
    pub binlog_paths: ::prost::alloc::vec::Vec<FieldBinlog>,
    #[prost(int64, repeated, tag = "6")]
    pub compaction_from: ::prost::alloc::vec::Vec<i64>,
    #[prost(message, repeated, tag = "7")]
    pub index_infos: ::prost::alloc::vec::Vec<FieldIndexInfo>,
    #[prost(int64, tag = "8")]
    pub segment_size: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DmChannelWatchInfo {
    #[prost(int64, tag = "1")]
    pub collection_id: i64,
    #[prost(string, tag = "2")]
    pub dm_channel: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub node_id_loaded: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryChannelInfo {
    #[prost(int64, tag = "1")]
    pub collection_id: i64,
    #[prost(string, tag = "2")]
    pub query_channel: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub query_result_channel: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "4")]
    pub global_sealed_segments: ::prost::alloc::vec::Vec<SegmentInfo>,
    #[prost(message, optional, tag = "5")]
    pub seek_position: ::core::option::Option<MsgPosition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PartitionState {
    NotPresent = 0,
    PartialInMemory = 1,
    InMemory = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionStates {
    #[prost(int64, tag = "1")]
    pub partition_id: i64,
    #[prost(enumeration = "PartitionState", tag = "2")]
    pub state: i32,
    #[prost(int64, tag = "3")]
    pub in_memory_percentage: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LoadType {
    LoadCollection = 0,
    LoadPartition = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CollectionInfo {
    #[prost(int64, tag = "1")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "2")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(message, repeated, tag = "3")]
    pub partition_states: ::prost::alloc::vec::Vec<PartitionStates>,
    #[prost(enumeration = "LoadType", tag = "4")]
    pub load_type: i32,
    #[prost(message, optional, tag = "5")]
    pub schema: ::core::option::Option<CollectionSchema>,
    #[prost(int64, repeated, tag = "6")]
    pub released_partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, tag = "7")]
    pub in_memory_percentage: i64,
}

/// One placement delta: segments coming online on a node and segments going
/// offline, published atomically on the collection's query channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SegmentChangeInfo {
    #[prost(int64, tag = "1")]
    pub online_node_id: i64,
    #[prost(message, repeated, tag = "2")]
    pub online_segments: ::prost::alloc::vec::Vec<SegmentInfo>,
    #[prost(int64, tag = "3")]
    pub offline_node_id: i64,
    #[prost(message, repeated, tag = "4")]
    pub offline_segments: ::prost::alloc::vec::Vec<SegmentInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SealedSegmentsChangeInfo {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(message, repeated, tag = "2")]
    pub infos: ::prost::alloc::vec::Vec<SegmentChangeInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnsubscribeChannels {
    #[prost(int64, tag = "1")]
    pub collection_id: i64,
    #[prost(string, repeated, tag = "2")]
    pub channels: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnsubscribeChannelInfo {
    #[prost(int64, tag = "1")]
    pub node_id: i64,
    #[prost(message, repeated, tag = "2")]
    pub collection_channels: ::prost::alloc::vec::Vec<UnsubscribeChannels>,
}

// ===================== query coordinator surface =====================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadCollectionRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(message, optional, tag = "3")]
    pub schema: ::core::option::Option<CollectionSchema>,
}

/// Doubles as the per-node release RPC: `node_id == 0` means "the whole
/// fleet" and is only ever seen by the coordinator itself.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseCollectionRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, tag = "3")]
    pub node_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadPartitionsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "3")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(message, optional, tag = "4")]
    pub schema: ::core::option::Option<CollectionSchema>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleasePartitionsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "3")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, tag = "4")]
    pub node_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShowCollectionsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, repeated, tag = "2")]
    pub collection_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShowCollectionsResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(int64, repeated, tag = "2")]
    pub collection_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "3")]
    pub in_memory_percentages: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShowPartitionsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "3")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShowPartitionsResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(int64, repeated, tag = "2")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "3")]
    pub in_memory_percentages: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPartitionStatesRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "3")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPartitionStatesResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(message, repeated, tag = "2")]
    pub partition_descriptions: ::prost::alloc::vec::Vec<PartitionStates>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSegmentInfoRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, repeated, tag = "2")]
    pub segment_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSegmentInfoResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(message, repeated, tag = "2")]
    pub infos: ::prost::alloc::vec::Vec<SegmentInfo>,
}

/// Why a balance was triggered; doubles as the trigger-task priority
/// (higher value is more urgent).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TriggerCondition {
    GrpcRequest = 0,
    Handoff = 1,
    LoadBalance = 2,
    NodeDown = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadBalanceRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, repeated, tag = "2")]
    pub source_node_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "3")]
    pub dst_node_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "4")]
    pub sealed_segment_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(enumeration = "TriggerCondition", tag = "5")]
    pub balance_reason: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateQueryChannelRequest {
    #[prost(int64, tag = "1")]
    pub collection_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateQueryChannelResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(string, tag = "2")]
    pub query_channel: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub query_result_channel: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub seek_position: ::core::option::Option<MsgPosition>,
    #[prost(message, repeated, tag = "5")]
    pub global_sealed_segments: ::prost::alloc::vec::Vec<SegmentInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetricsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(string, tag = "2")]
    pub request: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetricsResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(string, tag = "2")]
    pub response: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub component_name: ::prost::alloc::string::String,
}

// ===================== query node surface =====================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadSegmentsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub dst_node_id: i64,
    #[prost(message, repeated, tag = "3")]
    pub infos: ::prost::alloc::vec::Vec<SegmentLoadInfo>,
    #[prost(message, optional, tag = "4")]
    pub schema: ::core::option::Option<CollectionSchema>,
    #[prost(int64, tag = "5")]
    pub source_node_id: i64,
    #[prost(int64, tag = "6")]
    pub collection_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WatchDmChannelsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub node_id: i64,
    #[prost(int64, tag = "3")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "4")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(message, repeated, tag = "5")]
    pub infos: ::prost::alloc::vec::Vec<VchannelInfo>,
    #[prost(message, optional, tag = "6")]
    pub schema: ::core::option::Option<CollectionSchema>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WatchDeltaChannelsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub node_id: i64,
    #[prost(int64, tag = "3")]
    pub collection_id: i64,
    #[prost(message, repeated, tag = "4")]
    pub infos: ::prost::alloc::vec::Vec<VchannelInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddQueryChannelRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub node_id: i64,
    #[prost(int64, tag = "3")]
    pub collection_id: i64,
    #[prost(string, tag = "4")]
    pub query_channel: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub query_result_channel: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "6")]
    pub seek_position: ::core::option::Option<MsgPosition>,
    #[prost(message, repeated, tag = "7")]
    pub global_sealed_segments: ::prost::alloc::vec::Vec<SegmentInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseSegmentsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub node_id: i64,
    #[prost(int64, tag = "3")]
    pub collection_id: i64,
    #[prost(int64, repeated, tag = "4")]
    pub partition_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, repeated, tag = "5")]
    pub segment_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandoffSegmentsRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(message, repeated, tag = "2")]
    pub segment_infos: ::prost::alloc::vec::Vec<SegmentInfo>,
}

// ===================== root coordinator surface =====================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseDqlMessageStreamRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocIdRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocIdResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(int64, tag = "2")]
    pub id: i64,
    #[prost(uint32, tag = "3")]
    pub count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocTimestampRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocTimestampResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(uint64, tag = "2")]
    pub timestamp: u64,
    #[prost(uint32, tag = "3")]
    pub count: u32,
}

// ===================== data coordinator surface =====================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRecoveryInfoRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, tag = "3")]
    pub partition_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRecoveryInfoResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(message, repeated, tag = "2")]
    pub channels: ::prost::alloc::vec::Vec<VchannelInfo>,
    #[prost(message, repeated, tag = "3")]
    pub binlogs: ::prost::alloc::vec::Vec<SegmentBinlogs>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireSegmentLockRequest {
    #[prost(int64, tag = "1")]
    pub task_id: i64,
    #[prost(int64, tag = "2")]
    pub node_id: i64,
    #[prost(int64, repeated, tag = "3")]
    pub segment_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseSegmentLockRequest {
    #[prost(int64, tag = "1")]
    pub task_id: i64,
    #[prost(int64, tag = "2")]
    pub node_id: i64,
    #[prost(int64, repeated, tag = "3")]
    pub segment_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSegmentStatesRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, repeated, tag = "2")]
    pub segment_ids: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SegmentStateInfo {
    #[prost(int64, tag = "1")]
    pub segment_id: i64,
    #[prost(enumeration = "SegmentState", tag = "2")]
    pub state: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSegmentStatesResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(message, repeated, tag = "2")]
    pub states: ::prost::alloc::vec::Vec<SegmentStateInfo>,
}

// ===================== index coordinator surface =====================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetIndexInfosRequest {
    #[prost(message, optional, tag = "1")]
    pub base: ::core::option::Option<MsgBase>,
    #[prost(int64, tag = "2")]
    pub collection_id: i64,
    #[prost(int64, tag = "3")]
    pub segment_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetIndexInfosResponse {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<Status>,
    #[prost(message, repeated, tag = "2")]
    pub index_infos: ::prost::alloc::vec::Vec<FieldIndexInfo>,
}

// ===================== convenience impls =====================

impl Status {
    pub fn success() -> Self {
        Status {
            error_code: ErrorCode::Success as i32,
            reason: String::new(),
        }
    }

    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        Status {
            error_code: code as i32,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success as i32
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::try_from(self.error_code).unwrap_or(ErrorCode::UnexpectedError)
    }
}

impl MsgBase {
    pub fn new(msg_type: MsgType) -> Self {
        MsgBase {
            msg_type: msg_type as i32,
            msg_id: 0,
            timestamp: 0,
            source_id: 0,
        }
    }
}

impl SegmentInfo {
    pub fn state(&self) -> SegmentState {
        SegmentState::try_from(self.segment_state).unwrap_or(SegmentState::NotExist)
    }
}

