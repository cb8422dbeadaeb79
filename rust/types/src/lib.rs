pub mod channel;
pub mod task;

pub mod quiver_proto;

pub use channel::*;
pub use task::*;

/// All Quiver identifiers (collection, partition, segment, node, task) are
/// 64-bit signed integers handed out by the root coordinator.
pub type UniqueId = i64;

pub type CollectionId = UniqueId;
pub type PartitionId = UniqueId;
pub type SegmentId = UniqueId;
pub type NodeId = UniqueId;
pub type TaskId = UniqueId;

/// Logical clock value supplied by the root coordinator's time oracle.
pub type Timestamp = u64;
