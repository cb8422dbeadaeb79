//! Key layout of the coordinator's slice of the meta KV. Hierarchical,
//! `/`-delimited; every constant here is a prefix, never a full key.

pub const COLLECTION_META_PREFIX: &str = "queryCoord-collectionMeta";
/// `<prefix>/<collection>/<partition>/<segment>`
pub const SEGMENT_META_PREFIX: &str = "queryCoord-segmentMeta";
/// `<prefix>/<collection>/<channel>`
pub const DM_CHANNEL_META_PREFIX: &str = "queryCoord-dmChannelWatchInfo";
/// `<prefix>/<collection>/<channel>`
pub const DELTA_CHANNEL_META_PREFIX: &str = "queryCoord-deltaChannel";
/// `<prefix>/<collection>`
pub const QUERY_CHANNEL_META_PREFIX: &str = "queryCoord-queryChannelInfo";
/// `<prefix>/<msg id>`; journal entry written before the matching change
/// message may be acted on by query nodes.
pub const CHANGE_INFO_META_PREFIX: &str = "queryCoord-sealedSegmentChangeInfo";

pub const TRIGGER_TASK_PREFIX: &str = "queryCoord-triggerTask";
pub const ACTIVE_TASK_PREFIX: &str = "queryCoord-activeTask";
pub const TASK_INFO_PREFIX: &str = "queryCoord-taskInfo";

/// `<prefix>/<node>/<seq>`
pub const CHANNEL_UNSUBSCRIBE_PREFIX: &str = "channelUnsubscribeInfo";

/// Written by the data service, consumed here: `<prefix>/<coll>/<part>/<seg>`.
pub const HANDOFF_SEGMENT_PREFIX: &str = "querycoord-handoff";

/// `<prefix>/<node id>`, value is a JSON session record.
pub const QUERY_NODE_SESSION_PREFIX: &str = "session/queryNode";
/// The coordinator's own session key; its disappearance is the fence.
pub const QUERY_COORD_SESSION_KEY: &str = "session/queryCoord";

pub fn collection_meta_key(collection_id: i64) -> String {
    format!("{}/{}", COLLECTION_META_PREFIX, collection_id)
}

pub fn segment_meta_key(collection_id: i64, partition_id: i64, segment_id: i64) -> String {
    format!(
        "{}/{}/{}/{}",
        SEGMENT_META_PREFIX, collection_id, partition_id, segment_id
    )
}

pub fn dm_channel_meta_key(collection_id: i64, channel: &str) -> String {
    format!("{}/{}/{}", DM_CHANNEL_META_PREFIX, collection_id, channel)
}

pub fn delta_channel_meta_key(collection_id: i64, channel: &str) -> String {
    format!("{}/{}/{}", DELTA_CHANNEL_META_PREFIX, collection_id, channel)
}

pub fn query_channel_meta_key(collection_id: i64) -> String {
    format!("{}/{}", QUERY_CHANNEL_META_PREFIX, collection_id)
}

pub fn change_info_key(msg_id: i64) -> String {
    format!("{}/{}", CHANGE_INFO_META_PREFIX, msg_id)
}

pub fn trigger_task_key(task_id: i64) -> String {
    format!("{}/{}", TRIGGER_TASK_PREFIX, task_id)
}

pub fn active_task_key(task_id: i64) -> String {
    format!("{}/{}", ACTIVE_TASK_PREFIX, task_id)
}

pub fn task_info_key(task_id: i64) -> String {
    format!("{}/{}", TASK_INFO_PREFIX, task_id)
}

pub fn channel_unsubscribe_key(node_id: i64, seq: u64) -> String {
    format!("{}/{}/{}", CHANNEL_UNSUBSCRIBE_PREFIX, node_id, seq)
}

pub fn query_node_session_key(node_id: i64) -> String {
    format!("{}/{}", QUERY_NODE_SESSION_PREFIX, node_id)
}
