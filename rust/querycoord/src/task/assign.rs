//! Shared fan-out helper: place a batch of load/watch requests, merge them
//! per destination, and synthesize the delta- and query-channel children
//! each destination still needs.

use crate::task::internal::{
    LoadSegmentsTask, WatchDeltaChannelsTask, WatchDmChannelsTask, WatchQueryChannelTask,
};
use crate::task::{QueryCoordTask, TaskEnv, TaskError};
use prost::Message;
use quiver_types::quiver_proto::{
    AddQueryChannelRequest, LoadSegmentsRequest, MsgBase, MsgType, WatchDeltaChannelsRequest,
    WatchDmChannelsRequest,
};
use quiver_types::NodeId;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Hard ceiling on one journaled load request; keeps every KV value below
/// the store's limit.
pub const MERGED_REQUEST_SIZE_LIMIT: usize = 200_000;

/// Places the given requests and returns the internal child tasks, parent
/// pointer already set. The caller owns adding them to the parent's child
/// list and persisting them.
pub async fn assign_internal_task(
    env: &TaskEnv,
    parent: Arc<dyn QueryCoordTask>,
    mut load_reqs: Vec<LoadSegmentsRequest>,
    mut watch_reqs: Vec<WatchDmChannelsRequest>,
    wait: bool,
    exclude: &[NodeId],
    include: &[NodeId],
) -> Result<Vec<Arc<dyn QueryCoordTask>>, TaskError> {
    let collection_id = load_reqs
        .first()
        .map(|r| r.collection_id)
        .or_else(|| watch_reqs.first().map(|r| r.collection_id));
    let Some(collection_id) = collection_id else {
        return Ok(Vec::new());
    };

    env.cluster
        .allocate_segments_to_query_node(&mut load_reqs, wait, exclude, include)
        .await?;
    env.cluster
        .allocate_channels_to_query_node(&mut watch_reqs, wait, exclude)
        .await?;

    let merged_loads = merge_load_segment_requests(load_reqs);

    let condition = parent.core().trigger_condition();
    let mut children: Vec<Arc<dyn QueryCoordTask>> = Vec::new();
    let mut destinations: BTreeSet<NodeId> = BTreeSet::new();

    for req in merged_loads {
        destinations.insert(req.dst_node_id);
        let task_id = env.allocator.alloc_id().await?;
        let child =
            LoadSegmentsTask::new(task_id, condition, env.retry_budget, req);
        children.push(child);
    }
    for req in watch_reqs {
        destinations.insert(req.node_id);
        let task_id = env.allocator.alloc_id().await?;
        let child =
            WatchDmChannelsTask::new(task_id, condition, env.retry_budget, req);
        children.push(child);
    }

    // Destinations that are not yet consuming the collection's query
    // channel get one; likewise for delta channels.
    let delta_infos = env.meta.get_delta_channel_infos(collection_id);
    let query_info = env.meta.get_query_channel_info(collection_id).await?;
    for node_id in destinations {
        if !env.cluster.has_watched_delta_channel(node_id, collection_id)
            && !delta_infos.is_empty()
        {
            let task_id = env.allocator.alloc_id().await?;
            let req = WatchDeltaChannelsRequest {
                base: Some(MsgBase::new(MsgType::WatchDeltaChannels)),
                node_id,
                collection_id,
                infos: delta_infos.clone(),
            };
            children.push(WatchDeltaChannelsTask::new(
                task_id,
                condition,
                env.retry_budget,
                req,
            ));
        }
        if !env.cluster.has_watched_query_channel(node_id, collection_id) {
            let task_id = env.allocator.alloc_id().await?;
            let req = AddQueryChannelRequest {
                base: Some(MsgBase::new(MsgType::WatchQueryChannels)),
                node_id,
                collection_id,
                query_channel: query_info.query_channel.clone(),
                query_result_channel: query_info.query_result_channel.clone(),
                seek_position: query_info.seek_position.clone(),
                global_sealed_segments: query_info.global_sealed_segments.clone(),
            };
            children.push(WatchQueryChannelTask::new(
                task_id,
                condition,
                env.retry_budget,
                req,
            ));
        }
    }

    for child in &children {
        child.core().set_parent(&parent);
    }
    Ok(children)
}

/// Merge load requests that landed on the same destination, splitting
/// whenever the serialized batch would cross the size ceiling.
pub fn merge_load_segment_requests(reqs: Vec<LoadSegmentsRequest>) -> Vec<LoadSegmentsRequest> {
    let mut merged: Vec<LoadSegmentsRequest> = Vec::new();
    for req in reqs {
        match merged.iter_mut().find(|m| {
            m.dst_node_id == req.dst_node_id
                && m.collection_id == req.collection_id
                && m.encoded_len() + req.encoded_len() <= MERGED_REQUEST_SIZE_LIMIT
        }) {
            Some(target) => target.infos.extend(req.infos),
            None => merged.push(req),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_types::quiver_proto::{Binlog, FieldBinlog, SegmentLoadInfo};

    fn load_req(dst: NodeId, segment_id: i64, path_len: usize) -> LoadSegmentsRequest {
        LoadSegmentsRequest {
            base: Some(MsgBase::new(MsgType::LoadSegments)),
            dst_node_id: dst,
            infos: vec![SegmentLoadInfo {
                segment_id,
                partition_id: 10,
                collection_id: 1,
                num_of_rows: 1,
                binlog_paths: vec![FieldBinlog {
                    field_id: 1,
                    binlogs: vec![Binlog {
                        entries_num: 1,
                        log_path: "p".repeat(path_len),
                        log_size: 1,
                    }],
                }],
                compaction_from: vec![],
                index_infos: vec![],
                segment_size: 1,
            }],
            schema: None,
            source_node_id: 0,
            collection_id: 1,
        }
    }

    #[test]
    fn test_merge_groups_by_destination() {
        let reqs = vec![load_req(1, 100, 10), load_req(2, 101, 10), load_req(1, 102, 10)];
        let merged = merge_load_segment_requests(reqs);
        assert_eq!(merged.len(), 2);
        let to_one = merged.iter().find(|m| m.dst_node_id == 1).unwrap();
        assert_eq!(to_one.infos.len(), 2);
    }

    #[test]
    fn test_merge_splits_at_size_ceiling() {
        let reqs: Vec<LoadSegmentsRequest> =
            (0..25).map(|i| load_req(1, 100 + i, 20_000)).collect();
        let total: usize = reqs.iter().map(|r| r.encoded_len()).sum();
        let merged = merge_load_segment_requests(reqs);

        assert_eq!(merged.len(), total.div_ceil(MERGED_REQUEST_SIZE_LIMIT));
        for m in &merged {
            assert!(m.encoded_len() <= MERGED_REQUEST_SIZE_LIMIT);
        }
        let segments: usize = merged.iter().map(|m| m.infos.len()).sum();
        assert_eq!(segments, 25);
    }
}
