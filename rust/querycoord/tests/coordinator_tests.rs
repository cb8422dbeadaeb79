//! End-to-end coordinator scenarios over in-process collaborators: a
//! canned-state broker, mock query nodes, the memory KV and message bus.

use prost::Message;
use quiver_broker::{Broker, GrpcBrokerConfig, LocalIdAllocator, TestBroker};
use quiver_metakv::{MemoryMetaKv, MetaKv};
use quiver_msgstream::MemoryMessageBus;
use quiver_querycoord::config::{
    BalanceConfig, EtcdConfig, NodeClientConfig, QueryCoordConfig, TaskConfig,
};
use quiver_querycoord::node::MockQueryNode;
use quiver_querycoord::paths;
use quiver_querycoord::session::{self, Session};
use quiver_querycoord::QueryCoord;
use quiver_types::channel;
use quiver_types::quiver_proto::{
    Binlog, ErrorCode, FieldBinlog, GetSegmentInfoRequest, LoadBalanceRequest,
    LoadCollectionRequest, LoadPartitionsRequest, MsgBase, MsgType, ReleaseCollectionRequest,
    ReleasePartitionsRequest, SealedSegmentsChangeInfo, SegmentBinlogs, SegmentInfo,
    SegmentState, ShowCollectionsRequest, ShowPartitionsRequest, TriggerCondition,
    VchannelInfo,
};
use std::sync::Arc;
use std::time::Duration;

const GIB: u64 = 1 << 30;

struct Harness {
    coord: Arc<QueryCoord>,
    broker: TestBroker,
    bus: Arc<MemoryMessageBus>,
    kv: Arc<dyn MetaKv>,
}

fn test_config(balance_interval: Duration, task: TaskConfig) -> QueryCoordConfig {
    QueryCoordConfig {
        service_name: "querycoord-test".to_string(),
        node_id: 1,
        etcd: EtcdConfig {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            root_path: "quiver-test".to_string(),
        },
        broker: quiver_broker::BrokerConfig::Grpc(GrpcBrokerConfig {
            root_coord_endpoint: "http://127.0.0.1:53100".to_string(),
            data_coord_endpoint: "http://127.0.0.1:53101".to_string(),
            index_coord_endpoint: "http://127.0.0.1:53102".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }),
        node_client: NodeClientConfig::default(),
        balance: BalanceConfig {
            balance_interval,
            ..Default::default()
        },
        task,
    }
}

fn default_task_config() -> TaskConfig {
    TaskConfig {
        retry_budget: 5,
        wait_for_node: Duration::from_secs(2),
    }
}

async fn start_coord(balance_interval: Duration) -> Harness {
    let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
    start_coord_with(kv, balance_interval, default_task_config()).await
}

/// Builds the coordinator without starting it, so tests can stage nodes
/// and journal state first.
async fn new_coord(kv: Arc<dyn MetaKv>, balance_interval: Duration, task: TaskConfig) -> Harness {
    let bus = Arc::new(MemoryMessageBus::new());
    let broker = TestBroker::new();
    let coord = QueryCoord::new(
        test_config(balance_interval, task),
        kv.clone(),
        bus.clone(),
        Broker::Test(broker.clone()),
        Arc::new(LocalIdAllocator::starting_at(1000)),
    )
    .await
    .unwrap();
    Harness {
        coord,
        broker,
        bus,
        kv,
    }
}

async fn start_coord_with(
    kv: Arc<dyn MetaKv>,
    balance_interval: Duration,
    task: TaskConfig,
) -> Harness {
    let h = new_coord(kv, balance_interval, task).await;
    h.coord.start().await.unwrap();
    h
}

async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_kv_prefix_empty(kv: &Arc<dyn MetaKv>, prefix: &str) {
    for _ in 0..500 {
        if kv.load_with_prefix(prefix).await.unwrap().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for prefix {} to drain", prefix);
}

fn binlogs(segment_id: i64, channel: &str, log_size: i64) -> SegmentBinlogs {
    SegmentBinlogs {
        segment_id,
        insert_channel: channel.to_string(),
        num_of_rows: 1024,
        field_binlogs: vec![FieldBinlog {
            field_id: 1,
            binlogs: vec![Binlog {
                entries_num: 1024,
                log_path: format!("files/{}/1.log", segment_id),
                log_size,
            }],
        }],
    }
}

fn vchannel(collection_id: i64, name: &str) -> VchannelInfo {
    VchannelInfo {
        collection_id,
        channel_name: name.to_string(),
        seek_position: None,
        unflushed_segment_ids: vec![],
        flushed_segment_ids: vec![],
        dropped_segment_ids: vec![],
    }
}

fn load_collection_req(collection_id: i64) -> LoadCollectionRequest {
    LoadCollectionRequest {
        base: Some(MsgBase::new(MsgType::LoadCollection)),
        collection_id,
        schema: None,
    }
}

// ---------------- scenario: single-node load and release ----------------

#[tokio::test]
async fn test_single_node_load_then_release() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let mock = MockQueryNode::new(1, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock.clone());

    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(100, "quiver-dml_0_1v0", (64 << 20) as i64)],
    );

    let status = h.coord.load_collection(load_collection_req(1)).await;
    assert!(status.is_success(), "load failed: {}", status.reason);

    wait_until("collection fully loaded", || {
        h.coord
            .meta()
            .get_collection(1)
            .map(|c| c.in_memory_percentage == 100)
            .unwrap_or(false)
    })
    .await;

    assert_eq!(mock.load_segment_requests().len(), 1);
    assert_eq!(mock.load_segment_requests()[0].infos[0].segment_id, 100);
    assert_eq!(mock.watch_dm_channel_requests().len(), 1);
    assert_eq!(
        mock.watch_dm_channel_requests()[0].infos[0].channel_name,
        "quiver-dml_0_1v0"
    );
    assert_eq!(mock.watch_delta_channel_requests().len(), 1);
    assert_eq!(mock.add_query_channel_requests().len(), 1);
    assert_eq!(h.coord.meta().get_segment(100).unwrap().node_id, 1);

    let shown = h
        .coord
        .show_collections(ShowCollectionsRequest {
            base: None,
            collection_ids: vec![],
        })
        .await;
    assert_eq!(shown.collection_ids, vec![1]);
    assert_eq!(shown.in_memory_percentages, vec![100]);

    // Release: meta drops the collection, the node gets one RPC, the KV is
    // left clean.
    let status = h
        .coord
        .release_collection(ReleaseCollectionRequest {
            base: None,
            collection_id: 1,
            node_id: 0,
        })
        .await;
    assert!(status.is_success(), "release failed: {}", status.reason);
    assert!(h.coord.meta().get_collection(1).is_none());
    assert_eq!(mock.released_collections(), vec![1]);
    assert_eq!(h.broker.released_dql_streams(), vec![1]);

    let shown = h
        .coord
        .show_collections(ShowCollectionsRequest {
            base: None,
            collection_ids: vec![],
        })
        .await;
    assert!(shown.collection_ids.is_empty());
    wait_kv_prefix_empty(&h.kv, paths::COLLECTION_META_PREFIX).await;
    wait_kv_prefix_empty(&h.kv, paths::SEGMENT_META_PREFIX).await;
    wait_kv_prefix_empty(&h.kv, paths::TRIGGER_TASK_PREFIX).await;
    h.coord.stop().await;
}

// ---------------- idempotence ----------------

#[tokio::test]
async fn test_double_load_and_double_release_are_idempotent() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let mock = MockQueryNode::new(1, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock.clone());
    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(100, "quiver-dml_0_1v0", 1 << 20)],
    );

    assert!(h.coord.load_collection(load_collection_req(1)).await.is_success());
    wait_until("first load settles", || {
        h.coord.meta().get_segment(100).is_some()
    })
    .await;
    let published = h.bus.messages(&channel::query_channel_name(1)).len();

    // Second load of a loaded collection: accepted, but the global sealed
    // set and the node must see no change.
    assert!(h.coord.load_collection(load_collection_req(1)).await.is_success());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.load_segment_requests().len(), 1);
    assert_eq!(
        h.bus.messages(&channel::query_channel_name(1)).len(),
        published
    );

    // Release drains even when the node refuses at first; releases retry
    // until the fleet is clean.
    mock.fail_next("release_collection", 2);
    assert!(h
        .coord
        .release_collection(ReleaseCollectionRequest {
            base: None,
            collection_id: 1,
            node_id: 0,
        })
        .await
        .is_success());
    assert!(h
        .coord
        .release_collection(ReleaseCollectionRequest {
            base: None,
            collection_id: 1,
            node_id: 0,
        })
        .await
        .is_success());
    assert_eq!(mock.released_collections(), vec![1]);
    assert_eq!(h.broker.released_dql_streams(), vec![1, 1]);
    h.coord.stop().await;
}

// ---------------- scenario: partition load and partial release ----------------

#[tokio::test]
async fn test_load_partitions_then_release_one() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let mock = MockQueryNode::new(1, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock.clone());
    h.broker.add_collection(1, vec![10, 11]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(100, "quiver-dml_0_1v0", 1 << 20)],
    );
    h.broker.set_recovery_info(
        1,
        11,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(101, "quiver-dml_0_1v0", 1 << 20)],
    );

    let status = h
        .coord
        .load_partitions(LoadPartitionsRequest {
            base: None,
            collection_id: 1,
            partition_ids: vec![10, 11],
            schema: None,
        })
        .await;
    assert!(status.is_success(), "load failed: {}", status.reason);
    wait_until("both partitions loaded", || {
        h.coord.meta().get_segment(100).is_some() && h.coord.meta().get_segment(101).is_some()
    })
    .await;

    let status = h
        .coord
        .release_partitions(ReleasePartitionsRequest {
            base: None,
            collection_id: 1,
            partition_ids: vec![10],
            node_id: 0,
        })
        .await;
    assert!(status.is_success(), "release failed: {}", status.reason);

    assert!(h.coord.meta().get_segment(100).is_none());
    assert!(h.coord.meta().get_segment(101).is_some());
    assert!(!h.coord.meta().has_partition(1, 10));
    assert!(h.coord.meta().has_partition(1, 11));
    assert!(h.coord.meta().is_partition_released(1, 10));

    let shown = h
        .coord
        .show_partitions(ShowPartitionsRequest {
            base: None,
            collection_id: 1,
            partition_ids: vec![],
        })
        .await;
    assert_eq!(shown.partition_ids, vec![11]);
    h.coord.stop().await;
}

// ---------------- scenario: node-down rebalance ----------------

#[tokio::test]
async fn test_node_down_drains_onto_survivor() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let mock1 = MockQueryNode::new(1, 0, 8 * GIB);
    let mock2 = MockQueryNode::new(2, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock1.clone());
    h.coord.cluster().register_mock_node(2, mock2.clone());
    for (node_id, address) in [(1, "127.0.0.1:21123"), (2, "127.0.0.1:21124")] {
        session::register_node_session(
            &h.kv,
            &Session {
                node_id,
                address: address.to_string(),
            },
        )
        .await
        .unwrap();
    }

    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![
            binlogs(101, "quiver-dml_0_1v0", 1 << 20),
            binlogs(102, "quiver-dml_0_1v0", 1 << 20),
            binlogs(103, "quiver-dml_0_1v0", 1 << 20),
            binlogs(104, "quiver-dml_0_1v0", 1 << 20),
        ],
    );

    assert!(h.coord.load_collection(load_collection_req(1)).await.is_success());
    wait_until("all four segments placed", || {
        (101..=104).all(|id| h.coord.meta().get_segment(id).is_some())
    })
    .await;
    let on_node_1 = h.coord.meta().get_segments_by_node(1).len();
    let on_node_2 = h.coord.meta().get_segments_by_node(2).len();
    assert_eq!(on_node_1 + on_node_2, 4);
    assert!(
        on_node_1 >= 1 && on_node_2 >= 1,
        "placement was {}/{}",
        on_node_1,
        on_node_2
    );

    // Node 1 disappears.
    session::remove_node_session(&h.kv, 1).await.unwrap();

    wait_until("segments drained onto node 2", || {
        h.coord.meta().get_segments_by_node(2).len() == 4
            && h.coord.meta().get_segments_by_node(1).is_empty()
    })
    .await;
    wait_until("node 1 forgotten", || !h.coord.cluster().has_node(1)).await;
    h.coord.stop().await;
}

// ---------------- scenario: compaction handoff ----------------

#[tokio::test]
async fn test_compaction_handoff_swaps_segments() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let mock1 = MockQueryNode::new(1, 0, 8 * GIB);
    let mock2 = MockQueryNode::new(2, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock1.clone());
    h.coord.cluster().register_mock_node(2, mock2.clone());

    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![
            binlogs(201, "quiver-dml_0_1v0", 1 << 20),
            binlogs(202, "quiver-dml_0_1v0", 1 << 20),
        ],
    );
    assert!(h.coord.load_collection(load_collection_req(1)).await.is_success());
    wait_until("segments 201 and 202 resident", || {
        h.coord.meta().get_segment(201).is_some() && h.coord.meta().get_segment(202).is_some()
    })
    .await;
    let node_of_201 = h.coord.meta().get_segment(201).unwrap().node_id;
    let node_of_202 = h.coord.meta().get_segment(202).unwrap().node_id;

    // The data service seals 203 out of 201 + 202 and journals the handoff.
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![
            binlogs(201, "quiver-dml_0_1v0", 1 << 20),
            binlogs(202, "quiver-dml_0_1v0", 1 << 20),
            binlogs(203, "quiver-dml_0_1v0", 2 << 20),
        ],
    );
    h.broker.set_segment_state(203, SegmentState::Flushed);
    let handoff = SegmentInfo {
        segment_id: 203,
        collection_id: 1,
        partition_id: 10,
        node_id: 0,
        mem_size: 2 << 20,
        num_rows: 2048,
        segment_state: SegmentState::Sealed as i32,
        compaction_from: vec![201, 202],
    };
    let key = format!("{}/1/10/203", paths::HANDOFF_SEGMENT_PREFIX);
    h.kv.save(&key, handoff.encode_to_vec()).await.unwrap();

    wait_until("handoff applied", || {
        h.coord.meta().get_segment(203).is_some()
            && h.coord.meta().get_segment(201).is_none()
            && h.coord.meta().get_segment(202).is_none()
    })
    .await;
    wait_kv_prefix_empty(&h.kv, paths::HANDOFF_SEGMENT_PREFIX).await;

    // The query channel carries one message swapping 203 in and 201/202
    // out on their former owners.
    let published = h.bus.messages(&channel::query_channel_name(1));
    let last = SealedSegmentsChangeInfo::decode(published.last().unwrap().as_slice()).unwrap();
    let online: Vec<i64> = last
        .infos
        .iter()
        .flat_map(|i| i.online_segments.iter().map(|s| s.segment_id))
        .collect();
    assert_eq!(online, vec![203]);
    let offline: Vec<(i64, i64)> = last
        .infos
        .iter()
        .flat_map(|i| {
            i.offline_segments
                .iter()
                .map(move |s| (i.offline_node_id, s.segment_id))
        })
        .collect();
    assert!(offline.contains(&(node_of_201, 201)));
    assert!(offline.contains(&(node_of_202, 202)));
    h.coord.stop().await;
}

// ---------------- scenario: reschedule after destination failure ----------------

#[tokio::test]
async fn test_exhausted_child_reschedules_onto_other_node() {
    let h = start_coord(Duration::from_secs(3600)).await;
    // Node 3 is cooler so placement picks it first, then refuses to load.
    let mock3 = MockQueryNode::new(3, 0, 10 * GIB);
    let mock4 = MockQueryNode::new(4, 5 * GIB, 10 * GIB);
    mock3.fail_next("load_segments", 6);
    h.coord.cluster().register_mock_node(3, mock3.clone());
    h.coord.cluster().register_mock_node(4, mock4.clone());

    h.broker.add_collection(9, vec![10]);
    h.broker.set_recovery_info(
        9,
        10,
        vec![vchannel(9, "quiver-dml_0_9v0")],
        vec![binlogs(400, "quiver-dml_0_9v0", 1 << 20)],
    );

    assert!(h.coord.load_collection(load_collection_req(9)).await.is_success());
    wait_until("segment rescheduled onto node 4", || {
        h.coord
            .meta()
            .get_segment(400)
            .map(|s| s.node_id == 4)
            .unwrap_or(false)
    })
    .await;
    assert!(mock3.load_segment_requests().is_empty());
    assert_eq!(mock4.load_segment_requests().len(), 1);
    wait_kv_prefix_empty(&h.kv, paths::ACTIVE_TASK_PREFIX).await;
    h.coord.stop().await;
}

// ---------------- scenario: memory-pressure balance ----------------

#[tokio::test]
async fn test_memory_pressure_balance_moves_segment() {
    let h = start_coord(Duration::from_millis(200)).await;
    let hot = MockQueryNode::new(1, (9.2 * GIB as f64) as u64, 10 * GIB);
    let cold = MockQueryNode::new(2, (4.5 * GIB as f64) as u64, 10 * GIB);
    h.coord.cluster().register_mock_node(1, hot.clone());
    h.coord.cluster().register_mock_node(2, cold.clone());

    // Seed the replica with a 3 GiB segment resident on the hot node.
    let meta = h.coord.meta();
    meta.add_collection(1, quiver_types::quiver_proto::LoadType::LoadCollection, None)
        .await
        .unwrap();
    meta.add_partitions(1, &[10]).await.unwrap();
    let mut saves = std::collections::HashMap::new();
    saves.insert(
        1,
        vec![SegmentInfo {
            segment_id: 301,
            collection_id: 1,
            partition_id: 10,
            node_id: 1,
            mem_size: 3 * GIB as i64,
            num_rows: 1 << 20,
            segment_state: SegmentState::Sealed as i32,
            compaction_from: vec![],
        }],
    );
    meta.save_global_sealed_seg_infos(saves).await.unwrap();
    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(301, "quiver-dml_0_1v0", 3 * GIB as i64)],
    );

    wait_until("segment moved to the cold node", || {
        h.coord
            .meta()
            .get_segment(301)
            .map(|s| s.node_id == 2)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(cold.load_segment_requests().len(), 1);
    h.coord.stop().await;
}

// ---------------- scenario: crash recovery resumes children ----------------

#[tokio::test]
async fn test_recovery_resumes_done_parent_with_pending_children() {
    use quiver_querycoord::meta::MetaReplica;
    use quiver_types::quiver_proto::{
        AddQueryChannelRequest, LoadSegmentsRequest, SegmentLoadInfo,
    };

    let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());

    // A previous incarnation got as far as journaling the parent Done with
    // its children still pending, then died.
    {
        let bus = Arc::new(MemoryMessageBus::new());
        let meta = MetaReplica::new(
            kv.clone(),
            bus,
            Arc::new(LocalIdAllocator::starting_at(1)),
        )
        .await
        .unwrap();
        meta.add_collection(7, quiver_types::quiver_proto::LoadType::LoadCollection, None)
            .await
            .unwrap();
        meta.add_partitions(7, &[10]).await.unwrap();

        let parent_req = LoadCollectionRequest {
            base: Some(MsgBase::new(MsgType::LoadCollection)),
            collection_id: 7,
            schema: None,
        };
        let mut saves = vec![
            (paths::trigger_task_key(500), parent_req.encode_to_vec()),
            (paths::task_info_key(500), b"2".to_vec()), // Done
        ];
        for (i, segment_id) in [(0i64, 701i64), (1, 702), (2, 703)] {
            let child_id = 501 + i;
            let req = LoadSegmentsRequest {
                base: Some(MsgBase::new(MsgType::LoadSegments)),
                dst_node_id: 1,
                infos: vec![SegmentLoadInfo {
                    segment_id,
                    partition_id: 10,
                    collection_id: 7,
                    num_of_rows: 128,
                    binlog_paths: vec![],
                    compaction_from: vec![],
                    index_infos: vec![],
                    segment_size: 1 << 20,
                }],
                schema: None,
                source_node_id: 0,
                collection_id: 7,
            };
            saves.push((paths::active_task_key(child_id), req.encode_to_vec()));
            saves.push((paths::task_info_key(child_id), b"0".to_vec())); // Undo
        }
        let query_req = AddQueryChannelRequest {
            base: Some(MsgBase::new(MsgType::WatchQueryChannels)),
            node_id: 1,
            collection_id: 7,
            query_channel: channel::query_channel_name(7),
            query_result_channel: channel::query_result_channel_name(7),
            seek_position: None,
            global_sealed_segments: vec![],
        };
        saves.push((paths::active_task_key(504), query_req.encode_to_vec()));
        saves.push((paths::task_info_key(504), b"0".to_vec()));
        kv.multi_save(saves).await.unwrap();
    }

    let h = new_coord(kv, Duration::from_secs(3600), default_task_config()).await;
    let mock = MockQueryNode::new(1, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock.clone());
    h.coord.start().await.unwrap();

    wait_until("recovered children loaded and percentage at 100", || {
        [701, 702, 703]
            .iter()
            .all(|id| h.coord.meta().get_segment(*id).is_some())
            && h.coord
                .meta()
                .get_collection(7)
                .map(|c| c.in_memory_percentage == 100)
                .unwrap_or(false)
    })
    .await;
    assert_eq!(mock.load_segment_requests().len(), 3);
    wait_kv_prefix_empty(&h.kv, paths::TRIGGER_TASK_PREFIX).await;
    wait_kv_prefix_empty(&h.kv, paths::ACTIVE_TASK_PREFIX).await;
    h.coord.stop().await;
}

// ---------------- boundaries ----------------

#[tokio::test]
async fn test_load_with_no_nodes_fails_with_no_available_node() {
    let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
    let h = start_coord_with(
        kv,
        Duration::from_secs(3600),
        TaskConfig {
            retry_budget: 0,
            wait_for_node: Duration::from_millis(200),
        },
    )
    .await;
    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(100, "quiver-dml_0_1v0", 1 << 20)],
    );

    let status = h.coord.load_collection(load_collection_req(1)).await;
    assert!(!status.is_success());
    assert_eq!(status.code(), ErrorCode::NoAvailableNode);
    // Rollback wiped the half-created collection.
    wait_until("collection rolled back", || {
        h.coord.meta().get_collection(1).is_none()
    })
    .await;
    h.coord.stop().await;
}

#[tokio::test]
async fn test_oversized_segment_fails_with_insufficient_memory() {
    let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
    let h = start_coord_with(
        kv,
        Duration::from_secs(3600),
        TaskConfig {
            retry_budget: 0,
            wait_for_node: Duration::from_millis(200),
        },
    )
    .await;
    let mock = MockQueryNode::new(1, 0, GIB);
    h.coord.cluster().register_mock_node(1, mock.clone());
    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(100, "quiver-dml_0_1v0", 2 * GIB as i64)],
    );

    let status = h.coord.load_collection(load_collection_req(1)).await;
    assert!(!status.is_success());
    assert_eq!(status.code(), ErrorCode::InsufficientMemory);
    // No partial placement may remain.
    assert!(mock.load_segment_requests().is_empty());
    wait_until("collection rolled back", || {
        h.coord.meta().get_collection(1).is_none()
    })
    .await;
    h.coord.stop().await;
}

#[tokio::test]
async fn test_manual_load_balance_moves_named_segments() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let mock1 = MockQueryNode::new(1, 0, 8 * GIB);
    let mock2 = MockQueryNode::new(2, 0, 8 * GIB);
    h.coord.cluster().register_mock_node(1, mock1.clone());
    h.coord.cluster().register_mock_node(2, mock2.clone());
    h.broker.add_collection(1, vec![10]);
    h.broker.set_recovery_info(
        1,
        10,
        vec![vchannel(1, "quiver-dml_0_1v0")],
        vec![binlogs(100, "quiver-dml_0_1v0", 1 << 20)],
    );
    assert!(h.coord.load_collection(load_collection_req(1)).await.is_success());
    wait_until("segment resident", || h.coord.meta().get_segment(100).is_some()).await;
    let source = h.coord.meta().get_segment(100).unwrap().node_id;
    let target = if source == 1 { 2 } else { 1 };

    let status = h
        .coord
        .load_balance(LoadBalanceRequest {
            base: None,
            source_node_ids: vec![source],
            dst_node_ids: vec![target],
            sealed_segment_ids: vec![100],
            balance_reason: TriggerCondition::LoadBalance as i32,
        })
        .await;
    assert!(status.is_success(), "balance failed: {}", status.reason);
    assert_eq!(h.coord.meta().get_segment(100).unwrap().node_id, target);
    h.coord.stop().await;
}

// ---------------- read-side handlers ----------------

#[tokio::test]
async fn test_get_segment_info_rejects_unknown_segment() {
    let h = start_coord(Duration::from_secs(3600)).await;
    let resp = h
        .coord
        .get_segment_info(GetSegmentInfoRequest {
            base: None,
            segment_ids: vec![999],
        })
        .await;
    assert!(!resp.status.unwrap().is_success());
    h.coord.stop().await;
}
