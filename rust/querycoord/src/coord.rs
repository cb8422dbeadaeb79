//! Wiring and controller loops.
//!
//! [`QueryCoord`] owns every component and runs four controllers: node
//! session watching, handoff-prefix watching, periodic memory-pressure
//! balancing, and offline-node draining. All of them are plain loops over
//! `tokio::select!` with one shared cancellation token.

use crate::channel_unsubscribe::ChannelUnsubscribeHandler;
use crate::cluster::Cluster;
use crate::config::QueryCoordConfig;
use crate::meta::{MetaError, MetaReplica};
use crate::session::{self, Session, SessionError, SessionEvent};
use crate::task::scheduler::TaskScheduler;
use crate::task::trigger::{HandoffTask, LoadBalanceTask};
use crate::task::{QueryCoordTask, TaskEnv, TaskError};
use crate::paths;
use prost::Message;
use quiver_broker::{Broker, IdAllocator};
use quiver_error::{ErrorCodes, QuiverError};
use quiver_metakv::{KvEventKind, MetaKv, MetaKvError};
use quiver_msgstream::MessageBus;
use quiver_types::quiver_proto::{
    HandoffSegmentsRequest, LoadBalanceRequest, MsgBase, MsgType, SegmentInfo, SegmentState,
    StateCode, TriggerCondition,
};
use quiver_types::NodeId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("meta replica failed: {0}")]
    Meta(#[from] MetaError),
    #[error("meta kv failed: {0}")]
    Kv(#[from] MetaKvError),
    #[error("session registry failed: {0}")]
    Session(#[from] SessionError),
    #[error("scheduler failed: {0}")]
    Scheduler(#[from] TaskError),
}

impl QuiverError for CoordError {
    fn code(&self) -> ErrorCodes {
        match self {
            CoordError::Meta(e) => e.code(),
            CoordError::Kv(e) => e.code(),
            CoordError::Session(e) => e.code(),
            CoordError::Scheduler(_) => ErrorCodes::Internal,
        }
    }
}

pub struct QueryCoord {
    pub(crate) config: QueryCoordConfig,
    pub(crate) env: TaskEnv,
    pub(crate) scheduler: Arc<TaskScheduler>,
    unsubscribe: Arc<ChannelUnsubscribeHandler>,
    state: AtomicI32,
    token: CancellationToken,
    handles: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    offline_nodes_tx: mpsc::UnboundedSender<NodeId>,
    offline_nodes_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<NodeId>>>,
}

impl std::fmt::Debug for QueryCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCoord")
            .field("node_id", &self.config.node_id)
            .field("state", &self.state_code())
            .finish()
    }
}

impl QueryCoord {
    pub async fn new(
        config: QueryCoordConfig,
        kv: Arc<dyn MetaKv>,
        bus: Arc<dyn MessageBus>,
        broker: Broker,
        allocator: Arc<dyn IdAllocator>,
    ) -> Result<Arc<Self>, CoordError> {
        let meta = MetaReplica::new(kv.clone(), bus.clone(), allocator.clone()).await?;
        let unsubscribe = ChannelUnsubscribeHandler::new(kv.clone(), bus.clone()).await?;
        let cluster = Cluster::new(
            meta.clone(),
            unsubscribe.clone(),
            config.node_client.clone(),
            config.task.wait_for_node,
        );
        let env = TaskEnv {
            broker,
            cluster,
            meta,
            kv,
            allocator,
            retry_budget: config.task.retry_budget,
        };
        let scheduler = TaskScheduler::new(env.clone());
        let (offline_nodes_tx, offline_nodes_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(QueryCoord {
            config,
            env,
            scheduler,
            unsubscribe,
            state: AtomicI32::new(StateCode::Initializing as i32),
            token: CancellationToken::new(),
            handles: parking_lot::Mutex::new(Vec::new()),
            offline_nodes_tx,
            offline_nodes_rx: parking_lot::Mutex::new(Some(offline_nodes_rx)),
        }))
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.env.cluster
    }

    pub fn meta(&self) -> &Arc<MetaReplica> {
        &self.env.meta
    }

    pub fn state_code(&self) -> StateCode {
        StateCode::try_from(self.state.load(Ordering::SeqCst)).unwrap_or(StateCode::Abnormal)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.state_code() == StateCode::Healthy
    }

    /// Recover all durable state, replay node sessions, re-hydrate the
    /// scheduler, then start every loop. Only after this returns does the
    /// coordinator report Healthy.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoordError> {
        session::register_coord_session(
            &self.env.kv,
            &Session {
                node_id: self.config.node_id,
                address: self.config.service_name.clone(),
            },
        )
        .await?;

        // Sessions present now come up online; nodes that the meta still
        // references but whose sessions are gone died while we were away.
        let sessions = session::list_node_sessions(&self.env.kv).await?;
        let mut live: HashSet<NodeId> = HashSet::new();
        for s in &sessions {
            if let Err(e) = self.env.cluster.register_node(s.node_id, s.address.clone()) {
                tracing::error!(node_id = s.node_id, "failed to register node: {}", e);
                continue;
            }
            live.insert(s.node_id);
        }
        let mut dead: HashSet<NodeId> = HashSet::new();
        for collection in self.env.meta.show_collections() {
            for seg in self.env.meta.get_segments_of_collection(collection.collection_id) {
                if !live.contains(&seg.node_id) {
                    dead.insert(seg.node_id);
                }
            }
        }
        for chan in self.env.meta.dm_channel_infos() {
            if !live.contains(&chan.node_id_loaded) {
                dead.insert(chan.node_id_loaded);
            }
        }

        self.scheduler.reload_from_kv().await?;

        let token = self.token.clone();
        let mut handles = Vec::new();
        handles.push(self.unsubscribe.start(token.clone()));
        handles.extend(self.scheduler.start(token.clone()));
        handles.push(self.spawn_watch_node_loop());
        handles.push(self.spawn_watch_handoff_segment_loop());
        handles.push(self.spawn_load_balance_segment_loop());
        handles.push(self.spawn_load_balance_node_loop());
        handles.push(self.spawn_session_fence_loop());
        self.handles.lock().extend(handles);

        for node_id in dead {
            tracing::warn!(node_id, "node died while coordinator was down; draining");
            let _ = self.offline_nodes_tx.send(node_id);
        }

        self.state.store(StateCode::Healthy as i32, Ordering::SeqCst);
        tracing::info!(node_id = self.config.node_id, "query coordinator started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.state.store(StateCode::Abnormal as i32, Ordering::SeqCst);
        self.token.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    // ---------------- controller loops ----------------

    fn spawn_watch_node_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coord = self.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut events = match session::watch_node_sessions(&coord.env.kv).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!("failed to watch node sessions: {}", e);
                    return;
                }
            };
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => return,
                    event = events.recv() => event,
                };
                let Some(event) = event else { return };
                match event {
                    SessionEvent::Added(session) => {
                        tracing::info!(node_id = session.node_id, address = %session.address, "node session added");
                        if let Err(e) = coord
                            .env
                            .cluster
                            .register_node(session.node_id, session.address)
                        {
                            tracing::error!(node_id = session.node_id, "failed to register node: {}", e);
                        }
                    }
                    SessionEvent::Removed(node_id) => {
                        tracing::warn!(node_id, "node session removed");
                        if coord.env.cluster.has_node(node_id) {
                            coord.env.cluster.stop_node(node_id).await;
                            let _ = coord.offline_nodes_tx.send(node_id);
                        }
                    }
                }
            }
        })
    }

    fn spawn_watch_handoff_segment_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coord = self.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            // Entries that arrived while the coordinator was down.
            match coord
                .env
                .kv
                .load_with_prefix(paths::HANDOFF_SEGMENT_PREFIX)
                .await
            {
                Ok(pending) => {
                    for (key, value) in pending {
                        coord.handle_handoff_entry(key, value).await;
                    }
                }
                Err(e) => tracing::error!("failed to replay handoff journal: {}", e),
            }

            let mut watch = match coord
                .env
                .kv
                .watch_prefix(paths::HANDOFF_SEGMENT_PREFIX)
                .await
            {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::error!("failed to watch handoff prefix: {}", e);
                    return;
                }
            };
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => return,
                    event = watch.recv() => event,
                };
                let Some(event) = event else { return };
                if event.kind == KvEventKind::Put {
                    coord.handle_handoff_entry(event.key, event.value).await;
                }
            }
        })
    }

    async fn handle_handoff_entry(self: &Arc<Self>, key: String, value: Vec<u8>) {
        let segment = match SegmentInfo::decode(value.as_slice()) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::error!(key = %key, "malformed handoff entry, removing: {}", e);
                let _ = self.env.kv.remove(&key).await;
                return;
            }
        };
        if segment.state() != SegmentState::Sealed {
            tracing::warn!(key = %key, "ignoring handoff of unsealed segment");
            let _ = self.env.kv.remove(&key).await;
            return;
        }
        // The data service may journal the handoff slightly ahead of the
        // flush; only a flushed segment has binlogs worth loading.
        match self.env.broker.get_segment_states(&[segment.segment_id]).await {
            Ok(states) => {
                let flushed = states.first().map(|s| {
                    matches!(
                        SegmentState::try_from(s.state),
                        Ok(SegmentState::Sealed | SegmentState::Flushing | SegmentState::Flushed)
                    )
                });
                if flushed != Some(true) {
                    tracing::warn!(key = %key, "handoff segment is not flushed, skipping");
                    let _ = self.env.kv.remove(&key).await;
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(key = %key, "could not probe segment state: {}", e);
                return;
            }
        }

        let task = match self.new_handoff_task(segment).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(key = %key, "failed to build handoff task: {}", e);
                return;
            }
        };
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            tracing::error!(key = %key, "failed to enqueue handoff task: {}", e);
            return;
        }

        // The journal entry is reaped once the handoff reaches a terminal
        // state, successful or not.
        let coord = self.clone();
        tokio::spawn(async move {
            if let Err(e) = task.core().wait_to_finish().await {
                tracing::error!(key = %key, "handoff failed: {}", e);
            }
            if let Err(e) = coord.env.kv.remove(&key).await {
                tracing::warn!(key = %key, "failed to reap handoff entry: {}", e);
            }
        });
    }

    async fn new_handoff_task(
        &self,
        segment: SegmentInfo,
    ) -> Result<Arc<dyn QueryCoordTask>, TaskError> {
        let task_id = self.env.allocator.alloc_id().await?;
        let timestamp = self.env.allocator.alloc_timestamp().await?;
        let req = HandoffSegmentsRequest {
            base: Some(MsgBase {
                msg_type: MsgType::HandoffSegments as i32,
                msg_id: task_id,
                timestamp,
                source_id: self.config.node_id,
            }),
            segment_infos: vec![segment],
        };
        Ok(HandoffTask::new(task_id, self.config.task.retry_budget, req))
    }

    fn spawn_load_balance_node_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coord = self.clone();
        let token = self.token.clone();
        let mut rx = self
            .offline_nodes_rx
            .lock()
            .take()
            .expect("load balance node loop started twice");
        tokio::spawn(async move {
            loop {
                let node_id = tokio::select! {
                    _ = token.cancelled() => return,
                    node_id = rx.recv() => node_id,
                };
                let Some(node_id) = node_id else { return };
                coord.drain_offline_node(node_id).await;
            }
        })
    }

    /// Regenerate the dead node's load on the survivors, then forget it.
    async fn drain_offline_node(self: &Arc<Self>, node_id: NodeId) {
        let owned_segments = self.env.meta.get_segments_by_node(node_id);
        let owned_channels = self.env.meta.get_dm_channel_infos_by_node(node_id);
        if owned_segments.is_empty() && owned_channels.is_empty() {
            self.env.cluster.remove_node_info(node_id);
            return;
        }

        let task = match self.new_node_down_balance_task(node_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(node_id, "failed to build node-down balance task: {}", e);
                self.requeue_offline_node(node_id);
                return;
            }
        };
        if let Err(e) = self.scheduler.enqueue(task.clone()).await {
            tracing::error!(node_id, "failed to enqueue node-down balance: {}", e);
            self.requeue_offline_node(node_id);
            return;
        }

        let coord = self.clone();
        tokio::spawn(async move {
            match task.core().wait_to_finish().await {
                Ok(()) => {
                    tracing::info!(node_id, "offline node drained");
                    coord.env.cluster.remove_node_info(node_id);
                }
                Err(e) => {
                    tracing::error!(node_id, "node-down balance failed, will retry: {}", e);
                    coord.requeue_offline_node(node_id);
                }
            }
        });
    }

    fn requeue_offline_node(self: &Arc<Self>, node_id: NodeId) {
        let coord = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = coord.offline_nodes_tx.send(node_id);
        });
    }

    async fn new_node_down_balance_task(
        &self,
        node_id: NodeId,
    ) -> Result<Arc<dyn QueryCoordTask>, TaskError> {
        let task_id = self.env.allocator.alloc_id().await?;
        let timestamp = self.env.allocator.alloc_timestamp().await?;
        let req = LoadBalanceRequest {
            base: Some(MsgBase {
                msg_type: MsgType::LoadBalanceSegments as i32,
                msg_id: task_id,
                timestamp,
                source_id: self.config.node_id,
            }),
            source_node_ids: vec![node_id],
            dst_node_ids: vec![],
            sealed_segment_ids: vec![],
            balance_reason: TriggerCondition::NodeDown as i32,
        };
        Ok(LoadBalanceTask::new(task_id, self.config.task.retry_budget, req))
    }

    fn spawn_load_balance_segment_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coord = self.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coord.config.balance.balance_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = coord.balance_by_memory_pressure().await {
                    tracing::warn!("memory-pressure balance pass failed: {}", e);
                }
            }
        })
    }

    /// One pass of the periodic balancer: if the spread between the
    /// hottest and coolest node exceeds the configured threshold, move the
    /// largest segments that close the gap without overloading the target.
    async fn balance_by_memory_pressure(self: &Arc<Self>) -> Result<(), TaskError> {
        let online = self.env.cluster.online_node_ids();
        if online.len() < 2 {
            return Ok(());
        }
        let mut rates: Vec<(NodeId, u64, u64)> = Vec::new(); // (id, used, total)
        for node_id in online {
            let Some(node) = self.env.cluster.get_node(node_id) else { continue };
            match node.sync_memory_metrics().await {
                Ok(info) if info.memory_total > 0 => {
                    rates.push((node_id, info.memory_usage, info.memory_total));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(node_id, "skipping node without metrics: {}", e);
                }
            }
        }
        if rates.len() < 2 {
            return Ok(());
        }
        let rate = |used: u64, total: u64| used as f64 / total as f64 * 100.0;
        let (hot, cold) = {
            let hot = rates
                .iter()
                .max_by(|a, b| rate(a.1, a.2).total_cmp(&rate(b.1, b.2)))
                .copied()
                .expect("non-empty");
            let cold = rates
                .iter()
                .min_by(|a, b| rate(a.1, a.2).total_cmp(&rate(b.1, b.2)))
                .copied()
                .expect("non-empty");
            (hot, cold)
        };
        let threshold = self.config.balance.memory_usage_max_difference_percentage as f64;
        let overload = self.config.balance.overloaded_memory_threshold_percentage as f64;
        if rate(hot.1, hot.2) - rate(cold.1, cold.2) <= threshold {
            return Ok(());
        }

        let mut segments = self.env.meta.get_segments_by_node(hot.0);
        segments.sort_by_key(|s| std::cmp::Reverse(s.mem_size));
        let (mut hot_used, mut cold_used) = (hot.1, cold.1);
        let mut chosen = Vec::new();
        for seg in segments {
            let size = seg.mem_size.max(0) as u64;
            if rate(cold_used + size, cold.2) > overload {
                continue;
            }
            hot_used = hot_used.saturating_sub(size);
            cold_used += size;
            chosen.push(seg.segment_id);
            if rate(hot_used, hot.2) - rate(cold_used, cold.2) <= threshold {
                break;
            }
        }
        if chosen.is_empty() {
            return Ok(());
        }
        tracing::info!(
            hot = hot.0,
            cold = cold.0,
            segments = ?chosen,
            "memory pressure balance triggered"
        );

        let task_id = self.env.allocator.alloc_id().await?;
        let timestamp = self.env.allocator.alloc_timestamp().await?;
        let req = LoadBalanceRequest {
            base: Some(MsgBase {
                msg_type: MsgType::LoadBalanceSegments as i32,
                msg_id: task_id,
                timestamp,
                source_id: self.config.node_id,
            }),
            source_node_ids: vec![hot.0],
            dst_node_ids: vec![cold.0],
            sealed_segment_ids: chosen,
            balance_reason: TriggerCondition::LoadBalance as i32,
        };
        let task = LoadBalanceTask::new(task_id, self.config.task.retry_budget, req);
        self.scheduler.enqueue(task.clone()).await?;
        tokio::spawn(async move {
            if let Err(e) = task.core().wait_to_finish().await {
                tracing::warn!("memory pressure balance failed: {}", e);
            }
        });
        Ok(())
    }

    fn spawn_session_fence_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coord = self.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let lost = tokio::select! {
                _ = token.cancelled() => return,
                lost = session::wait_for_session_loss(coord.env.kv.clone()) => lost,
            };
            if let Err(e) = lost {
                tracing::error!("session fence watch failed: {}", e);
            }
            // The session is gone: some other incarnation may already be
            // primary. Fail stop; supervision restarts the process.
            tracing::error!("coordinator session lost, fencing");
            coord.state.store(StateCode::Abnormal as i32, Ordering::SeqCst);
            coord.token.cancel();
        })
    }

    /// Resolves when the coordinator fenced itself or was stopped; the
    /// binary exits on it.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}
