//! The trigger-task scheduler.
//!
//! One loop drains the priority queue of trigger tasks; a second serves the
//! activate channel of internal tasks, one transient worker per attempt.
//! Every transition is journaled: a trigger task is durable from enqueue,
//! its children are written together with the parent's Done marker in one
//! batch, and a restart re-hydrates everything still in flight.

use crate::paths;
use crate::task::queue::TriggerTaskQueue;
use crate::task::{QueryCoordTask, TaskEnv, TaskError};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use prost::Message;
use quiver_types::quiver_proto::{
    HandoffSegmentsRequest, LoadBalanceRequest, LoadCollectionRequest, LoadPartitionsRequest,
    LoadSegmentsRequest, MsgHeader, MsgType, ReleaseCollectionRequest, ReleasePartitionsRequest,
    SegmentInfo, SegmentState, TriggerCondition, WatchDeltaChannelsRequest,
    WatchDmChannelsRequest,
};
use quiver_types::quiver_proto::{AddQueryChannelRequest, DmChannelWatchInfo, ReleaseSegmentsRequest};
use quiver_types::{CollectionId, TaskId, TaskState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Attempts at syncing meta placement after the children finish, before
/// the trigger task is failed outright.
const FINALIZE_RETRIES: usize = 20;
/// Pause between unbounded release retries so a wedged node cannot spin
/// the activate channel.
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(100);
const TRIGGER_RETRY_DELAY: Duration = Duration::from_secs(1);

struct ActivateMsg {
    task: Arc<dyn QueryCoordTask>,
    done: oneshot::Sender<Result<(), TaskError>>,
}

pub struct TaskScheduler {
    env: TaskEnv,
    queue: Arc<TriggerTaskQueue>,
    activate_tx: mpsc::UnboundedSender<ActivateMsg>,
    activate_rx: Mutex<Option<mpsc::UnboundedReceiver<ActivateMsg>>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("queued", &self.queue.len())
            .finish()
    }
}

fn state_bytes(state: TaskState) -> Vec<u8> {
    (state as i32).to_string().into_bytes()
}

fn task_id_from_key(key: &str) -> Option<TaskId> {
    key.rsplit('/').next()?.parse().ok()
}

impl TaskScheduler {
    pub fn new(env: TaskEnv) -> Arc<Self> {
        let (activate_tx, activate_rx) = mpsc::unbounded_channel();
        Arc::new(TaskScheduler {
            env,
            queue: Arc::new(TriggerTaskQueue::new()),
            activate_tx,
            activate_rx: Mutex::new(Some(activate_rx)),
        })
    }

    pub fn pending_trigger_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Journal a trigger task and queue it. Once this returns, a restart
    /// will resume the task.
    pub async fn enqueue(&self, task: Arc<dyn QueryCoordTask>) -> Result<(), TaskError> {
        let task_id = task.core().task_id();
        self.env
            .kv
            .multi_save(vec![
                (paths::trigger_task_key(task_id), task.marshal()),
                (paths::task_info_key(task_id), state_bytes(TaskState::Undo)),
            ])
            .await?;
        tracing::info!(task_id, msg_type = ?task.msg_type(), "enqueued trigger task");
        self.queue.enqueue(task);
        Ok(())
    }

    pub fn start(self: &Arc<Self>, token: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let schedule = {
            let scheduler = self.clone();
            let token = token.clone();
            tokio::spawn(async move { scheduler.schedule_loop(token).await })
        };
        let activate = {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.process_activate_task_loop(token).await })
        };
        vec![schedule, activate]
    }

    async fn schedule_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = token.cancelled() => return,
                task = self.queue.pop() => task,
            };
            self.run_trigger_task(task).await;
        }
    }

    async fn process_activate_task_loop(self: Arc<Self>, token: CancellationToken) {
        let mut rx = self
            .activate_rx
            .lock()
            .take()
            .expect("activate loop started twice");
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => return,
                msg = rx.recv() => msg,
            };
            let Some(msg) = msg else { return };
            let scheduler = self.clone();
            tokio::spawn(async move {
                let result = scheduler.process_internal_task(msg.task).await;
                let _ = msg.done.send(result);
            });
        }
    }

    /// One attempt at an internal task; retry policy lives in the waiter.
    async fn process_internal_task(
        &self,
        task: Arc<dyn QueryCoordTask>,
    ) -> Result<(), TaskError> {
        task.pre_execute(&self.env).await?;
        self.env
            .kv
            .save(
                &paths::task_info_key(task.core().task_id()),
                state_bytes(TaskState::Doing),
            )
            .await?;
        task.core().set_state(TaskState::Doing);
        task.clone().execute(&self.env).await?;
        task.post_execute(&self.env).await?;
        Ok(())
    }

    async fn run_trigger_task(&self, task: Arc<dyn QueryCoordTask>) {
        let task_id = task.core().task_id();
        tracing::info!(task_id, msg_type = ?task.msg_type(), "processing trigger task");

        let mut failure: Option<TaskError> = None;

        if matches!(task.core().state(), TaskState::Undo | TaskState::Doing) {
            if let Err(e) = self.execute_trigger(&task).await {
                let unbounded = !task.honors_retry_budget();
                if unbounded || task.core().retry_remaining() > 0 {
                    if !unbounded {
                        task.core().decrease_retry();
                    }
                    tracing::warn!(task_id, "trigger task failed, requeueing: {}", e);
                    let queue = self.queue.clone();
                    let task = task.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(TRIGGER_RETRY_DELAY).await;
                        queue.enqueue(task);
                    });
                    return;
                }
                failure = Some(e);
            }
        }

        if failure.is_none() {
            if let Err(e) = self.process_children(&task).await {
                failure = Some(e);
            }
        }
        if failure.is_none() {
            if let Err(e) = self.finalize_trigger(&task).await {
                failure = Some(e);
            }
        }

        if let Some(error) = &failure {
            // Shutdown mid-task: leave every journal record in place so the
            // next boot resumes instead of rolling back.
            if error.is_cancelled() {
                tracing::info!(task_id, "cancelled mid-flight; journal kept for recovery");
                task.core().finish(Err(error.clone()));
                return;
            }
            tracing::warn!(task_id, "trigger task failed terminally: {}", error);
            task.core().record_error(error.clone());
            self.roll_back_trigger(&task).await;
        }

        if let Err(e) = task.post_execute(&self.env).await {
            tracing::warn!(task_id, "post-execute failed: {}", e);
        }
        self.cleanup_trigger(&task).await;

        let terminal = if failure.is_none() {
            TaskState::Expired
        } else {
            TaskState::Failed
        };
        task.core().set_state(terminal);
        task.core().finish(match failure {
            None => Ok(()),
            Some(e) => Err(e),
        });
        tracing::info!(task_id, state = ?terminal, "trigger task finished");
    }

    /// pre-execute, execute, then journal every child together with the
    /// parent's Done marker in a single batch. A crash in between leaves
    /// either no children at all or a Done parent with all of them.
    async fn execute_trigger(&self, task: &Arc<dyn QueryCoordTask>) -> Result<(), TaskError> {
        let task_id = task.core().task_id();
        task.pre_execute(&self.env).await?;
        self.env
            .kv
            .save(&paths::task_info_key(task_id), state_bytes(TaskState::Doing))
            .await?;
        task.core().set_state(TaskState::Doing);

        task.core().clear_children();
        task.clone().execute(&self.env).await?;

        let children = task.core().children();
        let mut saves = Vec::with_capacity(children.len() * 2 + 1);
        for child in &children {
            let child_id = child.core().task_id();
            saves.push((paths::active_task_key(child_id), child.marshal()));
            saves.push((paths::task_info_key(child_id), state_bytes(TaskState::Undo)));
        }
        saves.push((paths::task_info_key(task_id), state_bytes(TaskState::Done)));
        self.env.kv.multi_save(saves).await?;
        task.core().set_state(TaskState::Done);

        // Load requests are acknowledged once accepted; completion is
        // observed through the in-memory percentage.
        if matches!(task.msg_type(), MsgType::LoadCollection | MsgType::LoadPartitions) {
            task.core().finish(Ok(()));
        }
        Ok(())
    }

    /// Dispatch the children: load-segments first, everything else after
    /// the loads succeeded.
    async fn process_children(&self, task: &Arc<dyn QueryCoordTask>) -> Result<(), TaskError> {
        let children = task.core().children();
        if children.is_empty() {
            return Ok(());
        }
        let (high, low): (Vec<_>, Vec<_>) = children
            .into_iter()
            .partition(|c| c.msg_type() == MsgType::LoadSegments);
        self.process_group(task, high).await?;
        self.process_group(task, low).await?;
        Ok(())
    }

    async fn process_group(
        &self,
        parent: &Arc<dyn QueryCoordTask>,
        group: Vec<Arc<dyn QueryCoordTask>>,
    ) -> Result<(), TaskError> {
        if group.is_empty() {
            return Ok(());
        }
        let waiters = group
            .into_iter()
            .map(|child| self.wait_activate_task_done(parent.clone(), child));
        let results = futures::future::join_all(waiters).await;
        let mut first: Option<TaskError> = None;
        for result in results {
            if let Err(e) = result {
                parent.core().record_error(e.clone());
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drive one internal task to a terminal state: re-push while retry
    /// budget remains, reschedule when the budget is exhausted or the
    /// destination vanished, count releases against dead nodes as done.
    fn wait_activate_task_done(
        &self,
        parent: Arc<dyn QueryCoordTask>,
        child: Arc<dyn QueryCoordTask>,
    ) -> BoxFuture<'_, Result<(), TaskError>> {
        async move {
            let child_id = child.core().task_id();
            loop {
                let (done_tx, done_rx) = oneshot::channel();
                self.activate_tx
                    .send(ActivateMsg {
                        task: child.clone(),
                        done: done_tx,
                    })
                    .map_err(|_| TaskError::cancelled())?;
                let result = done_rx.await.unwrap_or_else(|_| Err(TaskError::cancelled()));

                let error = match result {
                    Ok(()) => {
                        child.core().set_state(TaskState::Done);
                        child.core().finish(Ok(()));
                        self.remove_internal_task_records(child_id).await;
                        return Ok(());
                    }
                    Err(e) => e,
                };

                let valid = child.is_valid(&self.env);
                if valid {
                    if !child.honors_retry_budget() {
                        tracing::warn!(
                            task_id = child_id,
                            "release-style task failed, retrying: {}",
                            error
                        );
                        tokio::time::sleep(RELEASE_RETRY_DELAY).await;
                        continue;
                    }
                    if child.core().retry_remaining() > 0 {
                        child.core().decrease_retry();
                        tracing::warn!(task_id = child_id, "internal task failed, retrying: {}", error);
                        continue;
                    }
                } else if !child.honors_retry_budget() {
                    // Releasing against a node that no longer exists; the
                    // node-down path owns whatever it left behind.
                    tracing::info!(task_id = child_id, "release target gone, counting as done");
                    child.core().set_state(TaskState::Done);
                    child.core().finish(Ok(()));
                    self.remove_internal_task_records(child_id).await;
                    return Ok(());
                }

                tracing::warn!(
                    task_id = child_id,
                    valid,
                    "internal task exhausted, rescheduling: {}",
                    error
                );
                let replacements = match child.reschedule(&self.env).await {
                    Ok(replacements) => replacements,
                    Err(e) => {
                        child.core().set_state(TaskState::Failed);
                        child.core().finish(Err(e.clone()));
                        return Err(e);
                    }
                };

                // Swap the dead task's journal entries for its replacements
                // in one commit.
                let mut saves = Vec::with_capacity(replacements.len() * 2);
                for replacement in &replacements {
                    let id = replacement.core().task_id();
                    saves.push((paths::active_task_key(id), replacement.marshal()));
                    saves.push((paths::task_info_key(id), state_bytes(TaskState::Undo)));
                }
                let removals = vec![
                    paths::active_task_key(child_id),
                    paths::task_info_key(child_id),
                ];
                self.env.kv.multi_save_and_remove(saves, removals).await?;

                parent.core().remove_child_by_id(child_id);
                child.core().set_state(TaskState::Failed);
                child.core().finish(Err(error));
                for replacement in &replacements {
                    parent.core().add_child(replacement.clone());
                }

                let waiters = replacements
                    .into_iter()
                    .map(|r| self.wait_activate_task_done(parent.clone(), r));
                let results = futures::future::join_all(waiters).await;
                for result in results {
                    result?;
                }
                return Ok(());
            }
        }
        .boxed()
    }

    /// Step after all children succeeded: fold the children's effects into
    /// the meta replica and, for loads, advance the loaded percentage once
    /// the fleet demonstrably watches everything it should.
    async fn finalize_trigger(&self, task: &Arc<dyn QueryCoordTask>) -> Result<(), TaskError> {
        let mut attempt = 0;
        loop {
            match self.sync_trigger_effects(task).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= FINALIZE_RETRIES {
                        return Err(e);
                    }
                    tracing::warn!(
                        task_id = task.core().task_id(),
                        attempt,
                        "failed to sync meta after trigger task, retrying: {}",
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn sync_trigger_effects(&self, task: &Arc<dyn QueryCoordTask>) -> Result<(), TaskError> {
        match task.msg_type() {
            MsgType::LoadCollection
            | MsgType::LoadPartitions
            | MsgType::HandoffSegments
            | MsgType::LoadBalanceSegments => {
                let mut seg_saves: HashMap<CollectionId, Vec<SegmentInfo>> = HashMap::new();
                let mut dm_infos: Vec<DmChannelWatchInfo> = Vec::new();
                for child in task.core().children() {
                    if child.core().state() != TaskState::Done {
                        continue;
                    }
                    collect_child_effects(child.as_ref(), &mut seg_saves, &mut dm_infos);
                }
                self.env.meta.save_global_sealed_seg_infos(seg_saves).await?;
                self.env.meta.set_dm_channel_infos(dm_infos).await?;

                if matches!(task.msg_type(), MsgType::LoadCollection | MsgType::LoadPartitions)
                {
                    if let Some(collection_id) = task.collection_id() {
                        if self.load_fully_served(task) {
                            self.env
                                .meta
                                .update_load_percentage(collection_id, 100)
                                .await?;
                        }
                    }
                }
                Ok(())
            }
            MsgType::ReleaseCollection => {
                let Some(collection_id) = task.collection_id() else {
                    return Ok(());
                };
                self.env
                    .meta
                    .remove_global_sealed_seg_infos(collection_id, &[])
                    .await?;
                self.env.meta.release_collection(collection_id).await?;
                Ok(())
            }
            MsgType::ReleasePartitions => {
                let Some(collection_id) = task.collection_id() else {
                    return Ok(());
                };
                if !self.env.meta.has_collection(collection_id) {
                    return Ok(());
                }
                let partition_ids = task.partition_ids();
                self.env
                    .meta
                    .remove_global_sealed_seg_infos(collection_id, &partition_ids)
                    .await?;
                self.env
                    .meta
                    .release_partitions(collection_id, &partition_ids)
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The completion predicate: every load destination must also hold the
    /// collection's delta and query channels, and every dm-channel
    /// destination its query channel, before the load counts as 100%.
    fn load_fully_served(&self, task: &Arc<dyn QueryCoordTask>) -> bool {
        let Some(collection_id) = task.collection_id() else {
            return false;
        };
        let needs_delta = !self.env.meta.get_delta_channel_infos(collection_id).is_empty();
        for child in task.core().children() {
            if child.core().state() != TaskState::Done {
                continue;
            }
            let Some(node_id) = child.dst_node_id() else { continue };
            match child.msg_type() {
                MsgType::LoadSegments => {
                    if needs_delta
                        && !self.env.cluster.has_watched_delta_channel(node_id, collection_id)
                    {
                        return false;
                    }
                    if !self.env.cluster.has_watched_query_channel(node_id, collection_id) {
                        return false;
                    }
                }
                MsgType::WatchDmChannels => {
                    if !self.env.cluster.has_watched_query_channel(node_id, collection_id) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }

    async fn roll_back_trigger(&self, task: &Arc<dyn QueryCoordTask>) {
        let task_id = task.core().task_id();
        let compensating = task.clone().roll_back(&self.env).await;

        // Failed children leave the journal together with the write of
        // their compensating tasks.
        let failed: Vec<Arc<dyn QueryCoordTask>> = task
            .core()
            .children()
            .into_iter()
            .filter(|c| c.core().state() != TaskState::Done)
            .collect();
        let mut removals = Vec::with_capacity(failed.len() * 2);
        for child in &failed {
            let id = child.core().task_id();
            removals.push(paths::active_task_key(id));
            removals.push(paths::task_info_key(id));
        }
        let mut saves = Vec::with_capacity(compensating.len() * 2);
        for comp in &compensating {
            let id = comp.core().task_id();
            saves.push((paths::active_task_key(id), comp.marshal()));
            saves.push((paths::task_info_key(id), state_bytes(TaskState::Undo)));
        }
        if let Err(e) = self.env.kv.multi_save_and_remove(saves, removals).await {
            tracing::error!(task_id, "failed to journal rollback swap: {}", e);
        }
        for child in failed {
            task.core().remove_child_by_id(child.core().task_id());
        }
        for comp in &compensating {
            task.core().add_child(comp.clone());
        }

        if compensating.is_empty() {
            return;
        }
        tracing::info!(task_id, count = task.core().children().len(), "running rollback tasks");
        // Rollback failures are logged, not surfaced to the caller.
        if let Err(e) = self.process_group(task, compensating).await {
            tracing::error!(task_id, "rollback tasks failed: {}", e);
        }
    }

    async fn remove_internal_task_records(&self, task_id: TaskId) {
        if let Err(e) = self
            .env
            .kv
            .multi_remove(vec![
                paths::active_task_key(task_id),
                paths::task_info_key(task_id),
            ])
            .await
        {
            tracing::warn!(task_id, "failed to reap internal task records: {}", e);
        }
    }

    /// Reap every journal record of the trigger task and whatever children
    /// remain attached.
    async fn cleanup_trigger(&self, task: &Arc<dyn QueryCoordTask>) {
        let task_id = task.core().task_id();
        let mut removals = vec![
            paths::trigger_task_key(task_id),
            paths::task_info_key(task_id),
        ];
        for child in task.core().children() {
            let id = child.core().task_id();
            removals.push(paths::active_task_key(id));
            removals.push(paths::task_info_key(id));
        }
        if let Err(e) = self.env.kv.multi_remove(removals).await {
            tracing::warn!(task_id, "failed to reap trigger task records: {}", e);
        }
    }

    // ---------------- recovery ----------------

    /// Re-hydrate the journal: rebuild every persisted task, reattach the
    /// mid-flight Done trigger task to its children at the queue front,
    /// queue the rest by priority.
    pub async fn reload_from_kv(&self) -> Result<(), TaskError> {
        let mut states: HashMap<TaskId, TaskState> = HashMap::new();
        for (key, value) in self
            .env
            .kv
            .load_with_prefix(paths::TASK_INFO_PREFIX)
            .await?
        {
            let Some(task_id) = task_id_from_key(&key) else { continue };
            let Ok(text) = String::from_utf8(value) else { continue };
            match text.parse::<TaskState>() {
                Ok(state) => {
                    states.insert(task_id, state);
                }
                Err(_) => {
                    tracing::error!(key = %key, "dropping malformed task state");
                }
            }
        }

        let mut triggers: Vec<Arc<dyn QueryCoordTask>> = Vec::new();
        for (key, value) in self
            .env
            .kv
            .load_with_prefix(paths::TRIGGER_TASK_PREFIX)
            .await?
        {
            let Some(task_id) = task_id_from_key(&key) else { continue };
            let task = unmarshal_trigger_task(task_id, &value, self.env.retry_budget)?;
            let state = states.get(&task_id).copied().unwrap_or(TaskState::Undo);
            task.core().set_state(state);
            triggers.push(task);
        }

        let mut actives: Vec<Arc<dyn QueryCoordTask>> = Vec::new();
        for (key, value) in self
            .env
            .kv
            .load_with_prefix(paths::ACTIVE_TASK_PREFIX)
            .await?
        {
            let Some(task_id) = task_id_from_key(&key) else { continue };
            let task = unmarshal_internal_task(task_id, &value, self.env.retry_budget)?;
            let state = states.get(&task_id).copied().unwrap_or(TaskState::Undo);
            task.core().set_state(state);
            actives.push(task);
        }

        // Children are journaled atomically with the parent's Done marker
        // and only one trigger task executes at a time, so every surviving
        // active task belongs to the single Done trigger task.
        let resumed = triggers
            .iter()
            .find(|t| t.core().state() == TaskState::Done)
            .cloned();
        match (&resumed, actives.is_empty()) {
            (Some(parent), _) => {
                for child in actives {
                    child.core().set_parent(parent);
                    parent.core().add_child(child);
                }
            }
            (None, false) => {
                tracing::error!(
                    count = actives.len(),
                    "orphan active tasks in journal; reaping"
                );
                let mut removals = Vec::new();
                for task in actives {
                    let id = task.core().task_id();
                    removals.push(paths::active_task_key(id));
                    removals.push(paths::task_info_key(id));
                }
                self.env.kv.multi_remove(removals).await?;
            }
            _ => {}
        }

        for task in triggers {
            tracing::info!(
                task_id = task.core().task_id(),
                state = ?task.core().state(),
                "recovered trigger task"
            );
            if task.core().state() == TaskState::Done {
                self.queue.enqueue_front(task);
            } else {
                self.queue.enqueue(task);
            }
        }
        Ok(())
    }
}

/// Fold one successful child into the placement records the meta replica
/// should hold after this trigger task.
fn collect_child_effects(
    child: &dyn QueryCoordTask,
    seg_saves: &mut HashMap<CollectionId, Vec<SegmentInfo>>,
    dm_infos: &mut Vec<DmChannelWatchInfo>,
) {
    match child.msg_type() {
        MsgType::LoadSegments => {
            let Some(node_id) = child.dst_node_id() else { return };
            if let Ok(req) = LoadSegmentsRequest::decode(child.marshal().as_slice()) {
                for info in req.infos {
                    seg_saves.entry(info.collection_id).or_default().push(SegmentInfo {
                        segment_id: info.segment_id,
                        collection_id: info.collection_id,
                        partition_id: info.partition_id,
                        node_id,
                        mem_size: info.segment_size,
                        num_rows: info.num_of_rows,
                        segment_state: SegmentState::Sealed as i32,
                        compaction_from: info.compaction_from,
                    });
                }
            }
        }
        MsgType::WatchDmChannels => {
            let Some(node_id) = child.dst_node_id() else { return };
            if let Ok(req) = WatchDmChannelsRequest::decode(child.marshal().as_slice()) {
                for info in req.infos {
                    dm_infos.push(DmChannelWatchInfo {
                        collection_id: req.collection_id,
                        dm_channel: info.channel_name,
                        node_id_loaded: node_id,
                    });
                }
            }
        }
        _ => {}
    }
}

fn decode_msg_type(payload: &[u8]) -> Result<MsgType, TaskError> {
    let header = MsgHeader::decode(payload)
        .map_err(|e| TaskError::internal(format!("undecodable task payload: {}", e)))?;
    Ok(header.base.map(|b| b.msg_type()).unwrap_or(MsgType::Undefined))
}

fn unmarshal_trigger_task(
    task_id: TaskId,
    payload: &[u8],
    retry_budget: i32,
) -> Result<Arc<dyn QueryCoordTask>, TaskError> {
    use crate::task::trigger::*;
    let decode_err = |e: prost::DecodeError| TaskError::internal(e.to_string());
    let task: Arc<dyn QueryCoordTask> = match decode_msg_type(payload)? {
        MsgType::LoadCollection => LoadCollectionTask::new(
            task_id,
            retry_budget,
            LoadCollectionRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::LoadPartitions => LoadPartitionsTask::new(
            task_id,
            retry_budget,
            LoadPartitionsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::ReleaseCollection => ReleaseCollectionTask::new(
            task_id,
            ReleaseCollectionRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::ReleasePartitions => ReleasePartitionsTask::new(
            task_id,
            ReleasePartitionsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::HandoffSegments => HandoffTask::new(
            task_id,
            retry_budget,
            HandoffSegmentsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::LoadBalanceSegments => LoadBalanceTask::new(
            task_id,
            retry_budget,
            LoadBalanceRequest::decode(payload).map_err(decode_err)?,
        ),
        other => {
            return Err(TaskError::internal(format!(
                "unexpected trigger task type {:?} for task {}",
                other, task_id
            )))
        }
    };
    Ok(task)
}

fn unmarshal_internal_task(
    task_id: TaskId,
    payload: &[u8],
    retry_budget: i32,
) -> Result<Arc<dyn QueryCoordTask>, TaskError> {
    use crate::task::internal::*;
    let decode_err = |e: prost::DecodeError| TaskError::internal(e.to_string());
    let condition = TriggerCondition::GrpcRequest;
    let task: Arc<dyn QueryCoordTask> = match decode_msg_type(payload)? {
        MsgType::LoadSegments => LoadSegmentsTask::new(
            task_id,
            condition,
            retry_budget,
            LoadSegmentsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::WatchDmChannels => WatchDmChannelsTask::new(
            task_id,
            condition,
            retry_budget,
            WatchDmChannelsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::WatchDeltaChannels => WatchDeltaChannelsTask::new(
            task_id,
            condition,
            retry_budget,
            WatchDeltaChannelsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::WatchQueryChannels => WatchQueryChannelTask::new(
            task_id,
            condition,
            retry_budget,
            AddQueryChannelRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::ReleaseSegments => ReleaseSegmentsTask::new(
            task_id,
            condition,
            retry_budget,
            ReleaseSegmentsRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::ReleaseCollection => ReleaseCollectionOnNodeTask::new(
            task_id,
            condition,
            ReleaseCollectionRequest::decode(payload).map_err(decode_err)?,
        ),
        MsgType::ReleasePartitions => ReleasePartitionsOnNodeTask::new(
            task_id,
            condition,
            ReleasePartitionsRequest::decode(payload).map_err(decode_err)?,
        ),
        other => {
            return Err(TaskError::internal(format!(
                "unexpected internal task type {:?} for task {}",
                other, task_id
            )))
        }
    };
    Ok(task)
}
