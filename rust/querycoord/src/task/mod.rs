//! Trigger and internal tasks plus the scheduler that drives them.
//!
//! Every task kind implements [`QueryCoordTask`] over a shared [`TaskCore`]
//! that carries identity, lifecycle state, the retry counter, the parent
//! link, the owned child list, and the completion latch. Tasks are durable:
//! the scheduler journals each one before acting on it and a restarted
//! coordinator resumes them from the journal.

pub mod assign;
pub mod internal;
pub mod queue;
pub mod scheduler;
pub mod trigger;

use crate::cluster::{Cluster, PlacementError};
use crate::meta::{MetaError, MetaReplica};
use crate::node::NodeRpcError;
use parking_lot::Mutex;
use quiver_broker::{
    AllocError, Broker, BrokerCallError, GetRecoveryInfoError, IdAllocator,
    SegmentLoadInfoError, ShowPartitionsError,
};
use quiver_metakv::{MetaKv, MetaKvError};
use quiver_types::quiver_proto::{ErrorCode, MsgType, TriggerCondition};
use quiver_types::{NodeId, TaskId, TaskState, Timestamp};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Notify;

/// Terminal description of why a task failed, small enough to clone into
/// the parent's result and the caller's status reason.
#[derive(Clone, Debug, Error)]
#[error("{reason}")]
pub struct TaskError {
    pub code: ErrorCode,
    pub reason: String,
}

impl TaskError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        TaskError {
            code,
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        TaskError::new(ErrorCode::UnexpectedError, reason)
    }

    pub fn cancelled() -> Self {
        TaskError::new(ErrorCode::UnexpectedError, CANCELLED_REASON)
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason == CANCELLED_REASON
    }
}

const CANCELLED_REASON: &str = "task was cancelled";

impl From<PlacementError> for TaskError {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::NoAvailableNode => {
                TaskError::new(ErrorCode::NoAvailableNode, e.to_string())
            }
            PlacementError::InsufficientMemory(_) => {
                TaskError::new(ErrorCode::InsufficientMemory, e.to_string())
            }
        }
    }
}

impl From<NodeRpcError> for TaskError {
    fn from(e: NodeRpcError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<MetaError> for TaskError {
    fn from(e: MetaError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<MetaKvError> for TaskError {
    fn from(e: MetaKvError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<AllocError> for TaskError {
    fn from(e: AllocError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<ShowPartitionsError> for TaskError {
    fn from(e: ShowPartitionsError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<GetRecoveryInfoError> for TaskError {
    fn from(e: GetRecoveryInfoError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<SegmentLoadInfoError> for TaskError {
    fn from(e: SegmentLoadInfoError) -> Self {
        TaskError::internal(e.to_string())
    }
}

impl From<BrokerCallError> for TaskError {
    fn from(e: BrokerCallError) -> Self {
        TaskError::internal(e.to_string())
    }
}

/// The collaborators every task runs against.
#[derive(Clone)]
pub struct TaskEnv {
    pub broker: Broker,
    pub cluster: Arc<Cluster>,
    pub meta: Arc<MetaReplica>,
    pub kv: Arc<dyn MetaKv>,
    pub allocator: Arc<dyn IdAllocator>,
    pub retry_budget: i32,
}

impl Debug for TaskEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnv").finish()
    }
}

/// Shared base state embedded in every task kind. Tasks never take each
/// other's locks; the parent link is observing-only.
pub struct TaskCore {
    task_id: TaskId,
    trigger_condition: TriggerCondition,
    state: Mutex<TaskState>,
    retry_count: Mutex<i32>,
    result: Mutex<Option<Result<(), TaskError>>>,
    parent: Mutex<Weak<dyn QueryCoordTask>>,
    children: Mutex<Vec<Arc<dyn QueryCoordTask>>>,
    finished: AtomicBool,
    notify: Notify,
}

impl Debug for TaskCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCore")
            .field("task_id", &self.task_id)
            .field("trigger_condition", &self.trigger_condition)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl TaskCore {
    pub fn new(task_id: TaskId, trigger_condition: TriggerCondition, retry_budget: i32) -> Self {
        TaskCore {
            task_id,
            trigger_condition,
            state: Mutex::new(TaskState::Undo),
            retry_count: Mutex::new(retry_budget),
            result: Mutex::new(None),
            parent: Mutex::new(Weak::<trigger::LoadCollectionTask>::new()),
            children: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn trigger_condition(&self) -> TriggerCondition {
        self.trigger_condition
    }

    /// Scheduler priority; higher trigger conditions run first.
    pub fn priority(&self) -> i32 {
        self.trigger_condition as i32
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn retry_remaining(&self) -> i32 {
        *self.retry_count.lock()
    }

    pub fn decrease_retry(&self) {
        *self.retry_count.lock() -= 1;
    }

    pub fn result(&self) -> Option<Result<(), TaskError>> {
        self.result.lock().clone()
    }

    /// First error wins; later errors are appended to the reason.
    pub fn record_error(&self, error: TaskError) {
        let mut result = self.result.lock();
        match result.as_mut() {
            Some(Err(existing)) => {
                existing.reason = format!("{}; {}", existing.reason, error.reason);
            }
            _ => *result = Some(Err(error)),
        }
    }

    pub fn parent(&self) -> Option<Arc<dyn QueryCoordTask>> {
        self.parent.lock().upgrade()
    }

    pub fn set_parent(&self, parent: &Arc<dyn QueryCoordTask>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    pub fn children(&self) -> Vec<Arc<dyn QueryCoordTask>> {
        self.children.lock().clone()
    }

    pub fn add_child(&self, child: Arc<dyn QueryCoordTask>) {
        self.children.lock().push(child);
    }

    /// Drop all children; a re-executed trigger task rebuilds its fan-out
    /// from scratch.
    pub fn clear_children(&self) {
        self.children.lock().clear();
    }

    pub fn remove_child_by_id(&self, task_id: TaskId) {
        self.children
            .lock()
            .retain(|c| c.core().task_id() != task_id);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Resolve the completion latch. The first call records the result;
    /// repeats are no-ops so an early "accepted" notification and the
    /// terminal one do not fight.
    pub fn finish(&self, result: Result<(), TaskError>) {
        {
            let mut stored = self.result.lock();
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            if stored.is_none() || result.is_err() {
                *stored = Some(result);
            }
            self.finished.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
    }

    pub async fn wait_to_finish(&self) -> Result<(), TaskError> {
        loop {
            let notified = self.notify.notified();
            if self.is_finished() {
                return self.result().unwrap_or(Ok(()));
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
pub trait QueryCoordTask: Send + Sync + Debug {
    fn core(&self) -> &TaskCore;

    fn msg_type(&self) -> MsgType;

    /// Serialized request payload, as journaled under the task's KV key.
    fn marshal(&self) -> Vec<u8>;

    fn timestamp(&self) -> Timestamp;

    async fn pre_execute(&self, _env: &TaskEnv) -> Result<(), TaskError> {
        Ok(())
    }

    async fn execute(self: Arc<Self>, env: &TaskEnv) -> Result<(), TaskError>;

    async fn post_execute(&self, _env: &TaskEnv) -> Result<(), TaskError> {
        Ok(())
    }

    /// Compensating tasks to run when a child failed terminally. Rollback
    /// tasks themselves never roll back.
    async fn roll_back(self: Arc<Self>, _env: &TaskEnv) -> Vec<Arc<dyn QueryCoordTask>> {
        Vec::new()
    }

    /// Replacement tasks after the retry budget is exhausted or the
    /// destination vanished. Only leaf internal tasks support this.
    async fn reschedule(
        &self,
        _env: &TaskEnv,
    ) -> Result<Vec<Arc<dyn QueryCoordTask>>, TaskError> {
        Err(TaskError::internal("task kind cannot be rescheduled"))
    }

    /// An internal task whose destination left the cluster is invalid and
    /// must be rescheduled (or, for release-style tasks, counted done).
    fn is_valid(&self, _env: &TaskEnv) -> bool {
        true
    }

    /// Destination node for tasks bound to one.
    fn dst_node_id(&self) -> Option<NodeId> {
        None
    }

    /// Collection the task operates on, when it is scoped to one.
    fn collection_id(&self) -> Option<quiver_types::CollectionId> {
        None
    }

    /// Partitions the task operates on; empty means "not partition-scoped".
    fn partition_ids(&self) -> Vec<quiver_types::PartitionId> {
        Vec::new()
    }

    /// Release-style tasks return false: re-doing a release is safe and
    /// the alternative is a permanently stuck release.
    fn honors_retry_budget(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_is_idempotent_and_first_error_wins() {
        let core = TaskCore::new(1, TriggerCondition::GrpcRequest, 5);
        core.record_error(TaskError::internal("first"));
        core.record_error(TaskError::internal("second"));
        let err = core.result().unwrap().unwrap_err();
        assert!(err.reason.starts_with("first"));
        assert!(err.reason.contains("second"));

        core.finish(core.result().unwrap());
        core.finish(Ok(()));
        assert!(core.wait_to_finish().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_to_finish_wakes_waiters() {
        let core = Arc::new(TaskCore::new(1, TriggerCondition::GrpcRequest, 5));
        let waiter = {
            let core = core.clone();
            tokio::spawn(async move { core.wait_to_finish().await })
        };
        tokio::task::yield_now().await;
        core.finish(Ok(()));
        assert!(waiter.await.unwrap().is_ok());
    }

    #[test]
    fn test_priority_orders_trigger_conditions() {
        assert!(TriggerCondition::NodeDown as i32 > TriggerCondition::LoadBalance as i32);
        assert!(TriggerCondition::LoadBalance as i32 > TriggerCondition::Handoff as i32);
        assert!(TriggerCondition::Handoff as i32 > TriggerCondition::GrpcRequest as i32);
    }
}
