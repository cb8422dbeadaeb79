//! Priority FIFO of trigger tasks. One queue per trigger condition;
//! higher-priority conditions drain first, equal priorities in enqueue
//! order. `NodeDown` work therefore overtakes queued client requests but
//! never preempts a task already executing.

use crate::task::QueryCoordTask;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

const PRIORITY_LEVELS: usize = 4;

#[derive(Default)]
pub struct TriggerTaskQueue {
    // Index = priority; popped from the highest non-empty level.
    levels: Mutex<[VecDeque<Arc<dyn QueryCoordTask>>; PRIORITY_LEVELS]>,
    notify: Notify,
}

impl TriggerTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.levels.lock().iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enqueue(&self, task: Arc<dyn QueryCoordTask>) {
        let priority = (task.core().priority() as usize).min(PRIORITY_LEVELS - 1);
        self.levels.lock()[priority].push_back(task);
        self.notify.notify_one();
    }

    /// Used on recovery for a task that was mid-flight when the previous
    /// incarnation died; it resumes before anything else of its priority.
    pub fn enqueue_front(&self, task: Arc<dyn QueryCoordTask>) {
        let priority = (task.core().priority() as usize).min(PRIORITY_LEVELS - 1);
        self.levels.lock()[priority].push_front(task);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Arc<dyn QueryCoordTask>> {
        let mut levels = self.levels.lock();
        for level in levels.iter_mut().rev() {
            if let Some(task) = level.pop_front() {
                return Some(task);
            }
        }
        None
    }

    /// Waits until a task is available.
    pub async fn pop(&self) -> Arc<dyn QueryCoordTask> {
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_pop() {
                return task;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskCore, TaskEnv, TaskError};
    use quiver_types::quiver_proto::{MsgType, TriggerCondition};
    use quiver_types::Timestamp;

    #[derive(Debug)]
    struct StubTask {
        core: TaskCore,
    }

    impl StubTask {
        fn new(task_id: i64, condition: TriggerCondition) -> Arc<Self> {
            Arc::new(StubTask {
                core: TaskCore::new(task_id, condition, 5),
            })
        }
    }

    #[async_trait::async_trait]
    impl QueryCoordTask for StubTask {
        fn core(&self) -> &TaskCore {
            &self.core
        }

        fn msg_type(&self) -> MsgType {
            MsgType::Undefined
        }

        fn marshal(&self) -> Vec<u8> {
            Vec::new()
        }

        fn timestamp(&self) -> Timestamp {
            0
        }

        async fn execute(self: Arc<Self>, _env: &TaskEnv) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_higher_priority_pops_first_fifo_within_level() {
        let queue = TriggerTaskQueue::new();
        queue.enqueue(StubTask::new(1, TriggerCondition::GrpcRequest));
        queue.enqueue(StubTask::new(2, TriggerCondition::GrpcRequest));
        queue.enqueue(StubTask::new(3, TriggerCondition::NodeDown));
        queue.enqueue(StubTask::new(4, TriggerCondition::Handoff));

        let order: Vec<i64> = [
            queue.pop().await,
            queue.pop().await,
            queue.pop().await,
            queue.pop().await,
        ]
        .iter()
        .map(|t| t.core().task_id())
        .collect();
        assert_eq!(order, vec![3, 4, 1, 2]);
    }

    #[tokio::test]
    async fn test_enqueue_front_resumes_first() {
        let queue = TriggerTaskQueue::new();
        queue.enqueue(StubTask::new(1, TriggerCondition::GrpcRequest));
        queue.enqueue_front(StubTask::new(2, TriggerCondition::GrpcRequest));
        assert_eq!(queue.pop().await.core().task_id(), 2);
    }

    #[tokio::test]
    async fn test_pop_waits_for_enqueue() {
        let queue = Arc::new(TriggerTaskQueue::new());
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.core().task_id() })
        };
        tokio::task::yield_now().await;
        queue.enqueue(StubTask::new(7, TriggerCondition::GrpcRequest));
        assert_eq!(popper.await.unwrap(), 7);
    }
}
