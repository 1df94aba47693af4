//! 进程内任务队列

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{QueueError, TaskQueue};
use crate::task::{ErrorPayload, Task, TaskId, TaskOutcome, TaskResult, TaskStatus, WorkerId};

/// 队列中一条任务记录
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task: Task,
    pub result: Option<TaskResult>,
    pub error: Option<ErrorPayload>,
    pub updated_at: DateTime<Utc>,
}

/// 基于内存的任务队列
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交新任务
    pub fn submit(&self, task_type: &str) -> Task {
        let task = Task::new(task_type);
        self.insert(task.clone());
        task
    }

    /// 原样写入任务，覆盖同 id 的记录
    pub fn insert(&self, task: Task) {
        let record = TaskRecord {
            task,
            result: None,
            error: None,
            updated_at: Utc::now(),
        };
        self.records.lock().insert(record.task.id.clone(), record);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records.lock().get(task_id).cloned()
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.records.lock().get(task_id).map(|r| r.task.status)
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.task.status == status)
            .count()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.records.lock().values().map(|r| r.task.clone()).collect();
        tasks.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// 取消一个待处理任务，处理中的任务不能这样取消
    pub fn cancel(&self, task_id: &str) -> Result<(), QueueError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;
        if record.task.status != TaskStatus::Pending {
            return Err(QueueError::NotPending(task_id.to_string()));
        }
        record.task.status = TaskStatus::Canceled;
        record.updated_at = Utc::now();
        Ok(())
    }

    fn reset_to_pending(record: &mut TaskRecord, now: DateTime<Utc>) {
        record.task.status = TaskStatus::Pending;
        record.task.claimed_by = None;
        record.updated_at = now;
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn claim_next(&self, worker_id: &WorkerId) -> Result<Option<Task>, QueueError> {
        let mut records = self.records.lock();
        let now = Utc::now();

        // 同一工作槽遗留的处理中任务先退回队列
        for record in records.values_mut() {
            if record.task.status == TaskStatus::InProgress
                && record.task.claimed_by.as_ref() == Some(worker_id)
            {
                log::debug!(
                    "Resetting task {} left in progress by worker {}",
                    record.task.id,
                    worker_id
                );
                Self::reset_to_pending(record, now);
            }
        }

        let next = records
            .values_mut()
            .filter(|r| r.task.status == TaskStatus::Pending)
            .min_by(|a, b| {
                a.task
                    .submitted_at
                    .cmp(&b.task.submitted_at)
                    .then_with(|| a.task.id.cmp(&b.task.id))
            });

        Ok(next.map(|record| {
            record.task.status = TaskStatus::InProgress;
            record.task.claimed_by = Some(worker_id.clone());
            record.task.claimed_at = Some(now);
            record.task.execution_count += 1;
            record.updated_at = now;
            record.task.clone()
        }))
    }

    fn report_result(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<(), QueueError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.clone()))?;

        match record.task.status {
            TaskStatus::InProgress => {}
            TaskStatus::Canceled => return Err(QueueError::Canceled(task_id.clone())),
            _ => return Err(QueueError::NotInProgress(task_id.clone())),
        }

        record.task.status = outcome.status();
        record.result = outcome.result().cloned();
        record.error = outcome.error().cloned();
        record.updated_at = Utc::now();
        Ok(())
    }

    fn reset_tasks_with_unknown_worker_uuids(
        &self,
        live_workers: &HashSet<WorkerId>,
    ) -> Result<usize, QueueError> {
        let mut records = self.records.lock();
        let now = Utc::now();
        let mut reset = 0;
        for record in records.values_mut() {
            let orphaned = record.task.status == TaskStatus::InProgress
                && record
                    .task
                    .claimed_by
                    .as_ref()
                    .map_or(true, |worker| !live_workers.contains(worker));
            if orphaned {
                Self::reset_to_pending(record, now);
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn cancel_worn_outs(&self, max_age: Duration) -> Result<usize, QueueError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| QueueError::InvalidArgument(format!("max age out of range: {}", e)))?;
        let now = Utc::now();
        let mut records = self.records.lock();
        let mut canceled = 0;
        for record in records.values_mut() {
            if record.task.status != TaskStatus::InProgress {
                continue;
            }
            let started = record.task.claimed_at.unwrap_or(record.task.submitted_at);
            if now - started > max_age {
                record.task.status = TaskStatus::Canceled;
                record.updated_at = now;
                canceled += 1;
            }
        }
        Ok(canceled)
    }
}
