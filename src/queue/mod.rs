//! 外部任务队列接口
//!
//! 队列的持久化格式不属于计算引擎；这里只声明引擎消费的操作，
//! 并附带一个进程内实现供单机模式和测试使用。

pub mod memory;

use std::collections::HashSet;
use std::time::Duration;

use crate::task::{Task, TaskId, TaskOutcome, WorkerId};

pub use memory::InMemoryTaskQueue;

/// 队列操作错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("任务 {0} 不存在")]
    NotFound(TaskId),

    #[error("任务 {0} 已被取消")]
    Canceled(TaskId),

    #[error("任务 {0} 不在处理中")]
    NotInProgress(TaskId),

    #[error("任务 {0} 不是待处理状态")]
    NotPending(TaskId),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("队列存储错误: {0}")]
    Storage(String),
}

/// 计算引擎消费的任务队列
pub trait TaskQueue: Send + Sync {
    /// 以指定工作槽身份原子认领下一个待处理任务
    fn claim_next(&self, worker_id: &WorkerId) -> Result<Option<Task>, QueueError>;

    /// 上报任务终态
    ///
    /// 任务在处理期间被取消时返回 [`QueueError::Canceled`]。
    fn report_result(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<(), QueueError>;

    /// 将认领者不在存活集合中的处理中任务重置为待处理，返回重置数量
    fn reset_tasks_with_unknown_worker_uuids(
        &self,
        live_workers: &HashSet<WorkerId>,
    ) -> Result<usize, QueueError>;

    /// 取消处理时长超过 `max_age` 的任务，返回取消数量
    fn cancel_worn_outs(&self, max_age: Duration) -> Result<usize, QueueError>;
}
