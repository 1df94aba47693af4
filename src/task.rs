//! 任务数据模型
//!
//! Task 由外部队列持有，这里只定义计算引擎读写所需的字段。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务标识类型
pub type TaskId = String;

/// 工作槽标识
///
/// 节点启动时为每个工作槽生成一次，进程生命周期内不变。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// 生成新的随机标识
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
        }
    }

    /// 终态任务不会再被认领
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 队列中的一个分析任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub submitted_at: DateTime<Utc>,
    pub claimed_by: Option<WorkerId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// 被认领的次数，重置为 PENDING 时保持不变
    pub execution_count: u32,
}

impl Task {
    /// 创建一个新的待处理任务
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            submitted_at: Utc::now(),
            claimed_by: None,
            claimed_at: None,
            status: TaskStatus::Pending,
            execution_count: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// 构造一个已被认领的任务(测试和恢复场景使用)
    pub fn claimed(mut self, worker: WorkerId, claimed_at: DateTime<Utc>) -> Self {
        self.claimed_by = Some(worker);
        self.claimed_at = Some(claimed_at);
        self.status = TaskStatus::InProgress;
        self.execution_count = self.execution_count.max(1);
        self
    }
}

/// 处理器产出的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// 分析产物标识，例如生成的分析快照
    pub analysis_id: Option<String>,
    pub payload: serde_json::Value,
}

impl TaskResult {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            analysis_id: None,
            payload,
        }
    }

    pub fn with_analysis_id(mut self, analysis_id: impl Into<String>) -> Self {
        self.analysis_id = Some(analysis_id.into());
        self
    }
}

/// 失败任务携带的错误载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_type: String,
    pub message: String,
}

/// 一次处理的最终结局，上报给队列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success(Option<TaskResult>),
    Failed(ErrorPayload),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Success(_) => TaskStatus::Success,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            TaskOutcome::Success(result) => result.as_ref(),
            TaskOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            TaskOutcome::Success(_) => None,
            TaskOutcome::Failed(error) => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(TaskStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn only_success_failed_and_canceled_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn generated_worker_ids_are_unique() {
        assert_ne!(WorkerId::generate(), WorkerId::generate());
    }
}
