//! 集群协调门面
//!
//! 计算引擎只消费外部协调服务发布的事实(存活工作槽、主节点等)，
//! 并使用其提供的集群级互斥锁。所有共享状态都通过注入的
//! [`ClusterCoordinator`] 访问，不存在全局可变状态。

pub mod local;
pub mod lock;

use std::collections::HashSet;
use std::sync::Arc;

use crate::task::WorkerId;

pub use local::{ClusterState, LocalCoordinator};
pub use lock::{ClusterLock, LeaseLock, LockGuard};

/// 共享状态中各槽位的固定键名
pub mod keys {
    pub const LEADER: &str = "LEADER";
    pub const OPERATIONAL_PROCESSES: &str = "OPERATIONAL_PROCESSES";
    pub const SONARQUBE_VERSION: &str = "SONARQUBE_VERSION";
    pub const CLIENT_UUIDS: &str = "CLIENT_UUIDS";
    pub const WORKER_UUIDS: &str = "WORKER_UUIDS";
    pub const CE_CLEANING_JOB_LOCK: &str = "CE_CLEANING_JOB_LOCK";
}

/// 协调服务错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("节点 {0} 未注册到集群")]
    UnknownNode(String),

    #[error("协调服务不可用: {0}")]
    Unavailable(String),
}

/// 集群协调服务接口
///
/// 每个共享状态键都有显式的读写操作。
pub trait ClusterCoordinator: Send + Sync {
    /// 当前节点在集群中的标识
    fn node_id(&self) -> &str;

    /// 获取清理任务使用的集群锁
    fn acquire_clean_job_lock(&self) -> Arc<dyn ClusterLock>;

    /// 集群内所有存活工作槽的标识
    fn worker_uuids(&self) -> Result<HashSet<WorkerId>, CoordinatorError>;

    /// 登记当前节点的工作槽标识，覆盖此前的登记
    fn set_worker_uuids(&self, workers: HashSet<WorkerId>) -> Result<(), CoordinatorError>;

    /// 节点下线时撤销其登记
    fn leave(&self) -> Result<(), CoordinatorError>;

    fn leader_id(&self) -> Option<String>;

    fn set_leader_id(&self, node_id: &str);

    fn operational_processes(&self) -> HashSet<String>;

    fn mark_operational(&self, process: &str);

    fn cluster_version(&self) -> Option<String>;

    fn set_cluster_version(&self, version: &str);

    fn client_uuids(&self) -> HashSet<String>;
}
