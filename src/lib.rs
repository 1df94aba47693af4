//! 计算引擎任务处理核心库入口
//!
//! 工作池从外部队列认领任务，交由处理器在独立的任务容器中执行；
//! 清理调度器在集群锁保护下周期性回收孤儿任务并取消超时任务。

pub mod cleaning;
pub mod cluster;
pub mod config;
pub mod container;
pub mod engine;
pub mod processor;
pub mod queue;
pub mod task;
pub mod worker;

use std::any::Any;

use crate::cluster::CoordinatorError;
use crate::config::ConfigError;
use crate::processor::RegistryError;

/// 节点启动/关闭阶段的致命错误
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("处理器注册失败: {0}")]
    Registry(#[from] RegistryError),

    #[error("集群协调失败: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("必须在 tokio 运行时内启动")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// 提取 panic 载荷中的文本
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// 公开导出模块的公共接口
pub use cleaning::{CleaningOutcome, CleaningScheduler};
pub use cluster::{ClusterCoordinator, ClusterLock, LocalCoordinator};
pub use config::EngineConfig;
pub use container::{
    Component, ComponentDescriptor, ComponentScope, ContainerFactory, ScopedContainerFactory,
    StartPolicy, TaskContainer,
};
pub use engine::{ComputeEngine, WorkerPool};
pub use processor::{
    ProcessorRegistry, ReportTaskProcessor, TaskDispatcher, TaskError, TaskProcessor,
};
pub use queue::{InMemoryTaskQueue, QueueError, TaskQueue};
pub use task::{Task, TaskId, TaskOutcome, TaskResult, TaskStatus, WorkerId};
pub use worker::{Worker, WorkerController, WorkerOutcome};
