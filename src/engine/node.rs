//! 计算引擎节点

use std::collections::HashSet;
use std::sync::Arc;

use super::WorkerPool;
use crate::cleaning::CleaningScheduler;
use crate::cluster::ClusterCoordinator;
use crate::config::EngineConfig;
use crate::container::{ComponentScope, ScopedContainerFactory};
use crate::processor::{ProcessorRegistry, TaskDispatcher};
use crate::queue::TaskQueue;
use crate::task::WorkerId;

/// 一个计算引擎节点：工作池加清理调度器
pub struct ComputeEngine {
    config: EngineConfig,
    coordinator: Arc<dyn ClusterCoordinator>,
    pool: WorkerPool,
    cleaning: Arc<CleaningScheduler>,
}

impl ComputeEngine {
    /// 启动节点
    ///
    /// 为每个工作槽生成标识并登记到集群，然后启动工作池和清理定时器。
    pub fn start(
        config: EngineConfig,
        queue: Arc<dyn TaskQueue>,
        coordinator: Arc<dyn ClusterCoordinator>,
        registry: ProcessorRegistry,
        node_scope: ComponentScope,
    ) -> crate::Result<Self> {
        tokio::runtime::Handle::try_current().map_err(|_| crate::EngineError::NoRuntime)?;
        if registry.is_empty() {
            log::warn!("No task processor registered, every task will fail");
        }

        let worker_ids: Vec<WorkerId> = (0..config.worker_count())
            .map(|_| WorkerId::generate())
            .collect();
        coordinator.set_worker_uuids(worker_ids.iter().cloned().collect::<HashSet<_>>())?;
        coordinator.mark_operational(coordinator.node_id());

        let factory = Arc::new(ScopedContainerFactory::new(Arc::new(node_scope)));
        let dispatcher = TaskDispatcher::new(Arc::new(registry), factory);
        let pool = WorkerPool::new(&config, queue.clone(), dispatcher, worker_ids);
        let cleaning = Arc::new(CleaningScheduler::new(&config, queue, coordinator.clone()));

        pool.start()?;
        cleaning.start_scheduling()?;
        log::info!(
            "Compute engine {} started with {} worker(s)",
            coordinator.node_id(),
            config.worker_count()
        );

        Ok(Self {
            config,
            coordinator,
            pool,
            cleaning,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        self.coordinator.node_id()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.pool.worker_ids()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn cleaning(&self) -> &Arc<CleaningScheduler> {
        &self.cleaning
    }

    /// 关闭节点：停止清理定时器，等待处理中的任务，再从集群注销
    pub async fn shutdown(self) -> crate::Result<()> {
        self.cleaning.stop_scheduling();
        let stopped = self
            .pool
            .graceful_stop(self.config.graceful_stop_timeout())
            .await;
        if !stopped {
            log::warn!("Compute engine {} stopped before tasks completed", self.node_id());
        }
        self.coordinator.leave()?;
        log::info!("Compute engine {} stopped", self.node_id());
        Ok(())
    }
}

impl Drop for ComputeEngine {
    fn drop(&mut self) {
        self.cleaning.stop_scheduling();
    }
}
