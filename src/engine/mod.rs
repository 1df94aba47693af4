//! 任务执行引擎核心组件
//!
//! 每个工作槽对应一个独立的 tokio 任务，任务处理本身放到阻塞线程池执行，
//! 因此各工作槽之间是真正并行的。

mod node;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};

use crate::config::EngineConfig;
use crate::processor::TaskDispatcher;
use crate::queue::TaskQueue;
use crate::task::{TaskId, WorkerId};
use crate::worker::{Worker, WorkerController, WorkerOutcome};

pub use node::ComputeEngine;

/// 工作池：N 个并发执行槽
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    controller: Arc<WorkerController>,
    polling_delay: Duration,
    disabled_delay: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// 创建工作池，每个工作槽使用 worker_ids 中的一个标识
    pub fn new(
        config: &EngineConfig,
        queue: Arc<dyn TaskQueue>,
        dispatcher: TaskDispatcher,
        worker_ids: Vec<WorkerId>,
    ) -> Self {
        let controller = Arc::new(WorkerController::new());
        let workers = worker_ids
            .into_iter()
            .enumerate()
            .map(|(ordinal, id)| {
                Arc::new(Worker::new(
                    ordinal,
                    id,
                    queue.clone(),
                    dispatcher.clone(),
                    controller.clone(),
                ))
            })
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            workers,
            controller,
            polling_delay: config.queue_polling_delay(),
            disabled_delay: config.disabled_polling_delay(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 启动所有工作槽，须在 tokio 运行时内调用
    pub fn start(&self) -> crate::Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| crate::EngineError::NoRuntime)?;
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            log::warn!("Worker pool already started");
            return Ok(());
        }

        for worker in &self.workers {
            handles.push(runtime.spawn(run_slot(
                worker.clone(),
                self.shutdown_tx.subscribe(),
                self.polling_delay,
                self.disabled_delay,
            )));
        }
        log::info!("Worker pool started with {} worker(s)", self.workers.len());
        Ok(())
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id().clone()).collect()
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// 当前正在处理的任务
    pub fn in_progress(&self) -> Vec<TaskId> {
        self.workers.iter().filter_map(|w| w.current_task()).collect()
    }

    pub fn controller(&self) -> Arc<WorkerController> {
        self.controller.clone()
    }

    pub fn pause(&self) {
        log::info!("Pausing task processing");
        self.controller.pause();
    }

    pub fn resume(&self) {
        log::info!("Resuming task processing");
        self.controller.resume();
    }

    /// 优雅关闭：不再认领新任务，等待处理中的任务完成
    ///
    /// 超时后剩余工作槽被中止，返回 false。
    pub async fn graceful_stop(&self, stop_timeout: Duration) -> bool {
        // 通知所有worker停止
        self.shutdown_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match timeout(stop_timeout, join_all(handles)).await {
            Ok(_) => {
                log::info!("Worker pool stopped");
                true
            }
            Err(_) => {
                log::warn!(
                    "Worker pool did not stop within {:?}, aborting {} task(s) in progress",
                    stop_timeout,
                    self.in_progress().len()
                );
                aborts.iter().for_each(|a| a.abort());
                false
            }
        }
    }

    /// 立即停止，不等待处理中的任务
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 单个工作槽的轮询循环
async fn run_slot(
    worker: Arc<Worker>,
    mut shutdown: watch::Receiver<bool>,
    polling_delay: Duration,
    disabled_delay: Duration,
) {
    log::debug!("Worker {} started", worker.ordinal());
    loop {
        if *shutdown.borrow() {
            break;
        }

        let call = worker.clone();
        let delay = match tokio::task::spawn_blocking(move || call.call()).await {
            Ok(Ok(WorkerOutcome::TaskProcessed)) => None,
            Ok(Ok(WorkerOutcome::NoTask)) => Some(polling_delay),
            Ok(Ok(WorkerOutcome::Disabled)) => Some(disabled_delay),
            Ok(Err(e)) => {
                log::warn!("Worker {} failed to poll queue: {}", worker.ordinal(), e);
                Some(polling_delay)
            }
            Err(e) => {
                log::error!("Worker {} crashed while processing: {}", worker.ordinal(), e);
                None
            }
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    log::debug!("Worker {} received shutdown signal", worker.ordinal());
}
