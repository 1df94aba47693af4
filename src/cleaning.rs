//! 集群清理调度器
//!
//! 定时尝试获取集群清理锁：拿到锁则先把认领者已失联的任务退回队列，
//! 再取消处理超时的任务；拿不到锁说明其它节点正在清理，本轮直接跳过。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::cluster::{ClusterCoordinator, LockGuard};
use crate::config::EngineConfig;
use crate::panic_message;
use crate::queue::TaskQueue;

/// 一轮清理的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleaningOutcome {
    /// 未拿到锁，其它节点负责本轮
    Skipped,
    /// 拿到锁并执行了两项恢复动作；None 表示该动作失败
    Completed {
        reset: Option<usize>,
        canceled: Option<usize>,
    },
}

/// 周期性、互斥执行的清理任务
pub struct CleaningScheduler {
    queue: Arc<dyn TaskQueue>,
    coordinator: Arc<dyn ClusterCoordinator>,
    initial_delay: Duration,
    delay: Duration,
    worn_out_threshold: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleaningScheduler {
    pub fn new(
        config: &EngineConfig,
        queue: Arc<dyn TaskQueue>,
        coordinator: Arc<dyn ClusterCoordinator>,
    ) -> Self {
        Self {
            queue,
            coordinator,
            initial_delay: config.clean_tasks_initial_delay(),
            delay: config.clean_tasks_delay(),
            worn_out_threshold: config.worn_out_threshold(),
            handle: Mutex::new(None),
        }
    }

    /// 执行一轮清理
    pub fn run_cleaning_cycle(&self) -> CleaningOutcome {
        let lock = self.coordinator.acquire_clean_job_lock();
        let Some(_guard) = LockGuard::try_acquire(lock) else {
            log::trace!(
                "Cleaning lock held by another node, skipping cycle on {}",
                self.coordinator.node_id()
            );
            metrics::counter!("ce_cleaning_cycles_total", "result" => "skipped").increment(1);
            return CleaningOutcome::Skipped;
        };

        let reset = guarded("reset tasks with unknown worker UUIDs", || {
            let live_workers = self.coordinator.worker_uuids().map_err(|e| e.to_string())?;
            self.queue
                .reset_tasks_with_unknown_worker_uuids(&live_workers)
                .map_err(|e| e.to_string())
        });
        let canceled = guarded("cancel worn out tasks", || {
            self.queue
                .cancel_worn_outs(self.worn_out_threshold)
                .map_err(|e| e.to_string())
        });

        if reset.unwrap_or(0) > 0 || canceled.unwrap_or(0) > 0 {
            log::info!(
                "Cleaning cycle reset {} orphaned task(s) and canceled {} worn out task(s)",
                reset.unwrap_or(0),
                canceled.unwrap_or(0)
            );
        }
        metrics::counter!("ce_cleaning_cycles_total", "result" => "completed").increment(1);
        CleaningOutcome::Completed { reset, canceled }
    }

    /// 启动定时器：首次延迟 initial_delay，之后每隔 delay 执行一次
    pub fn start_scheduling(self: &Arc<Self>) -> crate::Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| crate::EngineError::NoRuntime)?;
        let mut handle = self.handle.lock();
        if handle.is_some() {
            log::warn!("Cleaning scheduler already started");
            return Ok(());
        }

        let scheduler = Arc::clone(self);
        *handle = Some(runtime.spawn(async move {
            time::sleep(scheduler.initial_delay).await;
            let mut interval = time::interval(scheduler.delay);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let cycle = Arc::clone(&scheduler);
                match tokio::task::spawn_blocking(move || cycle.run_cleaning_cycle()).await {
                    Ok(outcome) => log::debug!("Cleaning cycle finished: {:?}", outcome),
                    Err(e) => log::warn!("Cleaning cycle aborted: {}", e),
                }
            }
        }));
        log::info!(
            "Cleaning scheduled in {:?}, then every {:?}",
            self.initial_delay,
            self.delay
        );
        Ok(())
    }

    pub fn stop_scheduling(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.handle.lock().is_some()
    }
}

/// 执行单个恢复动作，失败或 panic 只记录告警
fn guarded(action: &str, f: impl FnOnce() -> Result<usize, String>) -> Option<usize> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(count)) => Some(count),
        Ok(Err(e)) => {
            log::warn!("Failed to {}: {}", action, e);
            None
        }
        Err(payload) => {
            log::warn!("Failed to {}: {}", action, panic_message(payload.as_ref()));
            None
        }
    }
}
