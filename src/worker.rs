use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::processor::TaskDispatcher;
use crate::queue::{QueueError, TaskQueue};
use crate::task::{TaskId, WorkerId};

/// Result of one worker call, drives the delay before the next poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// A task was claimed and processed, poll again right away
    TaskProcessed,
    /// Queue was empty
    NoTask,
    /// Processing is paused on this node
    Disabled,
}

/// Node-wide switch to pause and resume task processing
#[derive(Debug, Default)]
pub struct WorkerController {
    paused: AtomicBool,
}

impl WorkerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        !self.paused.load(Ordering::SeqCst)
    }
}

/// One execution slot: claims a task, dispatches it, reports the outcome
pub struct Worker {
    ordinal: usize,
    id: WorkerId,
    queue: Arc<dyn TaskQueue>,
    dispatcher: TaskDispatcher,
    controller: Arc<WorkerController>,
    current: Mutex<Option<TaskId>>,
}

impl Worker {
    pub fn new(
        ordinal: usize,
        id: WorkerId,
        queue: Arc<dyn TaskQueue>,
        dispatcher: TaskDispatcher,
        controller: Arc<WorkerController>,
    ) -> Worker {
        Worker {
            ordinal,
            id,
            queue,
            dispatcher,
            controller,
            current: Mutex::new(None),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Task being processed right now, if any
    pub fn current_task(&self) -> Option<TaskId> {
        self.current.lock().clone()
    }

    /// Claims and fully processes at most one task.
    ///
    /// Only queue failures on claim come back as errors; anything going wrong
    /// with the task itself is reported through the queue.
    pub fn call(&self) -> Result<WorkerOutcome, QueueError> {
        if !self.controller.is_enabled() {
            return Ok(WorkerOutcome::Disabled);
        }

        let Some(task) = self.queue.claim_next(&self.id)? else {
            return Ok(WorkerOutcome::NoTask);
        };

        *self.current.lock() = Some(task.id.clone());
        log::debug!("Worker {} executing task {} ({})", self.ordinal, task.id, task.task_type);
        let start = Instant::now();

        let outcome = self.dispatcher.outcome(&task);

        let duration = start.elapsed();
        log::debug!("Worker {} finished task {} in {:?}", self.ordinal, task.id, duration);
        metrics::counter!("ce_tasks_processed_total", "status" => outcome.status().as_str())
            .increment(1);
        metrics::histogram!("ce_task_duration_seconds").record(duration.as_secs_f64());

        match self.queue.report_result(&task.id, &outcome) {
            Ok(()) => {}
            Err(QueueError::Canceled(id)) => {
                log::info!("Task {} was canceled while worker {} processed it", id, self.ordinal);
            }
            Err(e) => {
                log::warn!("Worker {} failed to report task {}: {}", self.ordinal, task.id, e);
            }
        }

        *self.current.lock() = None;
        Ok(WorkerOutcome::TaskProcessed)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("ordinal", &self.ordinal)
            .field("id", &self.id)
            .field("current", &self.current_task())
            .finish()
    }
}
