use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::{ProcessorRegistry, TaskError};
use crate::container::{ContainerFactory, ContainerGuard};
use crate::panic_message;
use crate::task::{Task, TaskOutcome, TaskResult};

/// Routes a task to its processor and runs it in a fresh container.
#[derive(Clone)]
pub struct TaskDispatcher {
    registry: Arc<ProcessorRegistry>,
    factory: Arc<dyn ContainerFactory>,
}

impl TaskDispatcher {
    pub fn new(registry: Arc<ProcessorRegistry>, factory: Arc<dyn ContainerFactory>) -> Self {
        Self { registry, factory }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Processes one task. Errors and panics end up in the returned error,
    /// the container is closed on every path.
    pub fn process(&self, task: &Task) -> Result<Option<TaskResult>, TaskError> {
        let processor = self
            .registry
            .get(&task.task_type)
            .ok_or_else(|| TaskError::UnsupportedType(task.task_type.clone()))?;

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let container = ContainerGuard::new(self.factory.create(task, processor.components(task)));
            container.bootup()?;
            processor.process(&*container)
        }))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));

        log::debug!(
            "Task {} ({}) processed in {:?}: {}",
            task.id,
            task.task_type,
            start.elapsed(),
            if result.is_ok() { "success" } else { "failure" }
        );
        result
    }

    /// Same as [`process`](Self::process), folded into the outcome reported to the queue.
    pub fn outcome(&self, task: &Task) -> TaskOutcome {
        match self.process(task) {
            Ok(result) => TaskOutcome::Success(result),
            Err(e) => {
                log::warn!("Task {} ({}) failed: {}", task.id, task.task_type, e);
                TaskOutcome::Failed(e.to_payload())
            }
        }
    }
}
