//! Processor running a pipeline of computation steps for analysis reports.
//!
//! The optional extension providers contribute extra task-scoped components;
//! with none installed the processor runs with its own components only.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{ExtensionProvider, TaskError, TaskProcessor};
use crate::container::{Component, ComponentDescriptor, ContainerError, TaskContainer};
use crate::task::{Task, TaskResult};

/// Task type of analysis report processing.
pub const REPORT: &str = "REPORT";

#[derive(thiserror::Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("{0}")]
    Failed(String),
}

/// One opaque unit of the processing pipeline.
pub trait ComputationStep: Send + Sync {
    fn description(&self) -> &str;

    fn execute(&self, container: &dyn TaskContainer) -> Result<(), StepError>;
}

/// Task-scoped slot the pipeline writes its result to.
#[derive(Debug, Default)]
pub struct TaskResultHolder {
    result: Mutex<Option<TaskResult>>,
}

impl TaskResultHolder {
    pub fn set(&self, result: TaskResult) {
        *self.result.lock() = Some(result);
    }

    pub fn take(&self) -> Option<TaskResult> {
        self.result.lock().take()
    }
}

impl Component for TaskResultHolder {}

pub struct ReportTaskProcessor {
    handled_types: Vec<String>,
    steps: Vec<Arc<dyn ComputationStep>>,
    providers: Vec<Arc<dyn ExtensionProvider>>,
}

impl ReportTaskProcessor {
    pub fn new() -> Self {
        Self::for_types(&[REPORT])
    }

    pub fn for_types(types: &[&str]) -> Self {
        Self {
            handled_types: types.iter().map(|t| t.to_string()).collect(),
            steps: Vec::new(),
            providers: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: Arc<dyn ComputationStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ExtensionProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

impl Default for ReportTaskProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskProcessor for ReportTaskProcessor {
    fn handled_types(&self) -> &[String] {
        &self.handled_types
    }

    fn components(&self, task: &Task) -> Vec<ComponentDescriptor> {
        let mut components = vec![ComponentDescriptor::eager(TaskResultHolder::default())];
        for provider in &self.providers {
            let provided = provider.components(task);
            log::trace!(
                "Task {}: {} component(s) from extension {}",
                task.id,
                provided.len(),
                provider.name()
            );
            components.extend(provided);
        }
        components
    }

    fn process(&self, container: &dyn TaskContainer) -> Result<Option<TaskResult>, TaskError> {
        let task_id = &container.task().id;
        for step in &self.steps {
            let start = Instant::now();
            step.execute(container).map_err(|e| TaskError::Step {
                step: step.description().to_string(),
                message: e.to_string(),
            })?;
            log::debug!(
                "Task {}: step '{}' finished in {:?}",
                task_id,
                step.description(),
                start.elapsed()
            );
        }
        Ok(container.get::<TaskResultHolder>()?.take())
    }
}
