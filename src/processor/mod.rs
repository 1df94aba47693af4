//! Task processors and their registry.
//!
//! Processors are wired once at startup. Each declares the task types it
//! handles; two processors claiming the same type is a startup error.

pub mod dispatch;
pub mod report;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::container::{ComponentDescriptor, ContainerError, TaskContainer};
use crate::task::{ErrorPayload, Task, TaskResult};

pub use dispatch::TaskDispatcher;
pub use report::{ComputationStep, ReportTaskProcessor, StepError, TaskResultHolder, REPORT};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task type '{0}' is handled by more than one processor")]
    DuplicateTaskType(String),

    #[error("processor declares no task type")]
    NoTaskType,
}

/// Failure of a single task. Never fatal for the worker processing it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("unsupported task type '{0}': no processor is registered for it")]
    UnsupportedType(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("task processing panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn error_type(&self) -> &'static str {
        match self {
            TaskError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            TaskError::Container(_) => "CONTAINER",
            TaskError::Step { .. } => "STEP",
            TaskError::Panicked(_) => "PANIC",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error_type: self.error_type().to_string(),
            message: self.to_string(),
        }
    }
}

/// Handler bound to one or more task types.
pub trait TaskProcessor: Send + Sync {
    fn handled_types(&self) -> &[String];

    /// Components the task container is built with, in registration order.
    fn components(&self, _task: &Task) -> Vec<ComponentDescriptor> {
        Vec::new()
    }

    /// Runs the task inside a booted container.
    fn process(&self, container: &dyn TaskContainer) -> Result<Option<TaskResult>, TaskError>;
}

/// Pluggable source of extra task-scoped components.
pub trait ExtensionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn components(&self, task: &Task) -> Vec<ComponentDescriptor>;
}

/// Immutable task type -> processor mapping.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    by_type: HashMap<String, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskProcessor>> {
        self.by_type.get(task_type).cloned()
    }

    /// Registered task types, sorted.
    pub fn handled_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_type.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("handled_types", &self.handled_types())
            .finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    processors: Vec<Arc<dyn TaskProcessor>>,
}

impl RegistryBuilder {
    pub fn register(mut self, processor: Arc<dyn TaskProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn build(self) -> Result<ProcessorRegistry, RegistryError> {
        let mut by_type = HashMap::new();
        for processor in self.processors {
            let types = processor.handled_types();
            if types.is_empty() {
                return Err(RegistryError::NoTaskType);
            }
            for task_type in types {
                if by_type.insert(task_type.clone(), processor.clone()).is_some() {
                    return Err(RegistryError::DuplicateTaskType(task_type.clone()));
                }
            }
        }
        Ok(ProcessorRegistry { by_type })
    }
}
