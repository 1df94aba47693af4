//! Per-task component containers.
//!
//! Every task runs inside a fresh [`TaskContainer`] holding the components
//! registered by its processor and by extension providers. The container
//! inherits the node-wide [`ComponentScope`] by reference: task components can
//! reach node singletons, the node scope never sees task components.

pub mod scoped;

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::task::Task;

pub use scoped::{ContainerGuard, ScopedContainerFactory, ScopedTaskContainer};

/// When a component is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    /// Started by `bootup()`, in registration order.
    Eager,
    /// Started on first lookup after `bootup()`.
    Lazy,
}

/// Error raised by a component's `start` or `stop`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ComponentError(String);

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("component {component} failed to start: {source}")]
    StartFailed {
        component: &'static str,
        #[source]
        source: ComponentError,
    },

    #[error("container has not been booted")]
    NotBooted,

    #[error("container was already booted")]
    AlreadyBooted,

    #[error("container is closed")]
    Closed,

    #[error("no component of type {0} in task or node scope")]
    Missing(&'static str),
}

/// Something with a start/stop lifecycle living in a task container.
pub trait Component: Any + Send + Sync {
    fn start(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// A component plus its start policy, resolved at registration time.
pub struct ComponentDescriptor {
    name: &'static str,
    type_id: TypeId,
    component: Arc<dyn Component>,
    instance: Arc<dyn Any + Send + Sync>,
    policy: StartPolicy,
}

impl ComponentDescriptor {
    pub fn eager<T: Component>(component: T) -> Self {
        Self::shared(Arc::new(component), StartPolicy::Eager)
    }

    pub fn lazy<T: Component>(component: T) -> Self {
        Self::shared(Arc::new(component), StartPolicy::Lazy)
    }

    /// Registers an already shared instance, e.g. one a caller keeps a handle on.
    pub fn shared<T: Component>(component: Arc<T>, policy: StartPolicy) -> Self {
        Self {
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            component: component.clone(),
            instance: component,
            policy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> StartPolicy {
        self.policy
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    pub(crate) fn instance(&self) -> Arc<dyn Any + Send + Sync> {
        self.instance.clone()
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Node-wide singletons shared by every task container of the node.
#[derive(Default)]
pub struct ComponentScope {
    entries: Vec<(TypeId, &'static str, Arc<dyn Any + Send + Sync>)>,
}

impl ComponentScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.register(Arc::new(value));
        self
    }

    pub fn register<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.entries.retain(|(id, _, _)| *id != TypeId::of::<T>());
        self.entries.push((TypeId::of::<T>(), type_name::<T>(), value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .iter()
            .find(|(id, _, _)| *id == TypeId::of::<T>())
            .and_then(|(_, _, value)| value.clone().downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ComponentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(_, name, _)| name))
            .finish()
    }
}

/// Disposable component scope bound to exactly one task.
///
/// Lifecycle is `create -> bootup() -> use -> close()`; `close()` must be
/// called exactly once whatever happened before, see [`ContainerGuard`].
pub trait TaskContainer: Send + Sync {
    fn task(&self) -> &Task;

    /// Node-wide scope this container inherits from.
    fn parent(&self) -> &ComponentScope;

    /// Starts eager components in registration order.
    fn bootup(&self) -> Result<(), ContainerError>;

    /// Stops started components in reverse start order. Never fails.
    fn close(&self);

    /// Task-scoped lookup by type, starting a lazy component on first use.
    /// `Ok(None)` means the type is not registered in this container.
    fn resolve(&self, type_id: TypeId) -> Result<Option<Arc<dyn Any + Send + Sync>>, ContainerError>;
}

impl dyn TaskContainer + '_ {
    /// Looks up a component in the task scope, then in the node scope.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ContainerError> {
        match self.resolve(TypeId::of::<T>())? {
            Some(instance) => instance
                .downcast::<T>()
                .map_err(|_| ContainerError::Missing(type_name::<T>())),
            None => self
                .parent()
                .get::<T>()
                .ok_or(ContainerError::Missing(type_name::<T>())),
        }
    }
}

/// Builds the container a task is processed in.
pub trait ContainerFactory: Send + Sync {
    fn create(&self, task: &Task, components: Vec<ComponentDescriptor>) -> Box<dyn TaskContainer>;
}
