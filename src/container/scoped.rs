use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    ComponentDescriptor, ComponentScope, ContainerError, ContainerFactory, StartPolicy,
    TaskContainer,
};
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Booted,
    BootFailed,
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    state: State,
    /// Indexes into `components`, in start order.
    started: Vec<usize>,
}

/// The task container implementation.
pub struct ScopedTaskContainer {
    task: Task,
    parent: Arc<ComponentScope>,
    components: Vec<ComponentDescriptor>,
    lifecycle: Mutex<Lifecycle>,
}

impl ScopedTaskContainer {
    pub fn new(task: Task, parent: Arc<ComponentScope>, components: Vec<ComponentDescriptor>) -> Self {
        Self {
            task,
            parent,
            components,
            lifecycle: Mutex::new(Lifecycle {
                state: State::Created,
                started: Vec::new(),
            }),
        }
    }

    /// Names of the started components, in start order.
    pub fn started_components(&self) -> Vec<&'static str> {
        self.lifecycle
            .lock()
            .started
            .iter()
            .map(|&idx| self.components[idx].name())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().state == State::Closed
    }

    fn start_component(&self, idx: usize, lifecycle: &mut Lifecycle) -> Result<(), ContainerError> {
        let descriptor = &self.components[idx];
        log::trace!("Task {}: starting {}", self.task.id, descriptor.name());
        descriptor
            .component()
            .start()
            .map_err(|source| ContainerError::StartFailed {
                component: descriptor.name(),
                source,
            })?;
        lifecycle.started.push(idx);
        Ok(())
    }
}

impl TaskContainer for ScopedTaskContainer {
    fn task(&self) -> &Task {
        &self.task
    }

    fn parent(&self) -> &ComponentScope {
        &self.parent
    }

    fn bootup(&self) -> Result<(), ContainerError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            State::Created => {}
            State::Closed => return Err(ContainerError::Closed),
            State::Booted | State::BootFailed => return Err(ContainerError::AlreadyBooted),
        }

        for idx in 0..self.components.len() {
            if self.components[idx].policy() != StartPolicy::Eager {
                continue;
            }
            if let Err(e) = self.start_component(idx, &mut lifecycle) {
                lifecycle.state = State::BootFailed;
                return Err(e);
            }
        }

        lifecycle.state = State::Booted;
        log::debug!(
            "Task {}: container booted with {} component(s)",
            self.task.id,
            self.components.len()
        );
        Ok(())
    }

    fn close(&self) {
        let started = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == State::Closed {
                log::debug!("Task {}: container already closed", self.task.id);
                return;
            }
            lifecycle.state = State::Closed;
            std::mem::take(&mut lifecycle.started)
        };

        for &idx in started.iter().rev() {
            let descriptor = &self.components[idx];
            let component = descriptor.component();
            match panic::catch_unwind(AssertUnwindSafe(|| component.stop())) {
                Ok(Ok(())) => log::trace!("Task {}: stopped {}", self.task.id, descriptor.name()),
                Ok(Err(e)) => log::warn!(
                    "Task {}: failed to stop {}: {}",
                    self.task.id,
                    descriptor.name(),
                    e
                ),
                Err(_) => log::warn!(
                    "Task {}: {} panicked while stopping",
                    self.task.id,
                    descriptor.name()
                ),
            }
        }
    }

    fn resolve(&self, type_id: TypeId) -> Result<Option<Arc<dyn Any + Send + Sync>>, ContainerError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            State::Booted => {}
            State::Closed => return Err(ContainerError::Closed),
            State::Created | State::BootFailed => return Err(ContainerError::NotBooted),
        }

        let Some(idx) = self.components.iter().position(|c| c.type_id() == type_id) else {
            return Ok(None);
        };
        if !lifecycle.started.contains(&idx) {
            self.start_component(idx, &mut lifecycle)?;
        }
        Ok(Some(self.components[idx].instance()))
    }
}

impl fmt::Debug for ScopedTaskContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedTaskContainer")
            .field("task", &self.task.id)
            .field("components", &self.components)
            .field("lifecycle", &*self.lifecycle.lock())
            .finish()
    }
}

/// Builds [`ScopedTaskContainer`]s below a shared node scope.
#[derive(Debug, Clone, Default)]
pub struct ScopedContainerFactory {
    parent: Arc<ComponentScope>,
}

impl ScopedContainerFactory {
    pub fn new(parent: Arc<ComponentScope>) -> Self {
        Self { parent }
    }
}

impl ContainerFactory for ScopedContainerFactory {
    fn create(&self, task: &Task, components: Vec<ComponentDescriptor>) -> Box<dyn TaskContainer> {
        Box::new(ScopedTaskContainer::new(
            task.clone(),
            self.parent.clone(),
            components,
        ))
    }
}

/// Owns a container and closes it when dropped, on every exit path.
pub struct ContainerGuard {
    container: Box<dyn TaskContainer>,
}

impl ContainerGuard {
    pub fn new(container: Box<dyn TaskContainer>) -> Self {
        Self { container }
    }
}

impl Deref for ContainerGuard {
    type Target = dyn TaskContainer;

    fn deref(&self) -> &Self::Target {
        &*self.container
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        self.container.close();
    }
}
