
use std::sync::Arc;

use compute_engine::container::{ContainerError, ContainerGuard, ScopedTaskContainer};
use compute_engine::{
    ComponentDescriptor, ComponentScope, ContainerFactory, StartPolicy, Task, TaskContainer,
};
use test_utils::{init_logger, CountingFactory, EventLog, Recorder};

fn container(components: Vec<ComponentDescriptor>) -> ScopedTaskContainer {
    ScopedTaskContainer::new(Task::new("REPORT"), Arc::new(ComponentScope::new()), components)
}

/// 节点级单例
struct NodeSettings {
    project: &'static str,
}

#[test]
fn eager_components_start_in_registration_order() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![
        ComponentDescriptor::eager(Recorder::<1>::new(&log)),
        ComponentDescriptor::eager(Recorder::<2>::new(&log)),
        ComponentDescriptor::eager(Recorder::<3>::new(&log)),
    ]);

    container.bootup().unwrap();

    assert_eq!(log.events(), vec!["start 1", "start 2", "start 3"]);
    assert_eq!(container.started_components().len(), 3);
}

#[test]
fn lazy_component_starts_on_first_lookup_only() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![
        ComponentDescriptor::eager(Recorder::<1>::new(&log)),
        ComponentDescriptor::lazy(Recorder::<2>::new(&log)),
    ]);
    container.bootup().unwrap();
    assert_eq!(log.events(), vec!["start 1"]);

    let dyn_container: &dyn TaskContainer = &container;
    dyn_container.get::<Recorder<2>>().unwrap();
    dyn_container.get::<Recorder<2>>().unwrap();

    assert_eq!(log.events(), vec!["start 1", "start 2"]);
}

#[test]
fn close_stops_components_in_reverse_start_order() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![
        ComponentDescriptor::eager(Recorder::<1>::new(&log)),
        ComponentDescriptor::lazy(Recorder::<2>::new(&log)),
        ComponentDescriptor::eager(Recorder::<3>::new(&log)),
    ]);
    container.bootup().unwrap();
    (&container as &dyn TaskContainer).get::<Recorder<2>>().unwrap();

    container.close();

    assert_eq!(
        log.events(),
        vec!["start 1", "start 3", "start 2", "stop 2", "stop 3", "stop 1"]
    );
}

#[test]
fn unused_lazy_component_is_never_stopped() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![
        ComponentDescriptor::eager(Recorder::<1>::new(&log)),
        ComponentDescriptor::lazy(Recorder::<2>::new(&log)),
    ]);
    container.bootup().unwrap();
    container.close();

    assert_eq!(log.events(), vec!["start 1", "stop 1"]);
}

#[test]
fn failing_stop_does_not_prevent_other_stops() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![
        ComponentDescriptor::eager(Recorder::<1>::new(&log)),
        ComponentDescriptor::eager(Recorder::<2>::new(&log).failing_stop()),
        ComponentDescriptor::eager(Recorder::<3>::new(&log)),
    ]);
    container.bootup().unwrap();

    container.close();

    assert_eq!(
        log.events(),
        vec!["start 1", "start 2", "start 3", "stop 3", "stop 2", "stop 1"]
    );
    assert!(container.is_closed());
}

#[test]
fn failed_bootup_stops_only_what_was_started() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![
        ComponentDescriptor::eager(Recorder::<1>::new(&log)),
        ComponentDescriptor::eager(Recorder::<2>::new(&log).failing_start()),
        ComponentDescriptor::eager(Recorder::<3>::new(&log)),
    ]);

    let err = container.bootup().unwrap_err();
    assert!(matches!(err, ContainerError::StartFailed { .. }), "{:?}", err);
    assert!(err.to_string().contains("refused to start"));

    container.close();
    assert_eq!(log.events(), vec!["start 1", "start 2", "stop 1"]);
}

#[test]
fn closing_twice_is_a_no_op() {
    init_logger();
    let log = EventLog::default();
    let container = container(vec![ComponentDescriptor::eager(Recorder::<1>::new(&log))]);
    container.bootup().unwrap();

    container.close();
    container.close();

    assert_eq!(log.events(), vec!["start 1", "stop 1"]);
}

#[test]
fn node_scope_is_visible_from_task_container() {
    init_logger();
    let scope = ComponentScope::new().with(NodeSettings { project: "core" });
    let container = ScopedTaskContainer::new(Task::new("REPORT"), Arc::new(scope), vec![]);
    container.bootup().unwrap();

    let settings = (&container as &dyn TaskContainer).get::<NodeSettings>().unwrap();
    assert_eq!(settings.project, "core");
}

#[test]
fn task_components_are_not_visible_to_other_containers() {
    init_logger();
    let log = EventLog::default();
    let scope = Arc::new(ComponentScope::new());
    let first = ScopedTaskContainer::new(
        Task::new("REPORT"),
        scope.clone(),
        vec![ComponentDescriptor::eager(Recorder::<1>::new(&log))],
    );
    let second = ScopedTaskContainer::new(Task::new("REPORT"), scope.clone(), vec![]);
    first.bootup().unwrap();
    second.bootup().unwrap();

    assert!((&first as &dyn TaskContainer).get::<Recorder<1>>().is_ok());
    let err = (&second as &dyn TaskContainer).get::<Recorder<1>>().unwrap_err();
    assert!(matches!(err, ContainerError::Missing(_)));
    assert!(scope.is_empty());
}

#[test]
fn shared_descriptor_keeps_caller_handle() {
    init_logger();
    let log = EventLog::default();
    let recorder = Arc::new(Recorder::<4>::new(&log));
    let descriptor = ComponentDescriptor::shared(recorder.clone(), StartPolicy::Eager);
    assert_eq!(descriptor.policy(), StartPolicy::Eager);

    let container = container(vec![descriptor]);
    container.bootup().unwrap();
    let resolved = (&container as &dyn TaskContainer).get::<Recorder<4>>().unwrap();

    assert!(Arc::ptr_eq(&resolved, &recorder));
}

#[test]
fn guard_closes_container_exactly_once() {
    init_logger();
    let log = EventLog::default();
    let factory = CountingFactory::default();
    let task = Task::new("REPORT");

    let result: Result<(), ContainerError> = (|| {
        let guard = ContainerGuard::new(factory.create(
            &task,
            vec![
                ComponentDescriptor::eager(Recorder::<1>::new(&log)),
                ComponentDescriptor::eager(Recorder::<2>::new(&log).failing_start()),
            ],
        ));
        guard.bootup()?;
        Ok(())
    })();

    assert!(result.is_err());
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.closes(), 1);
    assert_eq!(log.events(), vec!["start 1", "start 2", "stop 1"]);
}
