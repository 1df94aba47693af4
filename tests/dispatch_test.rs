
use std::sync::Arc;

use compute_engine::processor::{RegistryError, REPORT};
use compute_engine::{
    ComponentScope, ProcessorRegistry, ReportTaskProcessor, Task, TaskDispatcher, TaskError,
    TaskOutcome, TaskProcessor, TaskStatus,
};
use test_utils::{
    init_logger, CountingFactory, EventLog, FailingStep, PanickingStep, Recorder,
    RecorderProvider, WriteResultStep,
};

fn dispatcher(processor: ReportTaskProcessor) -> (TaskDispatcher, CountingFactory) {
    let registry = ProcessorRegistry::builder()
        .register(Arc::new(processor))
        .build()
        .unwrap();
    let factory = CountingFactory::with_scope(ComponentScope::new());
    let dispatcher = TaskDispatcher::new(Arc::new(registry), Arc::new(factory.clone()));
    (dispatcher, factory)
}

#[test]
fn report_task_is_processed_by_report_processor() {
    init_logger();
    let (dispatcher, factory) =
        dispatcher(ReportTaskProcessor::new().with_step(Arc::new(WriteResultStep)));
    let task = Task::new(REPORT).with_id("t1");

    let result = dispatcher.process(&task).unwrap().unwrap();

    assert_eq!(result.analysis_id.as_deref(), Some("analysis-t1"));
    assert_eq!(result.payload["type"], "REPORT");
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.closes(), 1);
}

#[test]
fn processing_without_result_succeeds_with_empty_result() {
    init_logger();
    let (dispatcher, _) = dispatcher(ReportTaskProcessor::new());

    let outcome = dispatcher.outcome(&Task::new(REPORT));

    assert_eq!(outcome, TaskOutcome::Success(None));
}

#[test]
fn unknown_task_type_fails_without_creating_a_container() {
    init_logger();
    let (dispatcher, factory) = dispatcher(ReportTaskProcessor::new());

    let err = dispatcher.process(&Task::new("UNKNOWN")).unwrap_err();
    assert!(matches!(err, TaskError::UnsupportedType(ref t) if t == "UNKNOWN"));

    let outcome = dispatcher.outcome(&Task::new("UNKNOWN"));
    assert_eq!(outcome.status(), TaskStatus::Failed);
    assert_eq!(outcome.error().unwrap().error_type, "UNSUPPORTED_TYPE");
    assert_eq!(factory.created(), 0);
}

#[test]
fn failing_step_fails_the_task_and_closes_container() {
    init_logger();
    let (dispatcher, factory) = dispatcher(
        ReportTaskProcessor::new()
            .with_step(Arc::new(FailingStep))
            .with_step(Arc::new(WriteResultStep)),
    );

    let outcome = dispatcher.outcome(&Task::new(REPORT));

    let error = outcome.error().unwrap();
    assert_eq!(error.error_type, "STEP");
    assert!(error.message.contains("load report"), "{}", error.message);
    assert!(error.message.contains("corrupted"), "{}", error.message);
    assert_eq!(factory.closes(), 1);
}

#[test]
fn panicking_step_is_reported_as_failure() {
    init_logger();
    let (dispatcher, factory) = dispatcher(ReportTaskProcessor::new().with_step(Arc::new(PanickingStep)));

    let err = dispatcher.process(&Task::new(REPORT)).unwrap_err();

    assert!(matches!(err, TaskError::Panicked(ref m) if m.contains("blew up")), "{:?}", err);
    assert_eq!(err.error_type(), "PANIC");
    assert_eq!(factory.closes(), 1);
}

#[test]
fn extension_components_live_in_the_task_container() {
    init_logger();
    let log = EventLog::default();
    let processor = ReportTaskProcessor::new()
        .with_provider(Arc::new(RecorderProvider { log: log.clone() }))
        .with_step(Arc::new(UsesRecorder));
    let (dispatcher, _) = dispatcher(processor);

    dispatcher.process(&Task::new(REPORT)).unwrap();
    dispatcher.process(&Task::new(REPORT)).unwrap();

    // 每个任务都有自己的组件实例
    assert_eq!(log.events(), vec!["start 7", "stop 7", "start 7", "stop 7"]);
}

#[test]
fn eager_start_failure_fails_the_task_and_closes_container() {
    init_logger();
    let log = EventLog::default();
    let processor = ReportTaskProcessor::new()
        .with_provider(Arc::new(BrokenProvider { log: log.clone() }))
        .with_step(Arc::new(WriteResultStep));
    let (dispatcher, factory) = dispatcher(processor);

    let outcome = dispatcher.outcome(&Task::new(REPORT));

    assert_eq!(outcome.status(), TaskStatus::Failed);
    let error = outcome.error().unwrap();
    assert_eq!(error.error_type, "CONTAINER");
    assert!(error.message.contains("refused to start"), "{}", error.message);
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.closes(), 1);
    assert_eq!(log.events(), vec!["start 8", "start 9", "stop 8"]);
}

#[test]
fn processor_without_providers_exposes_only_its_own_components() {
    let processor = ReportTaskProcessor::new();
    let components = processor.components(&Task::new(REPORT));
    assert_eq!(components.len(), 1);
}

#[test]
fn one_processor_per_task_type() {
    let result = ProcessorRegistry::builder()
        .register(Arc::new(ReportTaskProcessor::new()))
        .register(Arc::new(ReportTaskProcessor::for_types(&["AUDIT", REPORT])))
        .build();

    assert!(matches!(result, Err(RegistryError::DuplicateTaskType(ref t)) if t == REPORT));
}

#[test]
fn processor_handles_several_types() {
    init_logger();
    let registry = ProcessorRegistry::builder()
        .register(Arc::new(ReportTaskProcessor::for_types(&[REPORT, "AUDIT"])))
        .build()
        .unwrap();
    assert_eq!(registry.handled_types(), vec!["AUDIT", REPORT]);

    let dispatcher = TaskDispatcher::new(Arc::new(registry), Arc::new(CountingFactory::default()));
    assert!(dispatcher.process(&Task::new("AUDIT")).is_ok());
}

/// 访问扩展提供的惰性组件
struct UsesRecorder;

impl compute_engine::processor::ComputationStep for UsesRecorder {
    fn description(&self) -> &str {
        "use recorder"
    }

    fn execute(
        &self,
        container: &dyn compute_engine::TaskContainer,
    ) -> Result<(), compute_engine::processor::StepError> {
        container.get::<Recorder<7>>()?;
        Ok(())
    }
}

/// 第二个急切组件启动失败
struct BrokenProvider {
    log: EventLog,
}

impl compute_engine::processor::ExtensionProvider for BrokenProvider {
    fn name(&self) -> &str {
        "broken"
    }

    fn components(&self, _task: &Task) -> Vec<compute_engine::ComponentDescriptor> {
        vec![
            compute_engine::ComponentDescriptor::eager(Recorder::<8>::new(&self.log)),
            compute_engine::ComponentDescriptor::eager(Recorder::<9>::new(&self.log).failing_start()),
        ]
    }
}
