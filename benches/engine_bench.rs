use criterion::{black_box, criterion_group, criterion_main, Criterion};
use compute_engine::processor::{ComputationStep, StepError, TaskResultHolder};
use compute_engine::{
    ComponentScope, InMemoryTaskQueue, ProcessorRegistry, ReportTaskProcessor,
    ScopedContainerFactory, Task, TaskContainer, TaskDispatcher, TaskQueue, TaskResult, WorkerId,
};
use std::sync::Arc;

struct StoreResult;

impl ComputationStep for StoreResult {
    fn description(&self) -> &str {
        "store result"
    }

    fn execute(&self, container: &dyn TaskContainer) -> Result<(), StepError> {
        container
            .get::<TaskResultHolder>()?
            .set(TaskResult::new(serde_json::Value::Null));
        Ok(())
    }
}

fn dispatcher() -> TaskDispatcher {
    let registry = ProcessorRegistry::builder()
        .register(Arc::new(ReportTaskProcessor::new().with_step(Arc::new(StoreResult))))
        .build()
        .unwrap();
    TaskDispatcher::new(
        Arc::new(registry),
        Arc::new(ScopedContainerFactory::new(Arc::new(ComponentScope::new()))),
    )
}

fn bench_dispatch(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let task = Task::new("REPORT");

    c.bench_function("dispatch_report_task", |b| {
        b.iter(|| dispatcher.outcome(black_box(&task)))
    });
}

fn bench_unsupported_dispatch(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let task = Task::new("UNKNOWN");

    c.bench_function("dispatch_unsupported_task", |b| {
        b.iter(|| dispatcher.outcome(black_box(&task)))
    });
}

fn bench_claim_and_report(c: &mut Criterion) {
    let queue = InMemoryTaskQueue::new();
    let dispatcher = dispatcher();
    let worker = WorkerId::generate();

    // 预填充任务
    for _ in 0..1000 {
        queue.submit("REPORT");
    }

    c.bench_function("claim_process_report", |b| {
        b.iter(|| {
            if let Some(task) = queue.claim_next(&worker).unwrap() {
                let outcome = dispatcher.outcome(&task);
                queue.report_result(&task.id, &outcome).unwrap();
            } else {
                queue.submit("REPORT");
            }
        })
    });
}

criterion_group!(
    benches,
    bench_dispatch,
    bench_unsupported_dispatch,
    bench_claim_and_report
);
criterion_main!(benches);
