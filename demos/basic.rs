//! Basic example of compute_engine usage

use std::sync::Arc;
use std::time::Duration;

use compute_engine::processor::{ComputationStep, StepError, TaskResultHolder};
use compute_engine::{
    ComponentScope, ComputeEngine, EngineConfig, InMemoryTaskQueue, LocalCoordinator,
    ProcessorRegistry, ReportTaskProcessor, TaskContainer, TaskResult, TaskStatus,
};

struct CountLines;

impl ComputationStep for CountLines {
    fn description(&self) -> &str {
        "count lines"
    }

    fn execute(&self, container: &dyn TaskContainer) -> Result<(), StepError> {
        std::thread::sleep(Duration::from_millis(100));
        let task = container.task();
        container.get::<TaskResultHolder>()?.set(
            TaskResult::new(serde_json::json!({ "lines": 42 }))
                .with_analysis_id(format!("analysis-{}", task.id)),
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> compute_engine::Result<()> {
    env_logger::init();

    // CE_WORKER_COUNT 等环境变量可覆盖默认值
    let config = EngineConfig::from_env()?.with_queue_polling_delay(Duration::from_millis(200));
    let queue = Arc::new(InMemoryTaskQueue::new());
    let registry = ProcessorRegistry::builder()
        .register(Arc::new(ReportTaskProcessor::new().with_step(Arc::new(CountLines))))
        .build()?;

    let engine = ComputeEngine::start(
        config,
        queue.clone(),
        Arc::new(LocalCoordinator::standalone()),
        registry,
        ComponentScope::new(),
    )?;

    for _ in 0..10 {
        queue.submit("REPORT");
    }
    queue.submit("UNKNOWN");

    while queue.count_by_status(TaskStatus::Pending) + queue.count_by_status(TaskStatus::InProgress) > 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for task in queue.tasks() {
        println!("Task {} ({}) -> {}", task.id, task.task_type, task.status.as_str());
    }

    engine.shutdown().await
}
