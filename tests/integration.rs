//! End-to-end scenarios across trigger detection, queueing, coordination,
//! and injection, with deterministic fakes standing in for the external
//! generator and specialists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use research_scout::config::{
    InjectionConfig, QueueConfig, ResearchConfig, ScoringConfig, TriggerConfig,
};
use research_scout::generator::ScriptedGenerator;
use research_scout::injection::InjectionManager;
use research_scout::models::{ResearchDepth, SourceKind, TaskOrigin, TaskStatus};
use research_scout::queue::{QueueRunner, TaskQueue, TaskSpec};
use research_scout::research::Coordinator;
use research_scout::scoring::KnowledgeScorer;
use research_scout::specialist::{Finding, Specialist, SpecialistRegistry, StaticSpecialist};
use research_scout::store::Database;
use research_scout::trigger::TriggerPipeline;

fn offline_registry(relevance: f64) -> SpecialistRegistry {
    let mut registry = SpecialistRegistry::new();
    registry.register(Arc::new(StaticSpecialist::single(
        "web",
        "rate limiting overview",
        relevance,
    )));
    registry.register(Arc::new(StaticSpecialist::single(
        "docs",
        "rate limiting reference",
        relevance,
    )));
    registry
}

fn runner_with(
    db: &Database,
    registry: SpecialistRegistry,
    queue_config: QueueConfig,
) -> (TaskQueue, QueueRunner) {
    let queue = TaskQueue::new(db.clone(), queue_config.clone());
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(ScriptedGenerator::new()),
        registry,
        ResearchConfig::default(),
    ));
    let runner = QueueRunner::new(db.clone(), queue.clone(), coordinator, queue_config);
    (queue, runner)
}

/// The spec's canonical scenario: a quick-depth query whose generator fails
/// everywhere. The plan falls back to the default specialists, findings
/// come back, synthesis degrades deterministically, and the task completes.
#[tokio::test]
async fn quick_query_survives_total_generator_failure() {
    let db = Database::new_in_memory().unwrap();
    let (queue, runner) = runner_with(&db, offline_registry(0.7), QueueConfig::default());

    let id = queue
        .enqueue(TaskSpec::new("what is rate limiting", ResearchDepth::Quick))
        .unwrap();
    runner.run_until_idle().await.unwrap();

    let task = db.get_task(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.expect("completed task carries a result");
    assert!(!result.summary.is_empty());
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert!(!result.sources.is_empty());
}

/// A specialist slower than the task timeout forces the timeout/retry path:
/// with retry_attempts = 2 the task runs three times, then fails terminally.
struct SleepySpecialist;

#[async_trait]
impl Specialist for SleepySpecialist {
    fn name(&self) -> &str {
        "web"
    }

    async fn search(&self, _sub_query: &str, _max_results: usize) -> Vec<Finding> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Vec::new()
    }
}

#[tokio::test]
async fn timed_out_task_is_retried_exactly_twice() {
    let db = Database::new_in_memory().unwrap();
    let mut registry = SpecialistRegistry::new();
    registry.register(Arc::new(SleepySpecialist));

    let queue_config = QueueConfig {
        task_timeout_ms: 40,
        retry_attempts: 2,
        ..QueueConfig::default()
    };
    let (queue, runner) = runner_with(&db, registry, queue_config);

    let id = queue
        .enqueue(TaskSpec::new("anything at all really", ResearchDepth::Quick))
        .unwrap();
    let processed = runner.run_until_idle().await.unwrap();

    // initial attempt + two retries
    assert_eq!(processed, 3);
    let task = db.get_task(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.error.unwrap().contains("timeout"));
}

/// Trigger → enqueue → drain → inject, the full passive loop.
#[tokio::test]
async fn detected_trigger_flows_through_to_injection() {
    let db = Database::new_in_memory().unwrap();
    db.touch_session("session-1", None).unwrap();

    // 1. A user question trips the detector.
    let trigger_config = TriggerConfig::default();
    let mut pipeline = TriggerPipeline::new(&trigger_config, 1);
    let trigger = pipeline.assess(
        "session-1",
        "how do I implement rate limiting for my API?",
        &SourceKind::UserMessage,
    );
    assert!(trigger.should_research);

    // 2. The gated trigger becomes a queued task.
    let (queue, runner) = runner_with(&db, offline_registry(0.8), QueueConfig::default());
    let id = queue
        .enqueue_trigger(
            &trigger,
            &trigger_config,
            TaskOrigin::UserPrompt,
            Some("session-1"),
        )
        .unwrap()
        .expect("confidence clears the configured floor");

    // 3. Workers drain the queue.
    runner.run_until_idle().await.unwrap();
    assert_eq!(
        db.get_task(&id).unwrap().unwrap().status,
        TaskStatus::Completed
    );

    // 4. The next tool event pulls an injection for the session.
    let scorer = KnowledgeScorer::new(ScoringConfig::default()).unwrap();
    let manager = InjectionManager::new(db.clone(), scorer, InjectionConfig::default());
    let content = manager
        .get_injection(
            "session-1",
            "implement rate limiting for my API",
            None,
        )
        .await
        .unwrap()
        .expect("a completed result should be injectable");
    assert!(content.contains("rate limiting"));

    // the audit trail and counters moved exactly once
    let session = db.get_session("session-1").unwrap().unwrap();
    assert_eq!(session.injection_count, 1);
    assert_eq!(db.injections_for_session("session-1").unwrap().len(), 1);
}

/// Capacity errors reject the excess enqueues and leave the queue intact.
#[tokio::test]
async fn queue_capacity_rejects_excess_tasks() {
    let db = Database::new_in_memory().unwrap();
    let queue_config = QueueConfig {
        max_queue_size: 2,
        ..QueueConfig::default()
    };
    let queue = TaskQueue::new(db.clone(), queue_config);

    queue
        .enqueue(TaskSpec::new("first question", ResearchDepth::Quick))
        .unwrap();
    queue
        .enqueue(TaskSpec::new("second question", ResearchDepth::Quick))
        .unwrap();
    assert!(queue
        .enqueue(TaskSpec::new("third question", ResearchDepth::Quick))
        .is_err());
    assert_eq!(db.dequeue_batch(10).unwrap().len(), 2);
}

/// Tool errors enqueue once per session; the pipeline swallows the repeat
/// before it reaches the queue.
#[tokio::test]
async fn repeated_tool_error_enqueues_once() {
    let trigger_config = TriggerConfig::default();
    let mut pipeline = TriggerPipeline::new(&trigger_config, 1);
    let db = Database::new_in_memory().unwrap();
    let queue = TaskQueue::new(db.clone(), QueueConfig::default());

    let output = "error[E0502]: cannot borrow `x` as mutable";
    for _ in 0..3 {
        let trigger = pipeline.assess(
            "session-1",
            output,
            &SourceKind::ToolOutput {
                tool: "cargo".to_string(),
            },
        );
        queue
            .enqueue_trigger(
                &trigger,
                &trigger_config,
                TaskOrigin::ToolOutput,
                Some("session-1"),
            )
            .unwrap();
    }

    assert_eq!(db.dequeue_batch(10).unwrap().len(), 1);
}

/// A database file round-trips a completed result across re-opens.
#[tokio::test]
async fn result_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scout.db");

    let id = {
        let db = Database::new(path.clone()).unwrap();
        let (queue, runner) = runner_with(&db, offline_registry(0.8), QueueConfig::default());
        let id = queue
            .enqueue(TaskSpec::new("what is backpressure", ResearchDepth::Quick))
            .unwrap();
        runner.run_until_idle().await.unwrap();
        id
    };

    let reopened = Database::new(path).unwrap();
    let task = reopened.get_task(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap();
    assert!(!result.summary.is_empty());
    assert!(!reopened
        .search_knowledge("backpressure", 5)
        .unwrap()
        .is_empty());
}
