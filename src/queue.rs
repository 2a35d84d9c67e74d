//! Task queue and worker pool.
//!
//! The queue owns task lifecycle transitions; workers claim tasks
//! atomically, drive the [`Coordinator`](crate::research::Coordinator)
//! under a hard timeout, and write status back through the same store.
//! A timed-out task with retry attempts left goes back in the queue at its
//! original priority; otherwise it fails terminally.

use chrono::Local;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, TriggerConfig};
use crate::error::{Error, Result};
use crate::models::{DetectedTrigger, ResearchDepth, ResearchTask, TaskOrigin, TaskStatus};
use crate::research::Coordinator;
use crate::scoring::knowledge_from_task;
use crate::store::Database;

/// What a caller provides to enqueue research
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub query: String,
    pub context: Option<String>,
    pub depth: ResearchDepth,
    pub origin: TaskOrigin,
    pub session_id: Option<String>,
    pub priority: u8,
}

impl TaskSpec {
    pub fn new(query: &str, depth: ResearchDepth) -> Self {
        Self {
            query: query.to_string(),
            context: None,
            depth,
            origin: TaskOrigin::Manual,
            session_id: None,
            priority: 5,
        }
    }
}

/// Durable, priority-ordered queue of research tasks
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(db: Database, config: QueueConfig) -> Self {
        Self { db, config }
    }

    /// Persist a new queued task. Fails with [`Error::QueueFull`] at the
    /// configured maximum; duplicate detection is the caller's concern.
    pub fn enqueue(&self, spec: TaskSpec) -> Result<Uuid> {
        let queued = self.db.count_queued()?;
        if queued >= self.config.max_queue_size {
            return Err(Error::QueueFull(queued));
        }

        let task = ResearchTask {
            id: Uuid::new_v4(),
            query: spec.query,
            context: spec.context,
            depth: spec.depth,
            status: TaskStatus::Queued,
            origin: spec.origin,
            session_id: spec.session_id,
            priority: spec.priority.clamp(1, 10),
            retry_count: 0,
            created_at: Local::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        };
        self.db.insert_task(&task)?;
        info!(task = %task.id, query = %task.query, priority = task.priority, "enqueued");
        Ok(task.id)
    }

    /// Gate a detected trigger and enqueue it. Confidence below the
    /// configured floor, a missing query, or an already-researched query
    /// all come back `Ok(None)` with nothing persisted.
    pub fn enqueue_trigger(
        &self,
        trigger: &DetectedTrigger,
        trigger_config: &TriggerConfig,
        origin: TaskOrigin,
        session_id: Option<&str>,
    ) -> Result<Option<Uuid>> {
        if !trigger.should_research || trigger.confidence < trigger_config.min_confidence {
            debug!(
                confidence = trigger.confidence,
                floor = trigger_config.min_confidence,
                "trigger below confidence floor"
            );
            return Ok(None);
        }
        let Some(query) = trigger.query.as_deref() else {
            return Ok(None);
        };
        if self.db.has_similar_task(query)? {
            debug!(query, "similar task already researched, skipping");
            return Ok(None);
        }

        let id = self.enqueue(TaskSpec {
            query: query.to_string(),
            context: None,
            depth: trigger.depth,
            origin,
            session_id: session_id.map(str::to_string),
            priority: trigger.priority,
        })?;
        Ok(Some(id))
    }

    /// Up to `n` queued tasks, priority descending then FIFO. Does not
    /// claim or limit concurrency.
    pub fn dequeue_batch(&self, n: usize) -> Result<Vec<ResearchTask>> {
        self.db.dequeue_batch(n)
    }
}

/// Bounded worker pool draining the queue through the coordinator
pub struct QueueRunner {
    db: Database,
    queue: TaskQueue,
    coordinator: Arc<Coordinator>,
    config: QueueConfig,
}

impl QueueRunner {
    pub fn new(
        db: Database,
        queue: TaskQueue,
        coordinator: Arc<Coordinator>,
        config: QueueConfig,
    ) -> Self {
        Self {
            db,
            queue,
            coordinator,
            config,
        }
    }

    /// Drain the queue until it is empty, running at most `max_concurrent`
    /// tasks at a time. Returns the number of tasks processed (including
    /// retried attempts). Re-queries between batches, so a higher-priority
    /// task enqueued mid-drain is picked on the next free slot.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        loop {
            let batch = self.queue.dequeue_batch(self.config.max_concurrent)?;
            if batch.is_empty() {
                return Ok(processed);
            }

            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
            let mut workers = FuturesUnordered::new();
            for task in batch {
                let semaphore = semaphore.clone();
                workers.push(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return Ok(false);
                    };
                    self.process_task(task).await
                });
            }
            while let Some(outcome) = workers.next().await {
                if outcome? {
                    processed += 1;
                }
            }
        }
    }

    /// Claim and run one task. Returns false when another worker already
    /// claimed it.
    async fn process_task(&self, task: ResearchTask) -> Result<bool> {
        if !self.db.claim_task(&task.id)? {
            return Ok(false);
        }

        let timeout = self.config.task_timeout();
        let deadline = Instant::now() + timeout;
        let prior_knowledge = self.prior_knowledge(&task.query)?;

        let outcome = tokio::time::timeout(
            timeout,
            self.coordinator.run(&task, prior_knowledge, deadline),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => {
                self.db.complete_task(&task.id, &result)?;
                // persist the finding so future queries can recall it
                let mut completed = task.clone();
                completed.result = Some(result);
                completed.completed_at = Some(Local::now());
                if let Some(entry) = knowledge_from_task(&completed) {
                    self.db.append_knowledge(&entry)?;
                }
                info!(task = %task.id, "completed");
            }
            Ok(Err(Error::TaskTimeout(_))) | Err(_) => {
                self.handle_timeout(&task)?;
            }
            Ok(Err(e)) => {
                warn!(task = %task.id, error = %e, "task failed");
                self.db.fail_task(&task.id, &e.to_string())?;
            }
        }
        Ok(true)
    }

    fn handle_timeout(&self, task: &ResearchTask) -> Result<()> {
        if task.retry_count < self.config.retry_attempts {
            let retry_count = task.retry_count + 1;
            warn!(
                task = %task.id,
                retry = retry_count,
                of = self.config.retry_attempts,
                "timed out, re-enqueueing"
            );
            self.db.requeue_task(&task.id, retry_count)
        } else {
            warn!(task = %task.id, "timed out, retries exhausted");
            self.db
                .fail_task(&task.id, &Error::TaskTimeout(task.id).to_string())
        }
    }

    /// Short summaries of already-stored knowledge related to the query,
    /// handed to the planner as prior knowledge.
    fn prior_knowledge(&self, query: &str) -> Result<Option<String>> {
        let entries = self.db.search_knowledge(query, 3)?;
        if entries.is_empty() {
            return Ok(None);
        }
        let joined = entries
            .iter()
            .map(|e| format!("- {}: {}", e.title, e.summary))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(joined))
    }
}
