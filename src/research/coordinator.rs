//! The research coordinator: a bounded plan → dispatch → evaluate →
//! synthesize loop over one task.
//!
//! Specialist dispatch within an iteration fans out concurrently and joins
//! best-effort: a slow or failed specialist contributes nothing, it never
//! blocks siblings or aborts the loop. Between phases the coordinator
//! checks its deadline and aborts promptly instead of completing a stale
//! result; the task-level timeout in the queue is the hard outer bound.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ResearchConfig;
use crate::error::{Error, Result};
use crate::generator::TextGenerator;
use crate::models::{ResearchResult, ResearchTask};
use crate::research::evaluate::{evaluate, PivotUrgency};
use crate::research::plan::{plan, PlanStep};
use crate::research::synthesize::synthesize;
use crate::specialist::{Finding, SpecialistRegistry};

/// Drives the research loop for one task at a time. Stateless between runs;
/// safe to share across workers.
pub struct Coordinator {
    generator: Arc<dyn TextGenerator>,
    specialists: SpecialistRegistry,
    config: ResearchConfig,
}

impl Coordinator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        specialists: SpecialistRegistry,
        config: ResearchConfig,
    ) -> Self {
        Self {
            generator,
            specialists,
            config,
        }
    }

    /// Run the full loop for a task. `deadline` is the cooperative
    /// cancellation signal observed between phases.
    pub async fn run(
        &self,
        task: &ResearchTask,
        prior_knowledge: Option<String>,
        deadline: Instant,
    ) -> Result<ResearchResult> {
        let (max_iterations, max_results) = task.depth.preset();
        let mut findings: Vec<Finding> = Vec::new();
        let mut loop_confidence = 0.0;
        let mut query = task.query.clone();
        let mut pending_steps: Vec<PlanStep> = Vec::new();

        for iteration in 0..max_iterations {
            self.check_deadline(task, deadline)?;

            let steps = if pending_steps.is_empty() {
                let plan = plan(
                    self.generator.as_ref(),
                    &self.specialists,
                    &self.config,
                    &query,
                    prior_knowledge.as_deref(),
                    task.context.as_deref(),
                )
                .await;
                debug!(task = %task.id, iteration, strategy = %plan.strategy, "planned");
                plan.steps
            } else {
                std::mem::take(&mut pending_steps)
            };

            self.check_deadline(task, deadline)?;

            let new_findings = self.dispatch(&steps, max_results).await;
            info!(
                task = %task.id,
                iteration,
                steps = steps.len(),
                findings = new_findings.len(),
                "dispatch complete"
            );
            findings.extend(new_findings);

            self.check_deadline(task, deadline)?;

            let evaluation = evaluate(
                self.generator.as_ref(),
                &self.specialists,
                &self.config,
                &query,
                &findings,
            )
            .await;
            loop_confidence = evaluation.confidence;

            if evaluation.complete {
                debug!(task = %task.id, iteration, confidence = loop_confidence, "complete");
                break;
            }

            pending_steps = evaluation.next_steps;

            // A pressing pivot reframes the next iteration's planning.
            if let Some(pivot) = evaluation.pivot {
                info!(task = %task.id, framing = %pivot.framing, ?pivot.urgency, "pivot suggested");
                if pivot.urgency != PivotUrgency::Low {
                    query = pivot.framing;
                    pending_steps.clear();
                }
            }
        }

        self.check_deadline(task, deadline)?;

        Ok(synthesize(
            self.generator.as_ref(),
            &self.config,
            &task.query,
            &findings,
            loop_confidence,
        )
        .await)
    }

    /// Fan out all planned steps concurrently and join best-effort.
    async fn dispatch(&self, steps: &[PlanStep], max_results: usize) -> Vec<Finding> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_plan_steps.max(1)));
        let mut searches = FuturesUnordered::new();

        for step in steps {
            let Some(specialist) = self.specialists.get(&step.specialist) else {
                warn!(specialist = %step.specialist, "planned specialist not registered, skipping");
                continue;
            };
            let sub_query = step.sub_query.clone();
            let semaphore = semaphore.clone();
            searches.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Vec::new();
                };
                specialist.search(&sub_query, max_results).await
            });
        }

        let mut findings = Vec::new();
        while let Some(batch) = searches.next().await {
            findings.extend(batch);
        }
        findings
    }

    fn check_deadline(&self, task: &ResearchTask, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            warn!(task = %task.id, "deadline elapsed, aborting between phases");
            return Err(Error::TaskTimeout(task.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;
    use crate::models::{ResearchDepth, TaskOrigin, TaskStatus};
    use crate::specialist::StaticSpecialist;
    use chrono::Local;
    use std::time::Duration;
    use uuid::Uuid;

    fn test_task(query: &str, depth: ResearchDepth) -> ResearchTask {
        ResearchTask {
            id: Uuid::new_v4(),
            query: query.to_string(),
            context: None,
            depth,
            status: TaskStatus::Running,
            origin: TaskOrigin::Manual,
            session_id: None,
            priority: 5,
            retry_count: 0,
            created_at: Local::now(),
            started_at: Some(Local::now()),
            completed_at: None,
            error: None,
            result: None,
        }
    }

    fn registry(relevance: f64) -> SpecialistRegistry {
        let mut registry = SpecialistRegistry::new();
        registry.register(Arc::new(StaticSpecialist::single("web", "web finding", relevance)));
        registry.register(Arc::new(StaticSpecialist::single("docs", "docs finding", relevance)));
        registry
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn broken_generator_still_completes_via_fallbacks() {
        // Nothing scripted: plan falls back, evaluate defaults to complete,
        // synthesis concatenates. The whole loop degrades, never fails.
        let coordinator = Coordinator::new(
            Arc::new(ScriptedGenerator::new()),
            registry(0.8),
            ResearchConfig::default(),
        );
        let task = test_task("what is rate limiting", ResearchDepth::Quick);
        let result = coordinator.run(&task, None, far_deadline()).await.unwrap();

        assert!(!result.summary.is_empty());
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert_eq!(result.sources.len(), 2);
    }

    #[tokio::test]
    async fn fast_path_completes_without_evaluate_call() {
        // High-relevance findings from two specialists hit the fast path;
        // only PLAN and SYNTHESIZE are scripted, EVALUATE would error.
        let gen = ScriptedGenerator::new()
            .respond(
                "PLAN",
                "STRATEGY: direct\nSTEP: web | q | 5\nSTEP: docs | q | 5",
            )
            .respond(
                "SYNTHESIZE",
                "SUMMARY: done\nFINDING: one\nCONFIDENCE: 0.9",
            );
        let coordinator =
            Coordinator::new(Arc::new(gen), registry(0.95), ResearchConfig::default());
        let task = test_task("q", ResearchDepth::Quick);
        let result = coordinator.run(&task, None, far_deadline()).await.unwrap();
        assert_eq!(result.summary, "done");
    }

    #[tokio::test]
    async fn second_iteration_uses_evaluation_steps() {
        let gen = ScriptedGenerator::new()
            .respond("PLAN", "STRATEGY: s\nSTEP: web | first | 5")
            .respond(
                "EVALUATE",
                "COMPLETE: false\nCONFIDENCE: 0.4\nSTEP: docs | follow up | 6",
            )
            .respond("EVALUATE", "COMPLETE: true\nCONFIDENCE: 0.8")
            .respond("SYNTHESIZE", "SUMMARY: merged\nCONFIDENCE: 0.8");
        let coordinator =
            Coordinator::new(Arc::new(gen), registry(0.5), ResearchConfig::default());
        let task = test_task("q", ResearchDepth::Deep);
        let result = coordinator.run(&task, None, far_deadline()).await.unwrap();

        assert_eq!(result.summary, "merged");
        // both iterations contributed findings
        assert_eq!(result.sources.len(), 2);
    }

    #[tokio::test]
    async fn elapsed_deadline_aborts_between_phases() {
        let coordinator = Coordinator::new(
            Arc::new(ScriptedGenerator::new()),
            registry(0.8),
            ResearchConfig::default(),
        );
        let task = test_task("q", ResearchDepth::Quick);
        let err = coordinator
            .run(&task, None, Instant::now() - Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskTimeout(_)));
    }

    #[tokio::test]
    async fn no_findings_yields_nothing_found() {
        let mut registry = SpecialistRegistry::new();
        registry.register(Arc::new(StaticSpecialist::new("web", Vec::new())));
        let coordinator = Coordinator::new(
            Arc::new(ScriptedGenerator::new()),
            registry,
            ResearchConfig::default(),
        );
        let task = test_task("obscure question", ResearchDepth::Quick);
        let result = coordinator.run(&task, None, far_deadline()).await.unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(result.sources.is_empty());
    }
}
