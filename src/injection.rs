//! Injection management: deciding whether, what, and how to surface
//! knowledge back into a session.
//!
//! `get_injection` is read-like for the caller but has exactly one side
//! effect on success: the injection record plus the session counter and
//! cooldown updates, committed together. A `None` result changes nothing.
//! Budget failures are silent no-ops: the session either gets
//! helpful content or nothing, never an error string.

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::InjectionConfig;
use crate::error::Result;
use crate::models::{
    estimate_tokens, InjectionRecord, InjectionType, KnowledgeCandidate, KnowledgeCategory,
    KnowledgeSource,
};
use crate::scoring::{KnowledgeScorer, QueryContext};
use crate::store::Database;

/// How many stored entries / completed tasks are scored per query
const CANDIDATE_POOL_SIZE: usize = 10;

/// Budget- and cooldown-gated injection selector
pub struct InjectionManager {
    db: Database,
    scorer: KnowledgeScorer,
    config: InjectionConfig,
    /// Serializes the gate-check/record step so concurrent calls cannot
    /// both pass the cooldown gate.
    gate: Mutex<()>,
}

impl InjectionManager {
    pub fn new(db: Database, scorer: KnowledgeScorer, config: InjectionConfig) -> Self {
        Self {
            db,
            scorer,
            config,
            gate: Mutex::new(()),
        }
    }

    /// Select, render, and record at most one injection for the session.
    /// Returns `Ok(None)` whenever any gate fails; the only side effect
    /// happens on `Ok(Some(_))`.
    pub async fn get_injection(
        &self,
        session_id: &str,
        query: &str,
        project_path: Option<&str>,
    ) -> Result<Option<String>> {
        let _guard = self.gate.lock().await;

        // Gate 1: session exists.
        let Some(session) = self.db.get_session(session_id)? else {
            debug!(session_id, "no such session, skipping injection");
            return Ok(None);
        };

        // Gate 2: per-session budgets.
        if session.injection_count >= self.config.max_injections_per_session
            || session.tokens_injected >= self.config.max_tokens_per_session
        {
            debug!(session_id, "session injection budget exhausted");
            return Ok(None);
        }

        // Gate 3: cooldown.
        if let Some(last) = session.last_injection_at {
            let elapsed = (Local::now() - last)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            if elapsed < self.config.cooldown() {
                debug!(session_id, "injection cooldown active");
                return Ok(None);
            }
        }

        // Gate 4: a candidate clears the minimum relevance.
        let mut context = QueryContext::new(query);
        if let Some(project) = project_path.or(session.project_path.as_deref()) {
            context = context.with_project(project);
        }
        let (memory, research) = self.best_candidates(session_id, &context)?;

        let memory_score = memory.as_ref().map(|c| c.final_score).unwrap_or(0.0);
        let research_score = research.as_ref().map(|c| c.final_score).unwrap_or(0.0);

        let Some(kind) = determine_injection_type(memory_score, research_score, &self.config)
        else {
            return Ok(None);
        };

        // A recalled bugfix is a pitfall to flag, not plain context.
        let kind = match kind {
            InjectionType::MemoryOnly
                if memory
                    .as_ref()
                    .map(|c| c.category == KnowledgeCategory::Bugfix)
                    .unwrap_or(false) =>
            {
                InjectionType::Warning
            }
            kind => kind,
        };

        let content = match kind {
            InjectionType::MemoryOnly | InjectionType::Warning => {
                render(kind, memory.as_ref(), None, &self.config)
            }
            InjectionType::ResearchOnly => render(kind, None, research.as_ref(), &self.config),
            InjectionType::Combined => {
                render(kind, memory.as_ref(), research.as_ref(), &self.config)
            }
        };
        let Some(content) = content else {
            return Ok(None);
        };

        let candidate_id = match kind {
            InjectionType::ResearchOnly | InjectionType::Combined => research
                .as_ref()
                .map(|c| c.id.clone())
                .or_else(|| memory.as_ref().map(|c| c.id.clone())),
            _ => memory.as_ref().map(|c| c.id.clone()),
        }
        .unwrap_or_default();

        let record = InjectionRecord {
            id: Uuid::new_v4(),
            candidate_id,
            session_id: session_id.to_string(),
            created_at: Local::now(),
            tokens_estimate: estimate_tokens(&content),
            content: content.clone(),
            accepted: true,
            injection_type: kind,
        };
        self.db.record_injection(&record)?;

        // A consumed research candidate moves its task to the injected
        // overlay state.
        if matches!(kind, InjectionType::ResearchOnly | InjectionType::Combined) {
            if let Some(candidate) = &research {
                if let Ok(task_id) = Uuid::parse_str(&candidate.id) {
                    self.db.mark_injected(&task_id)?;
                }
            }
        }

        info!(
            session_id,
            kind = kind.as_str(),
            tokens = record.tokens_estimate,
            "injection recorded"
        );
        Ok(Some(content))
    }

    /// Top-1 memory candidate and top-1 research candidate for the query.
    fn best_candidates(
        &self,
        session_id: &str,
        context: &QueryContext,
    ) -> Result<(Option<KnowledgeCandidate>, Option<KnowledgeCandidate>)> {
        let memory_pool = self
            .db
            .search_knowledge(&context.query, CANDIDATE_POOL_SIZE)?
            .iter()
            .map(|entry| self.scorer.score_memory(entry, context))
            .collect();
        let memory = self.scorer.rank(memory_pool).into_iter().next();

        let research_pool = self
            .db
            .completed_tasks(Some(session_id), CANDIDATE_POOL_SIZE)?
            .iter()
            .filter_map(|task| self.scorer.score_research(task, context))
            .collect();
        let research = self.scorer.rank(research_pool).into_iter().next();

        debug_assert!(memory
            .as_ref()
            .map(|c| c.source == KnowledgeSource::Memory)
            .unwrap_or(true));
        Ok((memory, research))
    }
}

/// Fixed type precedence over the two top candidates' scores.
pub fn determine_injection_type(
    memory_score: f64,
    research_score: f64,
    config: &InjectionConfig,
) -> Option<InjectionType> {
    if memory_score >= config.memory_only_threshold && memory_score > research_score {
        return Some(InjectionType::MemoryOnly);
    }
    if memory_score >= config.combined_threshold && research_score >= config.combined_threshold {
        return Some(InjectionType::Combined);
    }
    if research_score >= config.research_threshold {
        return Some(InjectionType::ResearchOnly);
    }
    // lenient memory-only: anything that cleared the scorer minimum
    if memory_score > 0.0 {
        return Some(InjectionType::MemoryOnly);
    }
    None
}

/// Render a candidate pair through the type's token-budgeted template.
/// Returns `None` when the required candidate is absent.
fn render(
    kind: InjectionType,
    memory: Option<&KnowledgeCandidate>,
    research: Option<&KnowledgeCandidate>,
    config: &InjectionConfig,
) -> Option<String> {
    let budget_chars = (config.token_budget(kind) as usize) * 4;
    let text = match kind {
        InjectionType::MemoryOnly => {
            let candidate = memory?;
            format!(
                "[Recalled context] {}\n{}",
                candidate.title, candidate.summary
            )
        }
        InjectionType::ResearchOnly => {
            let candidate = research?;
            let facts = if candidate.facts.is_empty() {
                String::new()
            } else {
                format!("\nSources: {}", candidate.facts.join("; "))
            };
            format!(
                "[Background research] {}\n{}{}",
                candidate.title, candidate.summary, facts
            )
        }
        InjectionType::Combined => {
            let memory = memory?;
            let research = research?;
            format!(
                "[Recalled context] {}\n{}\n\n[Background research] {}\n{}",
                memory.title, memory.summary, research.title, research.summary
            )
        }
        InjectionType::Warning => {
            let candidate = memory?;
            format!("[Heads up] {}: {}", candidate.title, candidate.summary)
        }
    };
    Some(truncate_to_budget(&text, budget_chars))
}

fn truncate_to_budget(text: &str, budget_chars: usize) -> String {
    if text.len() <= budget_chars {
        return text.to_string();
    }
    let mut end = budget_chars.saturating_sub(3);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
