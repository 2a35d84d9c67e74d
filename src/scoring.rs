//! Unified relevance scoring over memory and fresh-research knowledge.
//!
//! `final_score = Σ weight_i × factor_i` over five factors, each 0.0-1.0.
//! Weights are a named, overridable configuration validated to sum to 1.

use chrono::{DateTime, Local};
use regex::Regex;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::error::{Error, Result};
use crate::models::{
    KnowledgeCandidate, KnowledgeCategory, KnowledgeEntry, KnowledgeSource, RelevanceVector,
    ResearchTask,
};

/// Query facts the scorer needs beyond the query text itself
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub query: String,
    pub project_path: Option<String>,
}

impl QueryContext {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            project_path: None,
        }
    }

    pub fn with_project(mut self, project_path: &str) -> Self {
        self.project_path = Some(project_path.to_string());
        self
    }
}

/// Weighted multi-factor scorer. Construct once, share freely.
pub struct KnowledgeScorer {
    config: ScoringConfig,
    error_flavor: Regex,
    rationale_flavor: Regex,
}

impl KnowledgeScorer {
    /// Build a scorer, validating that the five weights sum to 1.0.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        let sum = config.text_similarity_weight
            + config.recency_weight
            + config.project_match_weight
            + config.type_match_weight
            + config.confidence_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidWeights(format!(
                "weights sum to {}, expected 1.0",
                sum
            )));
        }
        Ok(Self {
            config,
            error_flavor: Regex::new(r"(?i)\b(error|fail(ed|ing|s)?|panic|crash|broken|bug|fix)\b")
                .expect("static pattern"),
            rationale_flavor: Regex::new(r"(?i)\b(why|how|should|best|choose|decide|design)\b")
                .expect("static pattern"),
        })
    }

    pub fn min_relevance(&self) -> f64 {
        self.config.min_relevance
    }

    /// Weighted sum of a relevance vector
    pub fn final_score(&self, vector: &RelevanceVector) -> f64 {
        self.config.text_similarity_weight * vector.text_similarity
            + self.config.recency_weight * vector.recency
            + self.config.project_match_weight * vector.project_match
            + self.config.type_match_weight * vector.type_match
            + self.config.confidence_weight * vector.confidence
    }

    /// Score a stored knowledge entry as a memory-sourced candidate.
    pub fn score_memory(&self, entry: &KnowledgeEntry, context: &QueryContext) -> KnowledgeCandidate {
        let candidate_text = format!("{} {}", entry.title, entry.summary);
        let vector = RelevanceVector {
            text_similarity: text_similarity(&context.query, &candidate_text),
            recency: self.recency_factor(entry.created_at),
            project_match: project_match_factor(
                context.project_path.as_deref(),
                entry.project_path.as_deref(),
            ),
            type_match: self.type_match_factor(&context.query, entry.category),
            confidence: entry.confidence.clamp(0.0, 1.0),
        };
        KnowledgeCandidate {
            id: entry.id.to_string(),
            source: KnowledgeSource::Memory,
            title: entry.title.clone(),
            summary: entry.summary.clone(),
            detail: Some(entry.content.clone()),
            facts: Vec::new(),
            category: entry.category,
            final_score: self.final_score(&vector),
            relevance: vector,
        }
    }

    /// Score a freshly completed research task as a research-sourced
    /// candidate. Tasks without a result score nothing and return None.
    pub fn score_research(
        &self,
        task: &ResearchTask,
        context: &QueryContext,
    ) -> Option<KnowledgeCandidate> {
        let result = task.result.as_ref()?;
        let candidate_text = format!("{} {}", task.query, result.summary);
        let vector = RelevanceVector {
            text_similarity: text_similarity(&context.query, &candidate_text),
            recency: self.recency_factor(task.completed_at.unwrap_or(task.created_at)),
            // fresh research was produced for this very session's context
            project_match: 1.0,
            type_match: self.type_match_factor(&context.query, KnowledgeCategory::Discovery),
            confidence: result.confidence.clamp(0.0, 1.0),
        };
        Some(KnowledgeCandidate {
            id: task.id.to_string(),
            source: KnowledgeSource::Research,
            title: task.query.clone(),
            summary: result.summary.clone(),
            detail: Some(result.content.clone()),
            facts: result.sources.iter().map(|s| s.title.clone()).collect(),
            category: KnowledgeCategory::Discovery,
            final_score: self.final_score(&vector),
            relevance: vector,
        })
    }

    /// Keep only candidates at or above the configured minimum, best first.
    pub fn rank(&self, mut candidates: Vec<KnowledgeCandidate>) -> Vec<KnowledgeCandidate> {
        candidates.retain(|c| c.final_score >= self.config.min_relevance);
        candidates.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        candidates
    }

    /// Exponential decay: today ≈ 1.0, smoothly decreasing with age. No
    /// hard cliffs.
    fn recency_factor(&self, created_at: DateTime<Local>) -> f64 {
        let age_days = (Local::now() - created_at).num_seconds().max(0) as f64 / 86_400.0;
        (-age_days / self.config.half_life_days).exp()
    }

    /// Fixed per-category base plus a contextual boost when the query flavor
    /// aligns with the category (error-flavored queries boost bugfixes,
    /// how/why queries boost decisions and patterns). Capped at 1.0.
    fn type_match_factor(&self, query: &str, category: KnowledgeCategory) -> f64 {
        let base: f64 = match category {
            KnowledgeCategory::Discovery => 0.9,
            KnowledgeCategory::Decision => 0.8,
            KnowledgeCategory::Bugfix => 0.7,
            KnowledgeCategory::Pattern => 0.6,
            KnowledgeCategory::Change => 0.4,
        };
        let boost = match category {
            KnowledgeCategory::Bugfix if self.error_flavor.is_match(query) => 0.1,
            KnowledgeCategory::Decision | KnowledgeCategory::Pattern
                if self.rationale_flavor.is_match(query) =>
            {
                0.1
            }
            _ => 0.0,
        };
        (base + boost).min(1.0)
    }
}

/// Jaccard overlap over lowercased word sets. The FTS index pre-filters by
/// keyword; this factor re-ranks what survived.
pub fn text_similarity(query: &str, candidate: &str) -> f64 {
    let a = token_set(query);
    let b = token_set(candidate);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

fn token_set(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// 1.0 on an exact project match, 0.5 otherwise. Never 0: cross-project
/// knowledge stays eligible, just discounted.
fn project_match_factor(query_project: Option<&str>, candidate_project: Option<&str>) -> f64 {
    match (query_project, candidate_project) {
        (Some(a), Some(b)) if a == b => 1.0,
        _ => 0.5,
    }
}

/// Convert a completed task's result into a durable knowledge entry.
pub fn knowledge_from_task(task: &ResearchTask) -> Option<KnowledgeEntry> {
    let result = task.result.as_ref()?;
    Some(KnowledgeEntry {
        id: Uuid::new_v4(),
        task_id: Some(task.id),
        session_id: task.session_id.clone(),
        project_path: None,
        category: KnowledgeCategory::Discovery,
        title: task.query.clone(),
        summary: result.summary.clone(),
        content: result.content.clone(),
        confidence: result.confidence,
        created_at: task.completed_at.unwrap_or_else(Local::now),
    })
}
