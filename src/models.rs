//! Core data model: tasks, results, sessions, injections, and knowledge
//! candidates shared across the trigger, queue, scoring, and injection
//! components.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Research effort tier controlling iteration count and result breadth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchDepth {
    Quick,
    Medium,
    Deep,
}

impl ResearchDepth {
    /// Depth preset: `(max_iterations, max_results_per_specialist)`
    pub fn preset(&self) -> (u32, usize) {
        match self {
            ResearchDepth::Quick => (1, 3),
            ResearchDepth::Medium => (1, 5),
            ResearchDepth::Deep => (2, 8),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchDepth::Quick => "quick",
            ResearchDepth::Medium => "medium",
            ResearchDepth::Deep => "deep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(ResearchDepth::Quick),
            "medium" => Some(ResearchDepth::Medium),
            "deep" => Some(ResearchDepth::Deep),
            _ => None,
        }
    }
}

/// Task lifecycle state machine: `Queued → Running → {Completed | Failed}`,
/// with `Injected` reachable only from `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Injected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Injected => "injected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "injected" => Some(TaskStatus::Injected),
            _ => None,
        }
    }

    /// Terminal states accept no further result/error writes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Injected
        )
    }
}

/// Where a research task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    UserPrompt,
    ToolOutput,
    Manual,
    Scheduled,
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOrigin::UserPrompt => "user_prompt",
            TaskOrigin::ToolOutput => "tool_output",
            TaskOrigin::Manual => "manual",
            TaskOrigin::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_prompt" => Some(TaskOrigin::UserPrompt),
            "tool_output" => Some(TaskOrigin::ToolOutput),
            "manual" => Some(TaskOrigin::Manual),
            "scheduled" => Some(TaskOrigin::Scheduled),
            _ => None,
        }
    }
}

/// A single ranked source backing a research result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Relevance 0.0-1.0 as reported by the specialist
    pub relevance: f64,
}

/// Final synthesized output of a research task. Immutable once attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Short, injection-ready summary
    pub summary: String,
    /// Complete synthesis
    pub content: String,
    pub sources: Vec<Source>,
    /// Approximate token cost of `content`
    pub tokens_estimate: u32,
    /// Overall confidence 0.0-1.0
    pub confidence: f64,
}

/// A unit of research work, owned by the task queue until dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    pub id: Uuid,
    pub query: String,
    pub context: Option<String>,
    pub depth: ResearchDepth,
    pub status: TaskStatus,
    pub origin: TaskOrigin,
    pub session_id: Option<String>,
    /// Priority 1-10, higher dequeues first
    pub priority: u8,
    pub retry_count: u32,
    pub created_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    pub error: Option<String>,
    pub result: Option<ResearchResult>,
}

/// Where the raw text handed to the trigger detector came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    UserMessage,
    /// Output from a named tool (e.g. "bash", "cargo", "webfetch")
    ToolOutput { tool: String },
}

/// Ephemeral decision produced by the trigger detector; consumed
/// immediately to decide enqueue, never persisted standalone.
#[derive(Debug, Clone)]
pub struct DetectedTrigger {
    pub should_research: bool,
    pub query: Option<String>,
    pub depth: ResearchDepth,
    pub priority: u8,
    /// Calibrated confidence 0.0-1.0; the sole gate consulted against the
    /// configured minimum before a task is enqueued.
    pub confidence: f64,
    pub reason: String,
}

impl DetectedTrigger {
    /// The fixed negative decision
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            should_research: false,
            query: None,
            depth: ResearchDepth::Quick,
            priority: 0,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// An observed assistant session with its running injection counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub last_activity: DateTime<Local>,
    pub project_path: Option<String>,
    pub injection_count: u32,
    pub tokens_injected: u32,
    pub last_injection_at: Option<DateTime<Local>>,
}

/// Rendering shape of an injection, chosen from candidate composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionType {
    MemoryOnly,
    ResearchOnly,
    Combined,
    Warning,
}

impl InjectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionType::MemoryOnly => "memory-only",
            InjectionType::ResearchOnly => "research-only",
            InjectionType::Combined => "combined",
            InjectionType::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memory-only" => Some(InjectionType::MemoryOnly),
            "research-only" => Some(InjectionType::ResearchOnly),
            "combined" => Some(InjectionType::Combined),
            "warning" => Some(InjectionType::Warning),
            _ => None,
        }
    }
}

/// Append-only audit record of content surfaced into a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionRecord {
    pub id: Uuid,
    /// Task id or synthetic candidate id the content originated from
    pub candidate_id: String,
    pub session_id: String,
    pub created_at: DateTime<Local>,
    pub content: String,
    pub tokens_estimate: u32,
    pub accepted: bool,
    pub injection_type: InjectionType,
}

/// Which knowledge pool a candidate was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSource {
    /// Previously stored findings
    Memory,
    /// Freshly completed research
    Research,
}

/// Category tag for stored knowledge, used by the type-match factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeCategory {
    Discovery,
    Decision,
    Bugfix,
    Pattern,
    Change,
}

impl KnowledgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeCategory::Discovery => "discovery",
            KnowledgeCategory::Decision => "decision",
            KnowledgeCategory::Bugfix => "bugfix",
            KnowledgeCategory::Pattern => "pattern",
            KnowledgeCategory::Change => "change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(KnowledgeCategory::Discovery),
            "decision" => Some(KnowledgeCategory::Decision),
            "bugfix" => Some(KnowledgeCategory::Bugfix),
            "pattern" => Some(KnowledgeCategory::Pattern),
            "change" => Some(KnowledgeCategory::Change),
            _ => None,
        }
    }
}

/// Per-factor relevance scores, each 0.0-1.0
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceVector {
    pub text_similarity: f64,
    pub recency: f64,
    pub project_match: f64,
    pub type_match: f64,
    pub confidence: f64,
}

/// A scored piece of knowledge eligible for injection. Ephemeral,
/// recomputed per query.
#[derive(Debug, Clone)]
pub struct KnowledgeCandidate {
    pub id: String,
    pub source: KnowledgeSource,
    pub title: String,
    pub summary: String,
    pub detail: Option<String>,
    pub facts: Vec<String>,
    pub category: KnowledgeCategory,
    pub relevance: RelevanceVector,
    /// Weighted sum of the relevance vector
    pub final_score: f64,
}

/// A persisted knowledge entry (the durable side of the memory pool)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub project_path: Option<String>,
    pub category: KnowledgeCategory,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub confidence: f64,
    pub created_at: DateTime<Local>,
}

/// Rough token estimate used everywhere a budget is enforced.
///
/// Four characters per token is the usual heuristic for English prose;
/// budgets here are ceilings, so overestimating slightly is fine.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_presets() {
        assert_eq!(ResearchDepth::Quick.preset(), (1, 3));
        assert_eq!(ResearchDepth::Medium.preset(), (1, 5));
        assert_eq!(ResearchDepth::Deep.preset(), (2, 8));
    }

    #[test]
    fn status_roundtrip_and_terminality() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Injected,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
