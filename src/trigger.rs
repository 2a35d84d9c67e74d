//! Trigger detection: deciding from raw text whether research is worth
//! queueing, and with what query, depth, priority, and confidence.
//!
//! [`TriggerDetector::detect`] is a pure function over an ordered rule set.
//! The stateful companions live alongside it: [`ErrorDedup`] stops the same
//! tool error retriggering within a session, and [`SpeculativeTrigger`] is
//! the probabilistic heuristic for repeated tool-search patterns, backed by
//! an explicitly seeded random source so tests stay deterministic.
//! [`TriggerPipeline`] bundles all three behind the configured knobs; it is
//! the intake the hosting application feeds session traffic through.

use regex::Regex;

use crate::config::TriggerConfig;
use crate::models::{DetectedTrigger, ResearchDepth, SourceKind};
use std::collections::{HashMap, HashSet};

/// Maximum length of an extracted query
const MAX_QUERY_LEN: usize = 240;

/// Leading filler phrases stripped during query normalization
const FILLER_PREFIXES: &[&str] = &[
    "i wonder",
    "i am wondering",
    "i'm wondering",
    "do you know",
    "can you tell me",
    "could you tell me",
    "please explain",
    "tell me",
    "quick question:",
    "question:",
];

struct PositiveRule {
    pattern: Regex,
    weight: f64,
    depth: ResearchDepth,
    priority: u8,
    label: &'static str,
}

struct ToolRule {
    /// Producing tools this rule applies to; empty means any tool
    tools: &'static [&'static str],
    pattern: Regex,
    weight: f64,
    depth: ResearchDepth,
    label: &'static str,
}

fn rx(pattern: &str) -> Regex {
    // All patterns are static literals checked by the rule-table tests.
    Regex::new(pattern).expect("static trigger pattern")
}

/// Pattern-based research trigger detector. Pure: no side effects, no I/O.
pub struct TriggerDetector {
    min_length: usize,
    negative: Vec<Regex>,
    positive: Vec<PositiveRule>,
    tool_rules: Vec<ToolRule>,
}

impl Default for TriggerDetector {
    fn default() -> Self {
        Self::new(12)
    }
}

impl TriggerDetector {
    pub fn new(min_length: usize) -> Self {
        // Negative rules run FIRST on user text: acknowledgements and
        // imperative commands must not trigger even when they echo
        // question-like phrasing.
        let negative = vec![
            rx(r"(?i)^\s*(thanks|thank you|thx|ty)\b"),
            rx(r"(?i)\b(that worked|works now|all good|perfect|looks good|lgtm)\b"),
            rx(r"(?i)^\s*(ok|okay|yes|no|yep|nope|sure|got it|sounds good)\b"),
            rx(r"(?i)^\s*(run|execute|install|build|start|stop|restart|open|close)\b"),
            rx(r"(?i)^\s*(commit|push|pull|merge|rebase|checkout|stash|deploy|release)\b"),
            rx(r"(?i)^\s*(add|remove|delete|rename|move|create|update|fix|change|refactor)\s"),
        ];

        // Positive rules in declaration order; highest weight wins, ties go
        // to the earlier rule.
        let positive = vec![
            PositiveRule {
                pattern: rx(r"(?i)\bbest (way|practice|practices|approach) (to|for|of)\b"),
                weight: 0.9,
                depth: ResearchDepth::Medium,
                priority: 7,
                label: "best-practice question",
            },
            PositiveRule {
                pattern: rx(r"(?i)\bhow (do|does|can|should|would) (i|you|we|it|one)\b"),
                weight: 0.85,
                depth: ResearchDepth::Medium,
                priority: 6,
                label: "how-to question",
            },
            PositiveRule {
                pattern: rx(r"(?i)\b(difference between|compared? (to|with)|\bvs\.?\b|versus)\b"),
                weight: 0.85,
                depth: ResearchDepth::Medium,
                priority: 6,
                label: "comparison question",
            },
            PositiveRule {
                pattern: rx(r"(?i)\bwhich (library|crate|framework|tool|database|approach)\b"),
                weight: 0.85,
                depth: ResearchDepth::Deep,
                priority: 7,
                label: "technology choice",
            },
            PositiveRule {
                pattern: rx(r"(?i)\bwhat('s| is| are| was| does)\b"),
                weight: 0.8,
                depth: ResearchDepth::Quick,
                priority: 5,
                label: "definition question",
            },
            PositiveRule {
                pattern: rx(r"(?i)\bwhy (is|are|does|do|did|am|was|were|won't|doesn't|isn't)\b"),
                weight: 0.75,
                depth: ResearchDepth::Medium,
                priority: 6,
                label: "why question",
            },
            PositiveRule {
                pattern: rx(
                    r"(?i)\b(can't figure out|cannot figure out|not working|keeps? failing|no idea why)\b",
                ),
                weight: 0.75,
                depth: ResearchDepth::Medium,
                priority: 7,
                label: "stuck signal",
            },
            PositiveRule {
                pattern: rx(r"(?i)\bis there (a|any|some) (way|crate|library|tool)\b"),
                weight: 0.7,
                depth: ResearchDepth::Quick,
                priority: 5,
                label: "existence question",
            },
        ];

        // Tool-output rules keyed by the producing tool.
        let tool_rules = vec![
            ToolRule {
                tools: &[],
                pattern: rx(r"(?m)(panicked at|^thread '.*' panicked|stack backtrace:)"),
                weight: 0.85,
                depth: ResearchDepth::Medium,
                label: "panic in tool output",
            },
            ToolRule {
                tools: &["cargo", "rustc"],
                pattern: rx(r"\berror\[E\d{4}\]"),
                weight: 0.8,
                depth: ResearchDepth::Quick,
                label: "compiler error code",
            },
            ToolRule {
                tools: &[],
                pattern: rx(r"(?m)^\s+at .+:\d+|Traceback \(most recent call last\)"),
                weight: 0.8,
                depth: ResearchDepth::Medium,
                label: "stack trace",
            },
            ToolRule {
                tools: &[],
                pattern: rx(r"\b(ENOENT|EACCES|ECONNREFUSED|EADDRINUSE|ETIMEDOUT)\b"),
                weight: 0.75,
                depth: ResearchDepth::Quick,
                label: "errno code",
            },
            ToolRule {
                tools: &["webfetch", "curl", "http"],
                pattern: rx(r"\b(5\d{2}) (Internal Server Error|Bad Gateway|Service Unavailable|Gateway Timeout)\b"),
                weight: 0.7,
                depth: ResearchDepth::Quick,
                label: "http 5xx",
            },
            ToolRule {
                tools: &[],
                pattern: rx(r"(?i)\bdeprecat(ed|ion)\b"),
                weight: 0.65,
                depth: ResearchDepth::Quick,
                label: "deprecation notice",
            },
        ];

        Self {
            min_length,
            negative,
            positive,
            tool_rules,
        }
    }

    /// Classify raw text into a bounded research decision.
    pub fn detect(&self, text: &str, source: &SourceKind) -> DetectedTrigger {
        let trimmed = text.trim();
        if trimmed.len() < self.min_length {
            return DetectedTrigger::none("below minimum length");
        }

        match source {
            SourceKind::UserMessage => self.detect_user(trimmed),
            SourceKind::ToolOutput { tool } => self.detect_tool(trimmed, tool),
        }
    }

    fn detect_user(&self, text: &str) -> DetectedTrigger {
        for rule in &self.negative {
            if rule.is_match(text) {
                return DetectedTrigger::none("negative pattern matched");
            }
        }

        // Highest weight wins; strictly-greater keeps declaration order on ties.
        let mut best: Option<&PositiveRule> = None;
        for rule in &self.positive {
            if rule.pattern.is_match(text) && best.map_or(true, |b| rule.weight > b.weight) {
                best = Some(rule);
            }
        }

        if let Some(rule) = best {
            return DetectedTrigger {
                should_research: true,
                query: Some(normalize_query(text)),
                depth: rule.depth,
                priority: rule.priority,
                confidence: rule.weight,
                reason: rule.label.to_string(),
            };
        }

        // Question-mark fallback: a low-confidence generic trigger.
        if text.contains('?') {
            return DetectedTrigger {
                should_research: true,
                query: Some(normalize_query(text)),
                depth: ResearchDepth::Quick,
                priority: 4,
                confidence: 0.5,
                reason: "question mark fallback".to_string(),
            };
        }

        DetectedTrigger::none("no signal")
    }

    fn detect_tool(&self, text: &str, tool: &str) -> DetectedTrigger {
        for rule in &self.tool_rules {
            let applies = rule.tools.is_empty() || rule.tools.contains(&tool);
            if applies && rule.pattern.is_match(text) {
                let query = rule
                    .pattern
                    .find(text)
                    .map(|m| error_context_query(text, m.start()))
                    .unwrap_or_else(|| normalize_query(text));
                return DetectedTrigger {
                    should_research: true,
                    query: Some(query),
                    depth: rule.depth,
                    priority: 6,
                    confidence: rule.weight,
                    reason: rule.label.to_string(),
                };
            }
        }
        DetectedTrigger::none("no tool-output signal")
    }
}

/// Normalize an extracted query: strip quotes, drop leading filler phrases,
/// collapse whitespace, cap length.
pub fn normalize_query(text: &str) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|c| *c != '"' && *c != '\u{2018}' && *c != '\u{2019}' && *c != '`')
        .collect();

    let lowered = cleaned.to_lowercase();
    for filler in FILLER_PREFIXES {
        if lowered.starts_with(filler) {
            cleaned = cleaned[filler.len()..].to_string();
            break;
        }
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches([',', ':', ' ']).to_string();

    if trimmed.len() > MAX_QUERY_LEN {
        let mut end = MAX_QUERY_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        trimmed[..end].to_string()
    } else {
        trimmed
    }
}

/// Build a query from the line containing an error match, which carries the
/// most searchable signal in a long tool dump.
fn error_context_query(text: &str, match_start: usize) -> String {
    let line_start = text[..match_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[match_start..]
        .find('\n')
        .map(|i| match_start + i)
        .unwrap_or(text.len());
    normalize_query(&text[line_start..line_end])
}

/// Per-session dedup of matched tool errors: the same error signature never
/// retriggers within one session.
///
/// Known limitation carried from the original behavior: dedup is by
/// substring signature, so the same error reworded bypasses it.
#[derive(Default)]
pub struct ErrorDedup {
    seen: HashMap<String, HashSet<String>>,
}

impl ErrorDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error for the session; returns true when it was already
    /// seen there.
    pub fn is_duplicate(&mut self, session_id: &str, error_text: &str) -> bool {
        let signature = error_signature(error_text);
        !self
            .seen
            .entry(session_id.to_string())
            .or_default()
            .insert(signature)
    }

    pub fn forget_session(&mut self, session_id: &str) {
        self.seen.remove(session_id);
    }
}

fn error_signature(error_text: &str) -> String {
    let first_line = error_text.lines().next().unwrap_or("").trim().to_lowercase();
    let mut end = first_line.len().min(120);
    while !first_line.is_char_boundary(end) {
        end -= 1;
    }
    first_line[..end].to_string()
}

/// SplitMix64: tiny seeded generator for the speculative-trigger chance.
/// Deterministic per seed, which is all the heuristic needs.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Probabilistic trigger for speculative research when the assistant keeps
/// searching for the same thing. Fires with the configured chance per
/// observation; seeded explicitly so tests can pin the sequence.
pub struct SpeculativeTrigger {
    chance: f64,
    rng: SplitMix64,
}

impl SpeculativeTrigger {
    pub fn new(chance: f64, seed: u64) -> Self {
        Self {
            chance,
            rng: SplitMix64::new(seed),
        }
    }

    pub fn should_fire(&mut self) -> bool {
        self.rng.next_f64() < self.chance
    }
}

/// Tools whose output counts as a search pattern for speculative research
const SEARCH_TOOLS: &[&str] = &["grep", "rg", "glob", "search", "websearch"];

/// Stateful intake over the pure detector, built from [`TriggerConfig`]:
/// duplicate tool errors are swallowed per session, and tool searches that
/// carry no hard signal occasionally earn speculative research.
pub struct TriggerPipeline {
    detector: TriggerDetector,
    dedup: ErrorDedup,
    speculative: SpeculativeTrigger,
}

impl TriggerPipeline {
    pub fn new(config: &TriggerConfig, seed: u64) -> Self {
        Self {
            detector: TriggerDetector::new(config.min_length),
            dedup: ErrorDedup::new(),
            speculative: SpeculativeTrigger::new(config.speculative_chance, seed),
        }
    }

    /// Classify one observation for a session. A repeated tool error within
    /// the session comes back negative even when its rule still matches.
    pub fn assess(
        &mut self,
        session_id: &str,
        text: &str,
        source: &SourceKind,
    ) -> DetectedTrigger {
        let trigger = self.detector.detect(text, source);

        if trigger.should_research {
            if matches!(source, SourceKind::ToolOutput { .. })
                && self.dedup.is_duplicate(session_id, text)
            {
                return DetectedTrigger::none("duplicate error this session");
            }
            return trigger;
        }

        if let SourceKind::ToolOutput { tool } = source {
            if SEARCH_TOOLS.contains(&tool.as_str())
                && text.trim().len() >= self.detector.min_length
                && self.speculative.should_fire()
            {
                return DetectedTrigger {
                    should_research: true,
                    query: Some(normalize_query(text)),
                    depth: ResearchDepth::Quick,
                    priority: 3,
                    confidence: 0.7,
                    reason: "speculative search pattern".to_string(),
                };
            }
        }
        trigger
    }

    /// Drop the session's dedup state, typically on session end.
    pub fn end_session(&mut self, session_id: &str) {
        self.dedup.forget_session(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> TriggerDetector {
        TriggerDetector::new(12)
    }

    fn user(text: &str) -> DetectedTrigger {
        detector().detect(text, &SourceKind::UserMessage)
    }

    #[test]
    fn short_input_never_triggers() {
        for text in ["", "hi", "what?", "why is it"] {
            let trigger = user(text);
            assert!(!trigger.should_research, "{:?} should not trigger", text);
            assert_eq!(trigger.confidence, 0.0);
        }
    }

    #[test]
    fn negative_patterns_win_over_question_marks() {
        let trigger = user("thanks, that worked! wasn't that easy?");
        assert!(!trigger.should_research);
        assert_eq!(trigger.confidence, 0.0);

        let trigger = user("run the tests again, why not?");
        assert!(!trigger.should_research);
    }

    #[test]
    fn highest_weight_rule_wins() {
        // matches both "how do i" (0.85) and "what is" fallback family
        let trigger = user("how do I pick the best way to shard this database?");
        assert!(trigger.should_research);
        assert_eq!(trigger.reason, "best-practice question");
        assert!((trigger.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn question_mark_fallback_is_low_confidence() {
        let trigger = user("tokio select across many channels?");
        assert!(trigger.should_research);
        assert!((trigger.confidence - 0.5).abs() < 1e-9);
        assert_eq!(trigger.depth, ResearchDepth::Quick);
    }

    #[test]
    fn no_signal_no_research() {
        let trigger = user("the deployment pipeline finished without issues today");
        assert!(!trigger.should_research);
        assert_eq!(trigger.confidence, 0.0);
    }

    #[test]
    fn query_normalization() {
        assert_eq!(
            normalize_query("do you know   what \"tokio\" is?"),
            "what tokio is?"
        );
        let long = "x".repeat(500);
        assert_eq!(normalize_query(&long).len(), MAX_QUERY_LEN);
    }

    #[test]
    fn tool_output_detects_compiler_errors() {
        let output = "error[E0308]: mismatched types\n --> src/main.rs:4:5";
        let trigger = detector().detect(
            output,
            &SourceKind::ToolOutput {
                tool: "cargo".to_string(),
            },
        );
        assert!(trigger.should_research);
        assert_eq!(trigger.reason, "compiler error code");
        assert!(trigger.query.unwrap().contains("E0308"));
    }

    #[test]
    fn tool_scoped_rules_ignore_other_tools() {
        let output = "error[E0308]: mismatched types";
        let trigger = detector().detect(
            output,
            &SourceKind::ToolOutput {
                tool: "bash".to_string(),
            },
        );
        assert!(!trigger.should_research);
    }

    #[test]
    fn error_dedup_per_session() {
        let mut dedup = ErrorDedup::new();
        let error = "error[E0308]: mismatched types";
        assert!(!dedup.is_duplicate("s1", error));
        assert!(dedup.is_duplicate("s1", error));
        // different session is independent
        assert!(!dedup.is_duplicate("s2", error));
    }

    #[test]
    fn pipeline_swallows_repeated_tool_errors() {
        let mut pipeline = TriggerPipeline::new(&TriggerConfig::default(), 1);
        let source = SourceKind::ToolOutput {
            tool: "cargo".to_string(),
        };
        let error = "error[E0308]: mismatched types";

        assert!(pipeline.assess("s1", error, &source).should_research);
        assert!(!pipeline.assess("s1", error, &source).should_research);
        // another session still triggers
        assert!(pipeline.assess("s2", error, &source).should_research);
    }

    #[test]
    fn ending_a_session_resets_its_dedup() {
        let mut pipeline = TriggerPipeline::new(&TriggerConfig::default(), 1);
        let source = SourceKind::ToolOutput {
            tool: "cargo".to_string(),
        };
        let error = "error[E0308]: mismatched types";

        assert!(pipeline.assess("s1", error, &source).should_research);
        assert!(!pipeline.assess("s1", error, &source).should_research);

        pipeline.end_session("s1");
        assert!(pipeline.assess("s1", error, &source).should_research);
    }

    #[test]
    fn speculative_path_is_scoped_to_search_tools() {
        let config = TriggerConfig {
            speculative_chance: 1.0,
            ..TriggerConfig::default()
        };
        let output = "src/pool.rs:42: fn connect_timeout(&self)";

        let mut pipeline = TriggerPipeline::new(&config, 1);
        let fired = pipeline.assess(
            "s1",
            output,
            &SourceKind::ToolOutput {
                tool: "grep".to_string(),
            },
        );
        assert!(fired.should_research);
        assert_eq!(fired.reason, "speculative search pattern");
        assert_eq!(fired.depth, ResearchDepth::Quick);

        // same output from a non-search tool carries no signal
        let quiet = pipeline.assess(
            "s1",
            output,
            &SourceKind::ToolOutput {
                tool: "bash".to_string(),
            },
        );
        assert!(!quiet.should_research);

        // a zero chance never fires
        let mut pipeline = TriggerPipeline::new(
            &TriggerConfig {
                speculative_chance: 0.0,
                ..TriggerConfig::default()
            },
            1,
        );
        let never = pipeline.assess(
            "s1",
            output,
            &SourceKind::ToolOutput {
                tool: "grep".to_string(),
            },
        );
        assert!(!never.should_research);
    }

    #[test]
    fn speculative_trigger_is_deterministic_per_seed() {
        let collect = |seed: u64| -> Vec<bool> {
            let mut trigger = SpeculativeTrigger::new(0.3, seed);
            (0..32).map(|_| trigger.should_fire()).collect()
        };
        assert_eq!(collect(42), collect(42));

        // roughly 30% over a longer run
        let mut trigger = SpeculativeTrigger::new(0.3, 7);
        let fired = (0..10_000).filter(|_| trigger.should_fire()).count();
        assert!((2_500..3_500).contains(&fired), "fired {}", fired);
    }
}
