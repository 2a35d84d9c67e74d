//! Evaluate phase: decide whether collected findings are sufficient, and if
//! not, what to do next.
//!
//! The cheap path comes first: when the average finding relevance already
//! clears the completion threshold (with at least two findings), the loop
//! exits complete without spending a generation call. Otherwise one
//! generation call decides completeness, confidence, optional further
//! steps, and an optional pivot. A failed call defaults to "complete" with
//! the computed average, so the loop never spins on a broken generator.

use tracing::warn;

use crate::config::ResearchConfig;
use crate::generator::{GenerationOptions, TextGenerator};
use crate::research::parse::TaggedDoc;
use crate::research::plan::PlanStep;
use crate::specialist::{Finding, SpecialistRegistry};

/// How urgently a pivot suggestion should be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotUrgency {
    Low,
    Medium,
    High,
}

impl PivotUrgency {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(PivotUrgency::Low),
            "medium" => Some(PivotUrgency::Medium),
            "high" => Some(PivotUrgency::High),
            _ => None,
        }
    }
}

/// An alternative framing of the research problem
#[derive(Debug, Clone)]
pub struct Pivot {
    pub framing: String,
    pub urgency: PivotUrgency,
}

/// Outcome of one evaluate phase
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub complete: bool,
    pub confidence: f64,
    pub next_steps: Vec<PlanStep>,
    pub pivot: Option<Pivot>,
}

/// Average relevance across findings; 0.0 for an empty set.
pub fn average_relevance(findings: &[Finding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    findings.iter().map(|f| f.relevance).sum::<f64>() / findings.len() as f64
}

fn build_evaluate_prompt(query: &str, findings: &[Finding], specialists: &[String]) -> String {
    let mut prompt = format!(
        "TASK: EVALUATE\n\
         You judge whether collected research findings answer a query.\n\
         QUERY: {}\n\nFINDINGS:\n",
        query
    );
    for finding in findings {
        prompt.push_str(&format!(
            "- [{}] {} (relevance {:.2}): {}\n",
            finding.source,
            finding.title,
            finding.relevance,
            truncate(&finding.snippet, 300)
        ));
    }
    prompt.push_str(&format!(
        "\nAvailable specialists: {}.\n\
         Respond with exactly these tagged lines:\n\
         COMPLETE: <true|false>\n\
         CONFIDENCE: <0.0-1.0>\n\
         STEP: <specialist> | <sub query> | <priority 1-10>   (only if not complete)\n\
         PIVOT: <alternative framing>   (only if the query approach looks wrong)\n\
         PIVOT_URGENCY: <low|medium|high>\n",
        specialists.join(", ")
    ));
    prompt
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn parse_evaluation(text: &str, specialists: &[String], max_steps: usize) -> Option<Evaluation> {
    let doc = TaggedDoc::parse(text);
    let complete = doc.get_bool("COMPLETE")?;
    let confidence = doc.get_unit_f64("CONFIDENCE")?;

    let mut next_steps = Vec::new();
    for raw in doc.get_all("STEP") {
        let mut parts = raw.splitn(3, '|').map(str::trim);
        let (Some(specialist), Some(sub_query)) = (parts.next(), parts.next()) else {
            continue;
        };
        let specialist = specialist.to_lowercase();
        if sub_query.is_empty() || !specialists.iter().any(|s| s == &specialist) {
            continue;
        }
        next_steps.push(PlanStep {
            specialist,
            sub_query: sub_query.to_string(),
            priority: parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .unwrap_or(5)
                .clamp(1, 10),
        });
        if next_steps.len() == max_steps {
            break;
        }
    }

    let pivot = doc.get("PIVOT").filter(|f| !f.is_empty()).map(|framing| Pivot {
        framing: framing.to_string(),
        urgency: doc
            .get("PIVOT_URGENCY")
            .and_then(PivotUrgency::parse)
            .unwrap_or(PivotUrgency::Low),
    });

    Some(Evaluation {
        complete,
        confidence,
        next_steps,
        pivot,
    })
}

/// Run one evaluate phase over everything collected so far.
pub async fn evaluate(
    generator: &dyn TextGenerator,
    registry: &SpecialistRegistry,
    config: &ResearchConfig,
    query: &str,
    findings: &[Finding],
) -> Evaluation {
    let average = average_relevance(findings);

    // Fast path: plainly sufficient findings skip the generation call.
    if findings.len() >= 2 && average >= config.completion_threshold {
        return Evaluation {
            complete: true,
            confidence: average,
            next_steps: Vec::new(),
            pivot: None,
        };
    }

    let specialists = registry.names();
    let prompt = build_evaluate_prompt(query, findings, &specialists);
    let options = GenerationOptions {
        max_tokens: config.generation_max_tokens,
        temperature: config.generation_temperature,
    };

    match generator.generate(&prompt, &options).await {
        Ok(text) => {
            if let Some(evaluation) = parse_evaluation(&text, &specialists, config.max_plan_steps)
            {
                return evaluation;
            }
            warn!(query, "evaluation output unparseable, defaulting to complete");
            default_evaluation(average)
        }
        Err(e) => {
            warn!(query, error = %e, "evaluation generation failed, defaulting to complete");
            default_evaluation(average)
        }
    }
}

/// The documented failure default: complete, confidence = computed average.
fn default_evaluation(average: f64) -> Evaluation {
    Evaluation {
        complete: true,
        confidence: average,
        next_steps: Vec::new(),
        pivot: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;
    use crate::specialist::StaticSpecialist;
    use std::sync::Arc;

    fn registry() -> SpecialistRegistry {
        let mut registry = SpecialistRegistry::new();
        registry.register(Arc::new(StaticSpecialist::single("web", "w", 0.8)));
        registry
    }

    fn finding(relevance: f64) -> Finding {
        Finding {
            title: "t".to_string(),
            url: String::new(),
            snippet: "s".to_string(),
            relevance,
            source: "web".to_string(),
        }
    }

    #[tokio::test]
    async fn fast_path_skips_generation() {
        // Unscripted generator would error if called; the fast path must not call it.
        let gen = ScriptedGenerator::new();
        let findings = vec![finding(0.9), finding(0.9)];
        let evaluation = evaluate(
            &gen,
            &registry(),
            &ResearchConfig::default(),
            "q",
            &findings,
        )
        .await;
        assert!(evaluation.complete);
        assert!((evaluation.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_finding_never_takes_fast_path() {
        let gen = ScriptedGenerator::new().respond("EVALUATE", "COMPLETE: false\nCONFIDENCE: 0.4\nSTEP: web | more | 6");
        let findings = vec![finding(0.99)];
        let evaluation = evaluate(
            &gen,
            &registry(),
            &ResearchConfig::default(),
            "q",
            &findings,
        )
        .await;
        assert!(!evaluation.complete);
        assert_eq!(evaluation.next_steps.len(), 1);
    }

    #[tokio::test]
    async fn generation_failure_defaults_to_complete() {
        let gen = ScriptedGenerator::new();
        let findings = vec![finding(0.4), finding(0.6)];
        let evaluation = evaluate(
            &gen,
            &registry(),
            &ResearchConfig::default(),
            "q",
            &findings,
        )
        .await;
        assert!(evaluation.complete);
        assert!((evaluation.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pivot_is_parsed_with_urgency() {
        let gen = ScriptedGenerator::new().respond(
            "EVALUATE",
            "COMPLETE: false\nCONFIDENCE: 0.3\n\
             PIVOT: search for connection pooling instead\nPIVOT_URGENCY: high",
        );
        let evaluation = evaluate(
            &gen,
            &registry(),
            &ResearchConfig::default(),
            "q",
            &[finding(0.3)],
        )
        .await;
        let pivot = evaluation.pivot.unwrap();
        assert_eq!(pivot.urgency, PivotUrgency::High);
        assert!(pivot.framing.contains("connection pooling"));
    }
}
