//! Synthesize phase: fold all collected findings into a final
//! [`ResearchResult`].
//!
//! Input to the generation call is bounded per specialist and per finding so
//! a chatty connector cannot blow up the prompt. A failed or unparseable
//! call synthesizes deterministically by concatenating the top-ranked raw
//! findings; an empty finding set short-circuits to the fixed
//! "nothing found" result without any generation call.

use std::collections::BTreeMap;
use tracing::warn;

use crate::config::ResearchConfig;
use crate::generator::{GenerationOptions, TextGenerator};
use crate::models::{estimate_tokens, ResearchResult, Source};
use crate::research::parse::TaggedDoc;
use crate::specialist::Finding;

/// Max findings forwarded to the generator per specialist
const MAX_FINDINGS_PER_SPECIALIST: usize = 5;
/// Max snippet characters forwarded per finding
const MAX_SNIPPET_CHARS: usize = 400;
/// Findings used by the deterministic fallback synthesis
const FALLBACK_TOP_N: usize = 3;

/// The fixed result for an empty finding set
pub fn nothing_found(query: &str) -> ResearchResult {
    let content = format!("No findings were collected for: {}", query);
    ResearchResult {
        summary: "No relevant findings".to_string(),
        tokens_estimate: estimate_tokens(&content),
        content,
        sources: Vec::new(),
        confidence: 0.0,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Bound findings to the per-specialist cap, keeping the most relevant.
fn bounded(findings: &[Finding]) -> Vec<&Finding> {
    let mut by_specialist: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        by_specialist
            .entry(finding.source.as_str())
            .or_default()
            .push(finding);
    }
    let mut kept = Vec::new();
    for (_, mut group) in by_specialist {
        group.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        kept.extend(group.into_iter().take(MAX_FINDINGS_PER_SPECIALIST));
    }
    kept
}

fn build_synthesis_prompt(query: &str, findings: &[&Finding]) -> String {
    let mut prompt = format!(
        "TASK: SYNTHESIZE\n\
         You write a compact research synthesis for a coding assistant.\n\
         QUERY: {}\n\nFINDINGS:\n",
        query
    );
    for finding in findings {
        prompt.push_str(&format!(
            "- [{}] {} ({}): {}\n",
            finding.source,
            finding.title,
            finding.url,
            truncate(&finding.snippet, MAX_SNIPPET_CHARS)
        ));
    }
    prompt.push_str(
        "\nRespond with exactly these tagged lines:\n\
         SUMMARY: <two sentences max, injection-ready>\n\
         FINDING: <one key finding>   (repeat, 3 lines max, most important first)\n\
         CONFIDENCE: <0.0-1.0>\n",
    );
    prompt
}

fn sources_from(findings: &[&Finding]) -> Vec<Source> {
    findings
        .iter()
        .map(|f| Source {
            title: f.title.clone(),
            url: f.url.clone(),
            snippet: truncate(&f.snippet, MAX_SNIPPET_CHARS).to_string(),
            relevance: f.relevance,
        })
        .collect()
}

/// Deterministic fallback: concatenate the top-ranked findings.
fn fallback_synthesis(query: &str, findings: &[&Finding]) -> ResearchResult {
    let mut ranked: Vec<&&Finding> = findings.iter().collect();
    ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    let top: Vec<&&Finding> = ranked.into_iter().take(FALLBACK_TOP_N).collect();

    let summary = top
        .first()
        .map(|f| format!("{}: {}", f.title, truncate(&f.snippet, 160)))
        .unwrap_or_else(|| format!("Findings collected for: {}", query));

    let mut content = format!("Research findings for: {}\n", query);
    for finding in &top {
        content.push_str(&format!(
            "\n## {} [{}]\n{}\n",
            finding.title,
            finding.source,
            truncate(&finding.snippet, MAX_SNIPPET_CHARS)
        ));
    }

    let average = findings.iter().map(|f| f.relevance).sum::<f64>() / findings.len() as f64;

    ResearchResult {
        summary,
        tokens_estimate: estimate_tokens(&content),
        content,
        sources: sources_from(findings),
        confidence: average,
    }
}

/// Produce the final result. Infallible by contract.
pub async fn synthesize(
    generator: &dyn TextGenerator,
    config: &ResearchConfig,
    query: &str,
    findings: &[Finding],
    loop_confidence: f64,
) -> ResearchResult {
    if findings.is_empty() {
        return nothing_found(query);
    }

    let kept = bounded(findings);
    let prompt = build_synthesis_prompt(query, &kept);
    let options = GenerationOptions {
        max_tokens: config.generation_max_tokens,
        temperature: config.generation_temperature,
    };

    let text = match generator.generate(&prompt, &options).await {
        Ok(text) => text,
        Err(e) => {
            warn!(query, error = %e, "synthesis generation failed, using deterministic fallback");
            return fallback_synthesis(query, &kept);
        }
    };

    let doc = TaggedDoc::parse(&text);
    let Some(summary) = doc.get("SUMMARY").filter(|s| !s.is_empty()) else {
        warn!(query, "synthesis output missing SUMMARY, using deterministic fallback");
        return fallback_synthesis(query, &kept);
    };

    let key_findings = doc.get_all("FINDING");
    let mut content = format!("{}\n", summary);
    for (i, finding) in key_findings.iter().take(3).enumerate() {
        content.push_str(&format!("{}. {}\n", i + 1, finding));
    }

    let confidence = doc
        .get_unit_f64("CONFIDENCE")
        .unwrap_or(loop_confidence.clamp(0.0, 1.0));

    ResearchResult {
        summary: summary.to_string(),
        tokens_estimate: estimate_tokens(&content),
        content,
        sources: sources_from(&kept),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;

    fn finding(title: &str, relevance: f64) -> Finding {
        Finding {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            snippet: format!("snippet about {}", title),
            relevance,
            source: "web".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_findings_short_circuit() {
        // Generation must not be consulted at all.
        let gen = ScriptedGenerator::new();
        let result = synthesize(&gen, &ResearchConfig::default(), "q", &[], 0.8).await;
        assert_eq!(result.confidence, 0.0);
        assert!(result.sources.is_empty());
        assert_eq!(result.summary, "No relevant findings");
    }

    #[tokio::test]
    async fn parses_tagged_synthesis() {
        let gen = ScriptedGenerator::new().respond(
            "SYNTHESIZE",
            "SUMMARY: Rate limiting bounds request frequency.\n\
             FINDING: token bucket is the common algorithm\n\
             FINDING: backpressure differs from rate limiting\n\
             CONFIDENCE: 0.85",
        );
        let findings = vec![finding("rl", 0.8)];
        let result = synthesize(&gen, &ResearchConfig::default(), "rate limiting", &findings, 0.5)
            .await;

        assert!(result.summary.starts_with("Rate limiting bounds"));
        assert!(result.content.contains("1. token bucket"));
        assert!((result.confidence - 0.85).abs() < 1e-9);
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn failure_falls_back_to_concatenation() {
        let gen = ScriptedGenerator::new();
        let findings = vec![finding("a", 0.9), finding("b", 0.5)];
        let result = synthesize(&gen, &ResearchConfig::default(), "q", &findings, 0.6).await;

        assert!(!result.summary.is_empty());
        assert!(result.content.contains("## a"));
        assert!((result.confidence - 0.7).abs() < 1e-9);
        assert_eq!(result.sources.len(), 2);
    }

    #[tokio::test]
    async fn per_specialist_bounding_keeps_most_relevant() {
        let mut findings: Vec<Finding> = (0..10)
            .map(|i| finding(&format!("f{}", i), i as f64 / 10.0))
            .collect();
        findings.push(Finding {
            source: "docs".to_string(),
            ..finding("from-docs", 0.9)
        });

        let kept = bounded(&findings);
        // 5 from web (the most relevant ones) + 1 from docs
        assert_eq!(kept.len(), 6);
        assert!(kept.iter().any(|f| f.title == "from-docs"));
        assert!(kept.iter().any(|f| f.title == "f9"));
        assert!(!kept.iter().any(|f| f.title == "f0"));
    }
}
