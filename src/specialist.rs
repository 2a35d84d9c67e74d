//! Specialist collaborator boundary.
//!
//! A specialist performs one category of external search (web, code hosts,
//! docs, community forums, academic sources) and returns ranked findings.
//! Implementations absorb their own failures: `search` returns an empty
//! list rather than erroring, so one broken connector never aborts a
//! research loop.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A single ranked result from a specialist
#[derive(Debug, Clone)]
pub struct Finding {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Relevance 0.0-1.0
    pub relevance: f64,
    /// Name of the specialist that produced it
    pub source: String,
}

/// An external search collaborator.
#[async_trait]
pub trait Specialist: Send + Sync {
    /// Registry name (`web`, `code`, `docs`, `community`, `research`, ...)
    fn name(&self) -> &str;

    /// Run one bounded search. Downstream failures yield an empty list.
    async fn search(&self, sub_query: &str, max_results: usize) -> Vec<Finding>;
}

/// Named lookup of available specialists.
#[derive(Default, Clone)]
pub struct SpecialistRegistry {
    specialists: HashMap<String, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, specialist: Arc<dyn Specialist>) {
        self.specialists
            .insert(specialist.name().to_string(), specialist);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Specialist>> {
        self.specialists.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specialists.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }

    /// Specialists used by the deterministic fallback plan, in order.
    pub fn default_plan_names() -> [&'static str; 2] {
        ["web", "docs"]
    }
}

/// Specialist returning a fixed set of findings regardless of query.
///
/// Stands in for real connectors in tests and offline demo runs.
pub struct StaticSpecialist {
    name: String,
    findings: Vec<Finding>,
}

impl StaticSpecialist {
    pub fn new(name: &str, findings: Vec<Finding>) -> Self {
        Self {
            name: name.to_string(),
            findings,
        }
    }

    /// A specialist with a single canned finding at the given relevance.
    pub fn single(name: &str, title: &str, relevance: f64) -> Self {
        Self::new(
            name,
            vec![Finding {
                title: title.to_string(),
                url: format!("https://example.com/{}", name),
                snippet: format!("{} (via {})", title, name),
                relevance,
                source: name.to_string(),
            }],
        )
    }
}

#[async_trait]
impl Specialist for StaticSpecialist {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _sub_query: &str, max_results: usize) -> Vec<Finding> {
        self.findings.iter().take(max_results).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_lookup_and_names() {
        let mut registry = SpecialistRegistry::new();
        registry.register(Arc::new(StaticSpecialist::single("web", "w", 0.8)));
        registry.register(Arc::new(StaticSpecialist::single("docs", "d", 0.7)));

        assert!(registry.get("web").is_some());
        assert!(registry.get("community").is_none());
        assert_eq!(registry.names(), vec!["docs", "web"]);
    }

    #[tokio::test]
    async fn static_specialist_respects_max_results() {
        let findings = (0..5)
            .map(|i| Finding {
                title: format!("f{}", i),
                url: String::new(),
                snippet: String::new(),
                relevance: 0.5,
                source: "web".to_string(),
            })
            .collect();
        let specialist = StaticSpecialist::new("web", findings);
        assert_eq!(specialist.search("anything", 3).await.len(), 3);
    }
}
