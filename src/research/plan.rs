//! Plan phase: turn a query (plus optional prior knowledge and project
//! context) into an ordered list of specialist dispatch steps.
//!
//! Planning must never fail: generation or parse problems resolve to a
//! deterministic default plan, so the loop always has at least one step.

use tracing::{debug, warn};

use crate::config::ResearchConfig;
use crate::generator::{GenerationOptions, TextGenerator};
use crate::research::parse::TaggedDoc;
use crate::specialist::SpecialistRegistry;

/// One planned dispatch: which specialist, what to ask it, how important
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub specialist: String,
    pub sub_query: String,
    pub priority: u8,
}

/// A research strategy plus its ordered dispatch steps
#[derive(Debug, Clone)]
pub struct ResearchPlan {
    pub strategy: String,
    pub steps: Vec<PlanStep>,
}

/// Build the plan prompt. The generator must answer in the tagged format:
///
/// ```text
/// STRATEGY: <one line>
/// STEP: <specialist> | <sub query> | <priority 1-10>
/// STEP: ...
/// ```
fn build_plan_prompt(
    query: &str,
    prior_knowledge: Option<&str>,
    project_context: Option<&str>,
    specialists: &[String],
    max_steps: usize,
) -> String {
    let mut prompt = format!(
        "TASK: PLAN\n\
         You plan background research for a coding assistant.\n\
         QUERY: {}\n",
        query
    );
    if let Some(prior) = prior_knowledge {
        prompt.push_str(&format!("PRIOR KNOWLEDGE:\n{}\n", prior));
    }
    if let Some(ctx) = project_context {
        prompt.push_str(&format!("PROJECT CONTEXT: {}\n", ctx));
    }
    prompt.push_str(&format!(
        "\nAvailable specialists: {}.\n\
         Respond with exactly these tagged lines and nothing else:\n\
         STRATEGY: <one-line approach>\n\
         STEP: <specialist> | <sub query> | <priority 1-10>\n\
         Emit between 1 and {} STEP lines, most important first.\n",
        specialists.join(", "),
        max_steps
    ));
    prompt
}

/// Parse generator output into a plan. `None` when the required fields are
/// missing or no step references a known specialist.
fn parse_plan(text: &str, specialists: &[String], max_steps: usize) -> Option<ResearchPlan> {
    let doc = TaggedDoc::parse(text);
    let strategy = doc.get("STRATEGY")?.to_string();

    let mut steps = Vec::new();
    for raw in doc.get_all("STEP") {
        let mut parts = raw.splitn(3, '|').map(str::trim);
        let (Some(specialist), Some(sub_query)) = (parts.next(), parts.next()) else {
            continue;
        };
        if sub_query.is_empty() {
            continue;
        }
        let specialist = specialist.to_lowercase();
        if !specialists.iter().any(|s| s == &specialist) {
            debug!(specialist, "plan step names unknown specialist, skipping");
            continue;
        }
        let priority = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .unwrap_or(5)
            .clamp(1, 10);
        steps.push(PlanStep {
            specialist,
            sub_query: sub_query.to_string(),
            priority,
        });
        if steps.len() == max_steps {
            break;
        }
    }

    if steps.is_empty() {
        return None;
    }
    Some(ResearchPlan { strategy, steps })
}

/// The deterministic default plan: the raw query against the fixed default
/// specialists (those of them that are registered).
pub fn fallback_plan(query: &str, registry: &SpecialistRegistry) -> ResearchPlan {
    let steps: Vec<PlanStep> = SpecialistRegistry::default_plan_names()
        .iter()
        .filter(|name| registry.get(name).is_some())
        .map(|name| PlanStep {
            specialist: name.to_string(),
            sub_query: query.to_string(),
            priority: 5,
        })
        .collect();

    // With none of the default specialists registered, dispatch to whatever
    // exists so the loop still has a step.
    let steps = if steps.is_empty() {
        registry
            .names()
            .into_iter()
            .take(2)
            .map(|name| PlanStep {
                specialist: name,
                sub_query: query.to_string(),
                priority: 5,
            })
            .collect()
    } else {
        steps
    };

    ResearchPlan {
        strategy: "default: dispatch the raw query to the default specialists".to_string(),
        steps,
    }
}

/// Produce a plan. Infallible by contract: every failure path lands on
/// [`fallback_plan`].
pub async fn plan(
    generator: &dyn TextGenerator,
    registry: &SpecialistRegistry,
    config: &ResearchConfig,
    query: &str,
    prior_knowledge: Option<&str>,
    project_context: Option<&str>,
) -> ResearchPlan {
    let specialists = registry.names();
    let prompt = build_plan_prompt(
        query,
        prior_knowledge,
        project_context,
        &specialists,
        config.max_plan_steps,
    );
    let options = GenerationOptions {
        max_tokens: config.generation_max_tokens,
        temperature: config.generation_temperature,
    };

    match generator.generate(&prompt, &options).await {
        Ok(text) => match parse_plan(&text, &specialists, config.max_plan_steps) {
            Some(plan) => plan,
            None => {
                warn!(query, "plan output unparseable, using fallback plan");
                fallback_plan(query, registry)
            }
        },
        Err(e) => {
            warn!(query, error = %e, "plan generation failed, using fallback plan");
            fallback_plan(query, registry)
        }
    }
}
