//! Text-generation capability boundary.
//!
//! The coordinator's plan/evaluate/synthesize loop depends on a
//! non-deterministic external generator. It is abstracted behind the narrow
//! [`TextGenerator`] trait so providers can be swapped without touching
//! coordinator logic, and so tests can drive the loop with a deterministic
//! scripted fake.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Generation failure. Must be distinguishable: a provider never signals
/// failure by silently returning empty text.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("generation timed out after {0}ms")]
    Timeout(u64),

    #[error("provider returned empty output")]
    Empty,

    #[error("no response scripted for prompt tag '{0}'")]
    Unscripted(String),
}

/// Options for a single generation call
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

/// A swappable text-generation provider.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Human-readable provider name, for logs.
    fn name(&self) -> &str;

    /// Generate text for the given prompt. Failures surface as
    /// [`GenerationError`], never as empty output.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}

/// Deterministic generator keyed by prompt fingerprint.
///
/// Prompts built by the research module open with a tag line
/// (`TASK: PLAN`, `TASK: EVALUATE`, `TASK: SYNTHESIZE`); the fingerprint is
/// that tag. Useful for tests and for exercising the coordinator's fallback
/// paths offline (an empty script makes every call fail, which the
/// coordinator absorbs by design).
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: HashMap<String, Vec<String>>,
    cursor: std::sync::Mutex<HashMap<String, usize>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for a prompt tag. Repeated calls for the same tag
    /// queue responses consumed in order; the last one repeats.
    pub fn respond(mut self, tag: &str, response: &str) -> Self {
        self.responses
            .entry(tag.to_string())
            .or_default()
            .push(response.to_string());
        self
    }

    /// Extract the fingerprint from a prompt: the value of its first
    /// `TASK:` line, or the first word as a fallback.
    pub fn fingerprint(prompt: &str) -> String {
        for line in prompt.lines() {
            if let Some(rest) = line.trim().strip_prefix("TASK:") {
                return rest.trim().to_string();
            }
        }
        prompt
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let tag = Self::fingerprint(prompt);
        let responses = self
            .responses
            .get(&tag)
            .ok_or_else(|| GenerationError::Unscripted(tag.clone()))?;

        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| GenerationError::Provider("cursor lock poisoned".to_string()))?;
        let index = cursor.entry(tag).or_insert(0);
        let response = responses
            .get(*index)
            .or_else(|| responses.last())
            .cloned()
            .ok_or(GenerationError::Empty)?;
        *index += 1;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_consumed_in_order() {
        let gen = ScriptedGenerator::new()
            .respond("PLAN", "first")
            .respond("PLAN", "second");

        let opts = GenerationOptions::default();
        assert_eq!(gen.generate("TASK: PLAN\n...", &opts).await.unwrap(), "first");
        assert_eq!(gen.generate("TASK: PLAN\n...", &opts).await.unwrap(), "second");
        // last response repeats
        assert_eq!(gen.generate("TASK: PLAN\n...", &opts).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn unscripted_tag_is_a_distinguishable_error() {
        let gen = ScriptedGenerator::new();
        let err = gen
            .generate("TASK: SYNTHESIZE\n...", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unscripted(_)));
    }
}
