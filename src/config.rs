//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/research-scout/config.toml`.
//! Every field has a default, so a missing file yields a fully usable
//! configuration.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/research-scout/` (~/.config/research-scout/)
//! - Data: `$XDG_DATA_HOME/research-scout/` (~/.local/share/research-scout/)
//! - State/Logs: `$XDG_STATE_HOME/research-scout/` (~/.local/state/research-scout/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub injection: InjectionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Task queue and worker pool limits
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of tasks held in `queued` state
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Size of the worker pool
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Hard per-task timeout in milliseconds
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// How many times a timed-out task is re-enqueued before terminal failure
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_max_queue_size() -> usize {
    50
}
fn default_max_concurrent() -> usize {
    2
}
fn default_task_timeout_ms() -> u64 {
    120_000
}
fn default_retry_attempts() -> u32 {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_concurrent: default_max_concurrent(),
            task_timeout_ms: default_task_timeout_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl QueueConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Trigger detection thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Inputs shorter than this never trigger
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Minimum detector confidence required before a task is enqueued
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Probability of speculative research on repeated tool-search patterns
    #[serde(default = "default_speculative_chance")]
    pub speculative_chance: f64,
}

fn default_min_length() -> usize {
    12
}
fn default_min_confidence() -> f64 {
    0.6
}
fn default_speculative_chance() -> f64 {
    0.3
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            min_confidence: default_min_confidence(),
            speculative_chance: default_speculative_chance(),
        }
    }
}

/// Coordinator loop tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    /// Average-relevance threshold for the no-generation fast path
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,

    /// Maximum planned steps kept per iteration
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,

    /// Token cap passed to each generation call
    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,

    /// Sampling temperature for generation calls
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
}

fn default_completion_threshold() -> f64 {
    0.85
}
fn default_max_plan_steps() -> usize {
    3
}
fn default_generation_max_tokens() -> u32 {
    1024
}
fn default_generation_temperature() -> f32 {
    0.3
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            completion_threshold: default_completion_threshold(),
            max_plan_steps: default_max_plan_steps(),
            generation_max_tokens: default_generation_max_tokens(),
            generation_temperature: default_generation_temperature(),
        }
    }
}

/// Knowledge scoring weights and cutoffs. Weights must sum to 1.0; the
/// scorer constructor validates this.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_w_text")]
    pub text_similarity_weight: f64,
    #[serde(default = "default_w_recency")]
    pub recency_weight: f64,
    #[serde(default = "default_w_project")]
    pub project_match_weight: f64,
    #[serde(default = "default_w_type")]
    pub type_match_weight: f64,
    #[serde(default = "default_w_confidence")]
    pub confidence_weight: f64,

    /// Half-life constant for exponential recency decay, in days
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,

    /// Candidates scoring below this are excluded from selection entirely
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
}

fn default_w_text() -> f64 {
    0.35
}
fn default_w_recency() -> f64 {
    0.15
}
fn default_w_project() -> f64 {
    0.15
}
fn default_w_type() -> f64 {
    0.15
}
fn default_w_confidence() -> f64 {
    0.20
}
fn default_half_life_days() -> f64 {
    30.0
}
fn default_min_relevance() -> f64 {
    0.45
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            text_similarity_weight: default_w_text(),
            recency_weight: default_w_recency(),
            project_match_weight: default_w_project(),
            type_match_weight: default_w_type(),
            confidence_weight: default_w_confidence(),
            half_life_days: default_half_life_days(),
            min_relevance: default_min_relevance(),
        }
    }
}

/// Per-session injection budgets, cooldown, and type thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct InjectionConfig {
    /// Maximum injections per session
    #[serde(default = "default_max_injections")]
    pub max_injections_per_session: u32,

    /// Cumulative token budget per session
    #[serde(default = "default_max_tokens_per_session")]
    pub max_tokens_per_session: u32,

    /// Minimum interval between two injections into one session
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Memory score at or above this (and above the research score) selects
    /// memory-only
    #[serde(default = "default_memory_only_threshold")]
    pub memory_only_threshold: f64,

    /// Both scores at or above this select combined
    #[serde(default = "default_combined_threshold")]
    pub combined_threshold: f64,

    /// Research score at or above this selects research-only
    #[serde(default = "default_research_threshold")]
    pub research_threshold: f64,

    /// Token ceiling for a memory-only rendering
    #[serde(default = "default_memory_token_budget")]
    pub memory_token_budget: u32,

    /// Token ceiling for a research-only rendering
    #[serde(default = "default_research_token_budget")]
    pub research_token_budget: u32,

    /// Token ceiling for a combined rendering
    #[serde(default = "default_combined_token_budget")]
    pub combined_token_budget: u32,

    /// Token ceiling for a warning rendering
    #[serde(default = "default_warning_token_budget")]
    pub warning_token_budget: u32,
}

fn default_max_injections() -> u32 {
    5
}
fn default_max_tokens_per_session() -> u32 {
    2000
}
fn default_cooldown_ms() -> u64 {
    300_000
}
fn default_memory_only_threshold() -> f64 {
    0.8
}
fn default_combined_threshold() -> f64 {
    0.65
}
fn default_research_threshold() -> f64 {
    0.7
}
fn default_memory_token_budget() -> u32 {
    300
}
fn default_research_token_budget() -> u32 {
    500
}
fn default_combined_token_budget() -> u32 {
    700
}
fn default_warning_token_budget() -> u32 {
    150
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            max_injections_per_session: default_max_injections(),
            max_tokens_per_session: default_max_tokens_per_session(),
            cooldown_ms: default_cooldown_ms(),
            memory_only_threshold: default_memory_only_threshold(),
            combined_threshold: default_combined_threshold(),
            research_threshold: default_research_threshold(),
            memory_token_budget: default_memory_token_budget(),
            research_token_budget: default_research_token_budget(),
            combined_token_budget: default_combined_token_budget(),
            warning_token_budget: default_warning_token_budget(),
        }
    }
}

impl InjectionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Token ceiling for the given rendering type
    pub fn token_budget(&self, kind: crate::models::InjectionType) -> u32 {
        use crate::models::InjectionType::*;
        match kind {
            MemoryOnly => self.memory_token_budget,
            ResearchOnly => self.research_token_budget,
            Combined => self.combined_token_budget,
            Warning => self.warning_token_budget,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "research_scout=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Config directory: `$XDG_CONFIG_HOME/research-scout/`
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("research-scout")
    }

    /// Data directory (database lives here): `$XDG_DATA_HOME/research-scout/`
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("research-scout")
    }

    /// State directory (logs live here): `$XDG_STATE_HOME/research-scout/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("research-scout")
    }

    /// Default database path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("scout.db")
    }

    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_dir().join("config.toml"))
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let config = Config::load_from(PathBuf::from("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.queue.max_queue_size, 50);
        assert_eq!(config.queue.retry_attempts, 2);
        assert!((config.research.completion_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.injection.cooldown_ms, 300_000);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[queue]\nmax_queue_size = 5\n\n[injection]\ncooldown_ms = 1000"
        )
        .unwrap();

        let config = Config::load_from(file.path().to_path_buf()).unwrap();
        assert_eq!(config.queue.max_queue_size, 5);
        // untouched fields keep defaults
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.injection.cooldown_ms, 1000);
        assert_eq!(config.injection.max_injections_per_session, 5);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue = \"not a table\"").unwrap();
        let err = Config::load_from(file.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
