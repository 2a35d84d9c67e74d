//! Error types for research-scout

use thiserror::Error;

use crate::generator::GenerationError;

/// Main error type for the research-scout library
#[derive(Error, Debug)]
pub enum Error {
    /// Queue is at its configured maximum size; the caller decides whether
    /// to retry later.
    #[error("task queue full: {0} tasks queued")]
    QueueFull(usize),

    /// A running task exceeded its configured timeout.
    #[error("task {0} exceeded its timeout")]
    TaskTimeout(uuid::Uuid),

    /// Text generation failed. Absorbed inside the coordinator via
    /// documented fallbacks; surfaced only by the generator trait itself.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Scoring weights that do not sum to 1.0
    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),

    /// Write attempted against a task already in a terminal state
    #[error("invalid status transition for task {task}: {detail}")]
    InvalidTransition { task: uuid::Uuid, detail: String },
}

/// Result type alias for the research-scout library
pub type Result<T> = std::result::Result<T, Error>;
