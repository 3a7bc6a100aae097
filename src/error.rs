// src/error.rs
//
// Crate-wide error type.
//
// Shape-contract violations live in `rl::observation::ShapeError` and are
// wrapped here so callers only match on one type at the library boundary.

use thiserror::Error;

use crate::rl::observation::ShapeError;

/// Errors surfaced by the arbitration / expansion layer.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Observation matrix does not satisfy the shape contract.
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// Skill index outside the closed skill enumeration.
    #[error("invalid skill index {index}: expected 0..{count}")]
    InvalidSkill { index: i64, count: usize },

    /// Primitive action index outside the environment's action set.
    #[error("invalid primitive action index {index}: expected 0..{count}")]
    InvalidAction { index: i64, count: usize },

    /// Configuration value rejected at construction time.
    #[error("invalid config '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// Wrapped policy failed to produce a prediction.
    #[error("policy error: {0}")]
    Policy(String),

    /// Wrapped environment violated its contract.
    #[error("environment error: {0}")]
    Environment(String),

    #[error("failed to access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("failed to serialize {what}: {message}")]
    Serialize { what: String, message: String },

    /// Override entries must carry strictly increasing decision steps.
    #[error("override entry for step {step} does not follow step {previous}")]
    OverrideOrder { step: u64, previous: u64 },
}

impl GuardError {
    pub fn config(field: &str, message: impl Into<String>) -> Self {
        GuardError::InvalidConfig {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        GuardError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
