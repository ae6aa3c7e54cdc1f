//! Protocol definition errors

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One failed schema constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value
    pub path: String,
    /// The constraint it breaks
    pub constraint: String,
}

impl SchemaViolation {
    pub(crate) fn new(path: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            constraint: constraint.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.constraint)
    }
}

/// Stage definitions rejected by the schema check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("protocol definition failed validation ({} violation(s)): {}", .violations.len(), list(.violations))]
pub struct SchemaValidationError {
    /// Every violation found, in document order
    pub violations: Vec<SchemaViolation>,
}

fn list(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors loading or resolving protocol definitions
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown protocol: {0}")]
    NotFound(String),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error("Invalid protocol JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
