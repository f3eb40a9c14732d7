use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::CellId;

pub type EditResult<T> = std::result::Result<T, EditorError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub reason: String,
}

impl RuleFailure {
    pub fn new(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub failures: Vec<RuleFailure>,
}

impl ValidationFailure {
    pub fn single(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            failures: vec![RuleFailure::new(rule, reason)],
        }
    }

    pub fn has_rule(&self, rule: &str) -> bool {
        self.failures.iter().any(|failure| failure.rule == rule)
    }

    pub fn reasons(&self) -> Vec<&str> {
        self.failures
            .iter()
            .map(|failure| failure.reason.as_str())
            .collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .failures
            .iter()
            .map(|failure| failure.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("no port available on '{shape}': {reason}")]
    Allocation { shape: CellId, reason: String },

    #[error("structural inconsistency: {0}")]
    Structural(String),

    #[error("command '{0}' has already been executed")]
    AlreadyExecuted(String),

    #[error("command '{0}' has not been executed")]
    NotExecuted(String),

    #[error("no batch is open")]
    NoOpenBatch,

    #[error("history cannot move while a batch is open")]
    BatchOpen,

    #[error("selection is empty")]
    EmptySelection,

    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl EditorError {
    pub fn structural(message: impl Into<String>) -> Self {
        EditorError::Structural(message.into())
    }

    pub fn allocation(shape: &CellId, reason: impl Into<String>) -> Self {
        EditorError::Allocation {
            shape: shape.clone(),
            reason: reason.into(),
        }
    }

    pub fn missing_cell(id: &CellId) -> Self {
        EditorError::Structural(format!("cell '{id}' no longer exists"))
    }

    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        match self {
            EditorError::Validation(failure) => Some(failure),
            _ => None,
        }
    }
}
