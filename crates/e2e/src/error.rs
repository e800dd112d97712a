//! Error types for the scenario harness

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Browser session failed to start: {0}")]
    SessionStart(String),

    #[error("Application fixture failed to start: {0}")]
    FixtureStart(String),

    #[error("Element '{selector}' not {predicate} after {}ms", .waited.as_millis())]
    ElementNotReady {
        selector: String,
        predicate: String,
        waited: Duration,
    },

    #[error("No element matches '{selector}'")]
    NotFound { selector: String },

    #[error("Interaction with '{selector}' failed: {reason}")]
    Interaction { selector: String, reason: String },

    #[error("Assertion failed on '{selector}': expected {expected}, got {actual:?}")]
    AssertionMismatch {
        selector: String,
        expected: String,
        actual: String,
    },

    #[error("Step {step} references element '{name}' which no earlier step on this page bound")]
    UnboundElement { step: usize, name: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Coarse classification of a failure, reported alongside scenario results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SessionStart,
    FixtureStart,
    ElementNotReady,
    NotFound,
    Interaction,
    AssertionMismatch,
    InvalidScenario,
    Internal,
}

impl HarnessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::SessionStart(_) => FailureKind::SessionStart,
            HarnessError::FixtureStart(_) => FailureKind::FixtureStart,
            HarnessError::ElementNotReady { .. } => FailureKind::ElementNotReady,
            HarnessError::NotFound { .. } => FailureKind::NotFound,
            HarnessError::Interaction { .. } => FailureKind::Interaction,
            HarnessError::AssertionMismatch { .. } => FailureKind::AssertionMismatch,
            HarnessError::UnboundElement { .. }
            | HarnessError::InvalidSelector(_)
            | HarnessError::ScenarioParse(_) => FailureKind::InvalidScenario,
            _ => FailureKind::Internal,
        }
    }

    /// True when the error means the element left the document
    pub fn is_stale(&self) -> bool {
        matches!(self, HarnessError::Interaction { reason, .. } if reason == STALE_REASON)
    }

    pub(crate) fn stale(selector: impl Into<String>) -> Self {
        HarnessError::Interaction {
            selector: selector.into(),
            reason: STALE_REASON.to_string(),
        }
    }
}

pub(crate) const STALE_REASON: &str = "element is detached from the document";

pub type HarnessResult<T> = Result<T, HarnessError>;
