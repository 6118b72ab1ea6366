//! Canonical review types and the reviewer contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How serious a review issue is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    #[default]
    Minor,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single problem a reviewer found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suggestion: String,
}

/// The outcome of a code review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewResult {
    pub passed: bool,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub praise: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub guidance: String,
}

/// Pluggable code review backend. Implementations may call a model, run
/// static analysis, or delegate to a team; the pipeline only sees this
/// contract.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, diff: &str, context: &str) -> anyhow::Result<ReviewResult>;
}
