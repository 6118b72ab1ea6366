//! Role contracts the pipeline engine drives.
//!
//! The engine knows nothing about how roles are implemented; a role may be
//! a model call, a shell adapter, or a whole team behind an adapter. Each
//! role observes cancellation through its own means; the runner additionally
//! races every role call against its cancellation token.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::review::Issue;

/// What the pipeline should accomplish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What a planner produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub relevant_files: Vec<String>,
}

/// What a developer returns after making changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub files_changed: Vec<String>,
    pub diff: String,
    #[serde(default)]
    pub summary: String,
}

/// What a developer returns after refactoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefactorResult {
    pub files_changed: Vec<String>,
    pub diff: String,
    #[serde(default)]
    pub summary: String,
}

/// The outcome of running tests against the current changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub failed_tests: Vec<String>,
    #[serde(default)]
    pub coverage: f64,
}

/// Implements code changes. `execute` is called once, then `refactor` zero
/// or more times based on review feedback.
#[async_trait]
pub trait Developer: Send + Sync {
    async fn execute(&self, req: &Request, plan: Option<&Plan>) -> anyhow::Result<ExecuteResult>;

    async fn refactor(
        &self,
        req: &Request,
        issues: &[Issue],
        guidance: &str,
        prev: &ExecuteResult,
    ) -> anyhow::Result<RefactorResult>;
}

/// Runs tests and reports results. Optional.
#[async_trait]
pub trait Tester: Send + Sync {
    async fn test(&self, req: &Request, changed_files: &[String]) -> anyhow::Result<TestResult>;
}

/// Analyzes the request and produces a plan. Optional.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, req: &Request) -> anyhow::Result<Plan>;
}
