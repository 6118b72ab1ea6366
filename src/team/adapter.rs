//! Adapters exposing a team as a pipeline role.
//!
//! Each adapter marshals the request and step inputs into a [`Task`] and
//! maps the aggregated result's data-map fields back into the role's
//! structured return. The pipeline engine stays ignorant of teams.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::agent::{Task, TaskResult};
use super::Team;
use crate::pipeline::review::{Issue, ReviewResult, Reviewer};
use crate::pipeline::roles::{
    Developer, ExecuteResult, Plan, Planner, RefactorResult, Request, TestResult, Tester,
};
use async_trait::async_trait;

/// Wraps a team as a pipeline developer.
pub struct TeamDeveloper {
    team: Arc<Team>,
    cancel: CancellationToken,
}

impl TeamDeveloper {
    pub fn new(team: Arc<Team>) -> Self {
        Self {
            team,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl Developer for TeamDeveloper {
    async fn execute(&self, req: &Request, plan: Option<&Plan>) -> anyhow::Result<ExecuteResult> {
        let mut task = request_to_task(req, "execute");
        if let Some(plan) = plan {
            task.input.insert("plan_summary".to_string(), json!(plan.summary));
            task.input.insert("plan_steps".to_string(), json!(plan.steps));
            task.input
                .insert("plan_files".to_string(), json!(plan.relevant_files));
        }

        let result = self.team.handle(task, &self.cancel).await?;
        Ok(ExecuteResult {
            files_changed: result.files_changed,
            diff: result.diff,
            summary: result.output,
        })
    }

    async fn refactor(
        &self,
        req: &Request,
        issues: &[Issue],
        guidance: &str,
        prev: &ExecuteResult,
    ) -> anyhow::Result<RefactorResult> {
        let mut task = request_to_task(req, "refactor");
        task.input.insert("issues".to_string(), json!(issues));
        task.input.insert("guidance".to_string(), json!(guidance));
        task.input
            .insert("prev_files_changed".to_string(), json!(prev.files_changed));
        task.input.insert("prev_diff".to_string(), json!(prev.diff));

        let result = self.team.handle(task, &self.cancel).await?;
        Ok(RefactorResult {
            files_changed: result.files_changed,
            diff: result.diff,
            summary: result.output,
        })
    }
}

/// Wraps a team as a pipeline planner.
pub struct TeamPlanner {
    team: Arc<Team>,
    cancel: CancellationToken,
}

impl TeamPlanner {
    pub fn new(team: Arc<Team>) -> Self {
        Self {
            team,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl Planner for TeamPlanner {
    async fn plan(&self, req: &Request) -> anyhow::Result<Plan> {
        let task = request_to_task(req, "plan");
        let result = self.team.handle(task, &self.cancel).await?;

        Ok(Plan {
            summary: result.output,
            steps: get_vec(&result.data, "steps"),
            relevant_files: get_vec(&result.data, "relevant_files"),
        })
    }
}

/// Wraps a team as a pipeline tester.
pub struct TeamTester {
    team: Arc<Team>,
    cancel: CancellationToken,
}

impl TeamTester {
    pub fn new(team: Arc<Team>) -> Self {
        Self {
            team,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl Tester for TeamTester {
    async fn test(&self, req: &Request, changed_files: &[String]) -> anyhow::Result<TestResult> {
        let mut task = request_to_task(req, "test");
        task.input
            .insert("changed_files".to_string(), json!(changed_files));

        let result = self.team.handle(task, &self.cancel).await?;
        Ok(TestResult {
            passed: get_bool(&result.data, "passed"),
            output: result.output,
            failed_tests: get_vec(&result.data, "failed_tests"),
            coverage: get_f64(&result.data, "coverage"),
        })
    }
}

/// Wraps a team as a pipeline reviewer.
pub struct TeamReviewer {
    team: Arc<Team>,
    cancel: CancellationToken,
}

impl TeamReviewer {
    pub fn new(team: Arc<Team>) -> Self {
        Self {
            team,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl Reviewer for TeamReviewer {
    async fn review(&self, diff: &str, context: &str) -> anyhow::Result<ReviewResult> {
        let task = Task {
            id: "review".to_string(),
            description: "review code changes".to_string(),
            context: context.to_string(),
            input: HashMap::from([("diff".to_string(), json!(diff))]),
            ..Default::default()
        };

        let result = self.team.handle(task, &self.cancel).await?;
        Ok(ReviewResult {
            passed: get_bool(&result.data, "passed"),
            score: get_f64(&result.data, "score"),
            summary: result.output,
            issues: get_vec(&result.data, "issues"),
            praise: get_vec(&result.data, "praise"),
            guidance: get_string(&result.data, "guidance"),
        })
    }
}

/// Converts a pipeline request into a task for the given phase. The task id
/// is `{request.id}-{phase}`; labels become constraints.
fn request_to_task(req: &Request, phase: &str) -> Task {
    let description = if req.description.is_empty() {
        req.title.clone()
    } else {
        req.description.clone()
    };

    Task {
        id: format!("{}-{phase}", req.id),
        description,
        context: format!("{}\n{}", req.title, req.description),
        input: HashMap::from([
            ("work_dir".to_string(), json!(req.work_dir)),
            ("metadata".to_string(), json!(req.metadata)),
        ]),
        constraints: req.labels.clone(),
        ..Default::default()
    }
}

fn get_bool(data: &HashMap<String, Value>, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn get_f64(data: &HashMap<String, Value>, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn get_string(data: &HashMap<String, Value>, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn get_vec<T: serde::de::DeserializeOwned>(data: &HashMap<String, Value>, key: &str) -> Vec<T> {
    data.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
