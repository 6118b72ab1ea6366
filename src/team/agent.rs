//! Agents: named, described units of work.
//!
//! An agent wraps a [`Handler`]; a team also satisfies `Handler`, so teams
//! nest inside teams without any special dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cost::Usage;

/// Executes work assigned to an agent. Implementations observe the
/// cancellation token and abort promptly when it fires.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, task: Task, cancel: &CancellationToken) -> anyhow::Result<TaskResult>;
}

/// A named, described unit within a team. The description matters: the
/// description router matches on it.
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub description: String,
    pub handler: Arc<dyn Handler>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// The input to an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Upstream context from a handoff or parent task.
    #[serde(default)]
    pub context: String,
    /// Arbitrary structured input.
    #[serde(default)]
    pub input: HashMap<String, Value>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Links to the parent task when decomposed.
    #[serde(default)]
    pub parent_id: String,
}

/// The output from an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub output: String,
    /// Structured output, e.g. "passed", "issues", "steps".
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub diff: String,
    /// Sub-team results when the agent was itself a team.
    #[serde(default)]
    pub children: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// A result representing a failure for the given agent.
    pub fn error_for(agent_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

struct HandlerFn {
    f: Box<dyn Fn(Task) -> BoxFuture<'static, anyhow::Result<TaskResult>> + Send + Sync>,
}

#[async_trait]
impl Handler for HandlerFn {
    async fn handle(&self, task: Task, _cancel: &CancellationToken) -> anyhow::Result<TaskResult> {
        (self.f)(task).await
    }
}

/// Adapts a plain async function to the [`Handler`] contract.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskResult>> + Send + 'static,
{
    Arc::new(HandlerFn {
        f: Box::new(move |task| Box::pin(f(task))),
    })
}
