//! Routing: which agents handle a given task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::agent::{Agent, Task};

/// Pairs an agent with the task it should handle (the original task or a
/// derived sub-task).
#[derive(Clone)]
pub struct Selection {
    pub agent: Agent,
    pub task: Task,
}

/// Selects which agents should handle a task.
#[async_trait]
pub trait Router: Send + Sync {
    async fn select(&self, task: &Task, agents: &[Agent]) -> anyhow::Result<Vec<Selection>>;
}

/// Routes every task to all agents.
pub struct AllRouter;

#[async_trait]
impl Router for AllRouter {
    async fn select(&self, task: &Task, agents: &[Agent]) -> anyhow::Result<Vec<Selection>> {
        Ok(agents
            .iter()
            .map(|agent| Selection {
                agent: agent.clone(),
                task: task.clone(),
            })
            .collect())
    }
}

/// Routes to the first agent whose matcher returns true. Agents without a
/// matcher entry are skipped.
#[derive(Default)]
pub struct FirstMatchRouter {
    matchers: HashMap<String, Box<dyn Fn(&Task) -> bool + Send + Sync>>,
}

impl FirstMatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matcher(
        mut self,
        agent_name: impl Into<String>,
        matcher: impl Fn(&Task) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.matchers.insert(agent_name.into(), Box::new(matcher));
        self
    }
}

#[async_trait]
impl Router for FirstMatchRouter {
    async fn select(&self, task: &Task, agents: &[Agent]) -> anyhow::Result<Vec<Selection>> {
        for agent in agents {
            if let Some(matcher) = self.matchers.get(&agent.name) {
                if matcher(task) {
                    return Ok(vec![Selection {
                        agent: agent.clone(),
                        task: task.clone(),
                    }]);
                }
            }
        }
        Ok(Vec::new())
    }
}

/// Distributes tasks across agents in rotation. Safe for concurrent use.
#[derive(Default)]
pub struct RoundRobinRouter {
    counter: AtomicU64,
}

impl RoundRobinRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Router for RoundRobinRouter {
    async fn select(&self, task: &Task, agents: &[Agent]) -> anyhow::Result<Vec<Selection>> {
        if agents.is_empty() {
            return Ok(Vec::new());
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) as usize % agents.len();
        Ok(vec![Selection {
            agent: agents[idx].clone(),
            task: task.clone(),
        }])
    }
}

/// Selects agents whose description shares a keyword (longer than two
/// characters) with the task description. Matching is case-insensitive.
pub struct DescriptionRouter;

#[async_trait]
impl Router for DescriptionRouter {
    async fn select(&self, task: &Task, agents: &[Agent]) -> anyhow::Result<Vec<Selection>> {
        if task.description.is_empty() {
            return Ok(Vec::new());
        }
        let task_words: Vec<String> = task
            .description
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(str::to_string)
            .collect();

        let mut selections = Vec::new();
        for agent in agents {
            let description = agent.description.to_lowercase();
            if task_words.iter().any(|w| description.contains(w)) {
                selections.push(Selection {
                    agent: agent.clone(),
                    task: task.clone(),
                });
            }
        }
        Ok(selections)
    }
}
