//! Per-agent gating within a team.

use std::time::Duration;

use async_trait::async_trait;

use super::agent::Task;
use crate::cost::Usage;

/// Current team execution metrics.
#[derive(Debug, Clone, Default)]
pub struct TeamGuardState {
    pub team_name: String,
    pub agents_completed: usize,
    pub agents_remaining: usize,
    pub total_usage: Usage,
    pub elapsed: Duration,
}

/// Consulted before each agent execution. Returning an error skips (or,
/// under fail-fast, aborts) the agent.
#[async_trait]
pub trait TeamGuard: Send + Sync {
    async fn allow_agent(
        &self,
        agent_name: &str,
        task: &Task,
        state: &TeamGuardState,
    ) -> anyhow::Result<()>;
}

/// Allows every agent.
pub struct NopTeamGuard;

#[async_trait]
impl TeamGuard for NopTeamGuard {
    async fn allow_agent(
        &self,
        _agent_name: &str,
        _task: &Task,
        _state: &TeamGuardState,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Rejects agents once the team's accumulated cost reaches the limit.
pub struct CostLimitGuard {
    pub max_cost_usd: f64,
}

#[async_trait]
impl TeamGuard for CostLimitGuard {
    async fn allow_agent(
        &self,
        agent_name: &str,
        _task: &Task,
        state: &TeamGuardState,
    ) -> anyhow::Result<()> {
        if state.total_usage.total_cost_usd >= self.max_cost_usd {
            anyhow::bail!(
                "cost limit exceeded: ${:.4} >= ${:.4} limit, rejecting agent {agent_name}",
                state.total_usage.total_cost_usd,
                self.max_cost_usd
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cost_limit_guard_rejects_at_the_limit() {
        let guard = CostLimitGuard { max_cost_usd: 1.0 };
        let task = Task::default();

        let under = TeamGuardState {
            total_usage: Usage {
                total_cost_usd: 0.99,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(guard.allow_agent("a", &task, &under).await.is_ok());

        let at = TeamGuardState {
            total_usage: Usage {
                total_cost_usd: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = guard.allow_agent("a", &task, &at).await.unwrap_err();
        assert!(err.to_string().contains("cost limit exceeded"));
    }
}
