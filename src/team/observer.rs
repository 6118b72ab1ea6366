//! Team lifecycle observation.

use std::time::Duration;

use async_trait::async_trait;

use super::agent::{Task, TaskResult};
use super::router::Selection;

/// Receives team execution events. All methods default to no-ops.
#[async_trait]
pub trait TeamObserver: Send + Sync {
    async fn on_team_start(&self, _team: &str, _task: &Task) {}
    async fn on_route_decision(&self, _team: &str, _selections: &[Selection]) {}
    async fn on_agent_start(&self, _team: &str, _agent: &str, _task: &Task) {}
    async fn on_agent_complete(
        &self,
        _team: &str,
        _agent: &str,
        _result: Option<&TaskResult>,
        _duration: Duration,
        _error: Option<&str>,
    ) {
    }
    async fn on_team_complete(&self, _team: &str, _result: Option<&TaskResult>, _error: Option<&str>) {
    }
}

/// Ignores all events.
pub struct NopTeamObserver;

#[async_trait]
impl TeamObserver for NopTeamObserver {}
