//! Team orchestration: route → execute → aggregate.
//!
//! A team groups named agents behind a router, an execution strategy, a
//! guard, and an aggregator. The team itself satisfies the [`Handler`]
//! contract, so teams nest arbitrarily via [`Team::as_agent`].

pub mod adapter;
pub mod agent;
pub mod aggregator;
pub mod guard;
pub mod observer;
pub mod router;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use agent::{Agent, Handler, Task, TaskResult, handler_fn};
pub use aggregator::{Aggregator, BestResultAggregator, ConcatAggregator, FirstResultAggregator};
pub use guard::{CostLimitGuard, NopTeamGuard, TeamGuard, TeamGuardState};
pub use observer::{NopTeamObserver, TeamObserver};
pub use router::{AllRouter, DescriptionRouter, FirstMatchRouter, RoundRobinRouter, Router, Selection};

use crate::cost::Tracker;
use crate::errors::TeamError;

/// How selected agents are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One after another; each agent observes accumulated state.
    #[default]
    Sequential,
    /// All concurrently, with order-preserving result slots.
    Parallel,
}

/// How individual agent errors are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort on the first agent error.
    #[default]
    FailFast,
    /// Record errors as child results and continue.
    CollectErrors,
}

/// A group of agents with routing, strategy, guard, and aggregation.
pub struct Team {
    name: String,
    description: String,
    agents: Vec<Agent>,
    router: Arc<dyn Router>,
    strategy: Strategy,
    aggregator: Arc<dyn Aggregator>,
    observer: Arc<dyn TeamObserver>,
    guard: Arc<dyn TeamGuard>,
    cost_tracker: Option<Arc<Tracker>>,
    error_policy: ErrorPolicy,
}

impl Team {
    /// A team with defaults: all-router, sequential, concat aggregation,
    /// no guard, fail-fast.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            agents: Vec::new(),
            router: Arc::new(AllRouter),
            strategy: Strategy::Sequential,
            aggregator: Arc::new(ConcatAggregator),
            observer: Arc::new(NopTeamObserver),
            guard: Arc::new(NopTeamGuard),
            cost_tracker: None,
            error_policy: ErrorPolicy::FailFast,
        }
    }

    /// The description is used for routing when this team is nested as an
    /// agent.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_agents(mut self, agents: impl IntoIterator<Item = Agent>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TeamObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn TeamGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_cost_tracker(mut self, tracker: Arc<Tracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wrap the team as an agent so it can join another team.
    pub fn as_agent(self: Arc<Self>) -> Agent {
        Agent {
            name: self.name.clone(),
            description: self.description.clone(),
            handler: self,
        }
    }

    /// Execute the team orchestration: route → execute → aggregate.
    pub async fn handle(
        &self,
        task: Task,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TaskResult> {
        self.observer.on_team_start(&self.name, &task).await;

        let selections = match self.router.select(&task, &self.agents).await {
            Ok(selections) => selections,
            Err(source) => {
                let err = TeamError::Routing {
                    team: self.name.clone(),
                    source,
                };
                self.observer
                    .on_team_complete(&self.name, None, Some(&err.to_string()))
                    .await;
                return Err(err.into());
            }
        };
        self.observer.on_route_decision(&self.name, &selections).await;

        if selections.is_empty() {
            let result = TaskResult {
                agent_name: self.name.clone(),
                output: "no agents selected".to_string(),
                ..Default::default()
            };
            self.observer
                .on_team_complete(&self.name, Some(&result), None)
                .await;
            return Ok(result);
        }

        let executed = match self.strategy {
            Strategy::Sequential => self.execute_sequential(&selections, cancel).await,
            Strategy::Parallel => self.execute_parallel(&selections, cancel).await,
        };
        let results = match executed {
            Ok(results) => results,
            Err(err) => {
                self.observer
                    .on_team_complete(&self.name, None, Some(&err.to_string()))
                    .await;
                return Err(err.into());
            }
        };

        let mut aggregated = match self.aggregator.aggregate(results).await {
            Ok(aggregated) => aggregated,
            Err(source) => {
                let err = TeamError::Aggregation {
                    team: self.name.clone(),
                    source,
                };
                self.observer
                    .on_team_complete(&self.name, None, Some(&err.to_string()))
                    .await;
                return Err(err.into());
            }
        };
        aggregated.agent_name = self.name.clone();

        self.observer
            .on_team_complete(&self.name, Some(&aggregated), None)
            .await;
        Ok(aggregated)
    }

    async fn execute_sequential(
        &self,
        selections: &[Selection],
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskResult>, TeamError> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(selections.len());
        let mut completed = 0;

        for (i, selection) in selections.iter().enumerate() {
            let state = self.guard_state(start, completed, selections.len() - i);
            if let Err(rejection) = self
                .guard
                .allow_agent(&selection.agent.name, &selection.task, &state)
                .await
            {
                match self.error_policy {
                    ErrorPolicy::FailFast => {
                        return Err(TeamError::GuardRejected {
                            team: self.name.clone(),
                            agent: selection.agent.name.clone(),
                            reason: rejection.to_string(),
                        });
                    }
                    ErrorPolicy::CollectErrors => {
                        results.push(TaskResult::error_for(
                            &selection.agent.name,
                            rejection.to_string(),
                        ));
                        continue;
                    }
                }
            }

            match self.execute_agent(selection, cancel).await {
                Ok(result) => {
                    results.push(result);
                    completed += 1;
                }
                Err(err) => match self.error_policy {
                    ErrorPolicy::FailFast => return Err(err),
                    ErrorPolicy::CollectErrors => {
                        results.push(TaskResult::error_for(
                            &selection.agent.name,
                            err.to_string(),
                        ));
                    }
                },
            }
        }

        Ok(results)
    }

    /// Launches every selection concurrently. Guard checks run pre-flight
    /// for all selections before any agent starts; a rejection fails the
    /// whole team. Cancellation fills unfinished slots with error results
    /// and aggregation proceeds with whatever completed.
    async fn execute_parallel(
        &self,
        selections: &[Selection],
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskResult>, TeamError> {
        let start = Instant::now();

        for (i, selection) in selections.iter().enumerate() {
            let state = self.guard_state(start, 0, selections.len() - i);
            if let Err(rejection) = self
                .guard
                .allow_agent(&selection.agent.name, &selection.task, &state)
                .await
            {
                return Err(TeamError::GuardRejected {
                    team: self.name.clone(),
                    agent: selection.agent.name.clone(),
                    reason: rejection.to_string(),
                });
            }
        }

        let mut results: Vec<TaskResult> = selections
            .iter()
            .map(|s| TaskResult::error_for(&s.agent.name, "agent did not complete"))
            .collect();

        let mut join_set = JoinSet::new();
        for (idx, selection) in selections.iter().enumerate() {
            let agent = selection.agent.clone();
            let task = selection.task.clone();
            let cancel = cancel.clone();
            let observer = self.observer.clone();
            let tracker = self.cost_tracker.clone();
            let team = self.name.clone();

            join_set.spawn(async move {
                observer.on_agent_start(&team, &agent.name, &task).await;
                let agent_start = Instant::now();
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    out = agent.handler.handle(task, &cancel) => Some(out),
                };
                let duration = agent_start.elapsed();

                let result = match outcome {
                    None => TaskResult::error_for(&agent.name, "canceled"),
                    Some(Err(e)) => {
                        observer
                            .on_agent_complete(&team, &agent.name, None, duration, Some(&e.to_string()))
                            .await;
                        TaskResult::error_for(&agent.name, e.to_string())
                    }
                    Some(Ok(mut result)) => {
                        result.agent_name = agent.name.clone();
                        if let Some(tracker) = &tracker {
                            if !result.usage.is_empty() {
                                tracker.add(format!("{team}/{}", agent.name), result.usage);
                            }
                        }
                        observer
                            .on_agent_complete(&team, &agent.name, Some(&result), duration, None)
                            .await;
                        result
                    }
                };
                (idx, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok((idx, result)) = joined {
                results[idx] = result;
            }
        }

        Ok(results)
    }

    async fn execute_agent(
        &self,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, TeamError> {
        self.observer
            .on_agent_start(&self.name, &selection.agent.name, &selection.task)
            .await;
        let start = Instant::now();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow::anyhow!("canceled")),
            out = selection
                .agent
                .handler
                .handle(selection.task.clone(), cancel) => out,
        };
        let duration = start.elapsed();

        match outcome {
            Err(source) => {
                self.observer
                    .on_agent_complete(
                        &self.name,
                        &selection.agent.name,
                        None,
                        duration,
                        Some(&source.to_string()),
                    )
                    .await;
                Err(TeamError::Agent {
                    team: self.name.clone(),
                    agent: selection.agent.name.clone(),
                    source,
                })
            }
            Ok(mut result) => {
                result.agent_name = selection.agent.name.clone();
                if let Some(tracker) = &self.cost_tracker {
                    if !result.usage.is_empty() {
                        tracker.add(
                            format!("{}/{}", self.name, selection.agent.name),
                            result.usage,
                        );
                    }
                }
                self.observer
                    .on_agent_complete(
                        &self.name,
                        &selection.agent.name,
                        Some(&result),
                        duration,
                        None,
                    )
                    .await;
                Ok(result)
            }
        }
    }

    fn guard_state(&self, start: Instant, completed: usize, remaining: usize) -> TeamGuardState {
        TeamGuardState {
            team_name: self.name.clone(),
            agents_completed: completed,
            agents_remaining: remaining,
            total_usage: self
                .cost_tracker
                .as_ref()
                .map(|t| t.total())
                .unwrap_or_default(),
            elapsed: start.elapsed(),
        }
    }
}

#[async_trait]
impl Handler for Team {
    async fn handle(&self, task: Task, cancel: &CancellationToken) -> anyhow::Result<TaskResult> {
        Team::handle(self, task, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::Usage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn echo_agent(name: &'static str, output: &'static str) -> Agent {
        Agent::new(
            name,
            "",
            handler_fn(move |_task| async move {
                Ok(TaskResult {
                    output: output.to_string(),
                    ..Default::default()
                })
            }),
        )
    }

    fn task() -> Task {
        Task {
            id: "t1".to_string(),
            description: "build the feature".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sequential_team_concatenates_outputs_in_order() {
        let team = Team::new("builders")
            .with_agent(echo_agent("a", "first"))
            .with_agent(echo_agent("b", "second"));

        let result = team.handle(task(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.agent_name, "builders");
        assert_eq!(result.output, "first\nsecond");
        assert_eq!(result.children.len(), 2);
    }

    #[tokio::test]
    async fn parallel_team_preserves_selection_order() {
        // The slower agent is selected first; its slot must still come first.
        let slow = Agent::new(
            "slow",
            "",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(TaskResult {
                    output: "slow".to_string(),
                    ..Default::default()
                })
            }),
        );
        let team = Team::new("racers")
            .with_agent(slow)
            .with_agent(echo_agent("fast", "fast"))
            .with_strategy(Strategy::Parallel);

        let result = team.handle(task(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.children[0].output, "slow");
        assert_eq!(result.children[1].output, "fast");
    }

    #[tokio::test]
    async fn parallel_with_concat_merges_files_like_a_merge_queue() {
        let frontend = Agent::new(
            "frontend",
            "",
            handler_fn(|_| async {
                Ok(TaskResult {
                    output: "ui".to_string(),
                    files_changed: vec!["a.tsx".to_string()],
                    ..Default::default()
                })
            }),
        );
        let backend = Agent::new(
            "backend",
            "",
            handler_fn(|_| async {
                Ok(TaskResult {
                    output: "api".to_string(),
                    files_changed: vec!["a.tsx".to_string(), "b.go".to_string()],
                    ..Default::default()
                })
            }),
        );
        let team = Team::new("feature")
            .with_agents([frontend, backend])
            .with_strategy(Strategy::Parallel);

        let result = team.handle(task(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.output, "ui\napi");
        assert_eq!(result.files_changed, vec!["a.tsx", "b.go"]);
        assert_eq!(result.children.len(), 2);
    }

    #[tokio::test]
    async fn empty_selection_reports_no_agents() {
        let team = Team::new("ghost-town").with_router(Arc::new(DescriptionRouter));
        let result = team
            .handle(
                Task {
                    description: String::new(),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.output, "no agents selected");
    }

    #[tokio::test]
    async fn fail_fast_aborts_on_first_error() {
        let boom = Agent::new(
            "boom",
            "",
            handler_fn(|_| async { anyhow::bail!("exploded") }),
        );
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();
        let never = Agent::new(
            "never",
            "",
            handler_fn(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(TaskResult::default())
                }
            }),
        );

        let team = Team::new("fragile").with_agents([boom, never]);
        let err = team.handle(task(), &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("exploded"));
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn collect_errors_embeds_failures_as_children() {
        let boom = Agent::new(
            "boom",
            "",
            handler_fn(|_| async { anyhow::bail!("exploded") }),
        );
        let team = Team::new("resilient")
            .with_agents([boom, echo_agent("ok", "fine")])
            .with_error_policy(ErrorPolicy::CollectErrors);

        let result = team.handle(task(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.children.len(), 2);
        assert!(result.children[0].error.as_deref().unwrap().contains("exploded"));
        assert_eq!(result.children[1].output, "fine");
    }

    #[tokio::test]
    async fn guard_rejection_in_parallel_fails_the_whole_team() {
        struct RejectSecond;

        #[async_trait]
        impl TeamGuard for RejectSecond {
            async fn allow_agent(
                &self,
                agent_name: &str,
                _task: &Task,
                _state: &TeamGuardState,
            ) -> anyhow::Result<()> {
                if agent_name == "b" {
                    anyhow::bail!("agent b is not allowed");
                }
                Ok(())
            }
        }

        let team = Team::new("gated")
            .with_agents([echo_agent("a", "x"), echo_agent("b", "y")])
            .with_strategy(Strategy::Parallel)
            .with_guard(Arc::new(RejectSecond));

        let err = team.handle(task(), &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("guard rejected agent b"));
    }

    #[tokio::test]
    async fn cost_tracker_accounts_usage_per_agent() {
        let spender = Agent::new(
            "spender",
            "",
            handler_fn(|_| async {
                Ok(TaskResult {
                    usage: Usage {
                        total_cost_usd: 0.25,
                        ..Default::default()
                    },
                    ..Default::default()
                })
            }),
        );
        let tracker = Arc::new(Tracker::new());
        let team = Team::new("spenders")
            .with_agent(spender)
            .with_cost_tracker(tracker.clone());

        team.handle(task(), &CancellationToken::new()).await.unwrap();

        let steps = tracker.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step, "spenders/spender");
        assert!((tracker.total().total_cost_usd - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn nested_teams_compose_through_as_agent() {
        let inner = Arc::new(
            Team::new("inner")
                .with_description("handles backend work")
                .with_agents([echo_agent("db", "migrated"), echo_agent("api", "served")]),
        );
        let outer = Team::new("outer")
            .with_agent(echo_agent("docs", "documented"))
            .with_agent(inner.as_agent());

        let result = outer.handle(task(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.output, "documented\nmigrated\nserved");
        assert_eq!(result.children.len(), 2);
        // The nested team's own children survive aggregation.
        assert_eq!(result.children[1].agent_name, "inner");
        assert_eq!(result.children[1].children.len(), 2);
    }

    #[tokio::test]
    async fn parallel_cancellation_fills_unfinished_slots() {
        let cancel = CancellationToken::new();
        let stuck = Agent::new(
            "stuck",
            "",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(TaskResult::default())
            }),
        );
        let team = Arc::new(
            Team::new("interrupted")
                .with_agents([echo_agent("quick", "done"), stuck])
                .with_strategy(Strategy::Parallel),
        );

        let handle = {
            let team = team.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { team.handle(task(), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.children[0].output, "done");
        assert_eq!(result.children[1].error.as_deref(), Some("canceled"));
    }
}
