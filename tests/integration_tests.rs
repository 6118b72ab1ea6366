//! Integration tests for Flotilla.
//!
//! These wire the pipeline engine, team orchestrator, and control plane
//! together the way the server does, and verify the end-to-end behaviors a
//! deployment depends on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flotilla::bus::observer::BusObserver;
use flotilla::bus::{EventBus, subjects};
use flotilla::cost::{Governor, Tracker, Usage};
use flotilla::memory::MemoryService;
use flotilla::pipeline::{
    Developer, ExecuteResult, Issue, PipelineStatus, Plan, RefactorResult, Request, ReviewResult,
    Reviewer, Runner, RunnerConfig, Severity,
};
use flotilla::policy::{Engine, PolicyGuard};
use flotilla::scope::Scope;
use flotilla::store::Store;
use flotilla::store::models::{Budget, Event, EventFilter, Policy, Run, RunFilter, RunStatus};
use flotilla::team::{
    Agent, ConcatAggregator, ErrorPolicy, Strategy, Task, TaskResult, Team, handler_fn,
};

// ── Shared fixtures ───────────────────────────────────────────────────

/// A developer that bills usage to a shared tracker on every call.
struct BillingDeveloper {
    tracker: Arc<Tracker>,
    cost_per_call: f64,
}

#[async_trait]
impl Developer for BillingDeveloper {
    async fn execute(&self, _req: &Request, _plan: Option<&Plan>) -> anyhow::Result<ExecuteResult> {
        self.tracker.add(
            "execute",
            Usage {
                total_cost_usd: self.cost_per_call,
                input_tokens: 1000,
                output_tokens: 400,
                ..Default::default()
            },
        );
        Ok(ExecuteResult {
            files_changed: vec!["main.go".to_string()],
            diff: "+x".to_string(),
            summary: "initial".to_string(),
        })
    }

    async fn refactor(
        &self,
        _req: &Request,
        _issues: &[Issue],
        _guidance: &str,
        prev: &ExecuteResult,
    ) -> anyhow::Result<RefactorResult> {
        self.tracker.add(
            "refactor",
            Usage {
                total_cost_usd: self.cost_per_call,
                ..Default::default()
            },
        );
        Ok(RefactorResult {
            files_changed: prev.files_changed.clone(),
            diff: format!("{}\n+err", prev.diff),
            summary: "reworked".to_string(),
        })
    }
}

struct ScriptedReviewer {
    script: Mutex<VecDeque<ReviewResult>>,
}

impl ScriptedReviewer {
    fn new(results: Vec<ReviewResult>) -> Self {
        Self {
            script: Mutex::new(results.into()),
        }
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    async fn review(&self, _diff: &str, _context: &str) -> anyhow::Result<ReviewResult> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("reviewer script exhausted"))
    }
}

fn passing(score: f64) -> ReviewResult {
    ReviewResult {
        passed: true,
        score,
        ..Default::default()
    }
}

fn failing(description: &str) -> ReviewResult {
    ReviewResult {
        passed: false,
        score: 4.0,
        issues: vec![Issue {
            severity: Severity::Major,
            description: description.to_string(),
            ..Default::default()
        }],
        guidance: "address the feedback".to_string(),
        ..Default::default()
    }
}

fn request() -> Request {
    Request {
        id: "req-1".to_string(),
        title: "add rate limiting".to_string(),
        description: "token bucket on the API edge".to_string(),
        ..Default::default()
    }
}

fn scope() -> Scope {
    Scope::new("acme", "web", "api")
}

// ── Pipeline scenarios ────────────────────────────────────────────────

mod pipeline_scenarios {
    use super::*;

    #[tokio::test]
    async fn happy_path_single_iteration() {
        let tracker = Arc::new(Tracker::new());
        let runner = Runner::new(
            Arc::new(BillingDeveloper {
                tracker: tracker.clone(),
                cost_per_call: 0.01,
            }),
            Arc::new(ScriptedReviewer::new(vec![passing(9.0)])),
        )
        .with_cost_tracker(tracker);

        let result = runner.run(&request(), &CancellationToken::new()).await;
        assert_eq!(result.status, PipelineStatus::Passed);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.final_diff, "+x");
        assert_eq!(result.files_changed, vec!["main.go"]);
        assert!((result.review_result.unwrap().score - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn refactor_then_pass_carries_the_new_diff() {
        let tracker = Arc::new(Tracker::new());
        let runner = Runner::new(
            Arc::new(BillingDeveloper {
                tracker: tracker.clone(),
                cost_per_call: 0.01,
            }),
            Arc::new(ScriptedReviewer::new(vec![
                failing("add error handling"),
                passing(8.0),
            ])),
        );

        let result = runner.run(&request(), &CancellationToken::new()).await;
        assert_eq!(result.status, PipelineStatus::Passed);
        assert_eq!(result.iterations, 2);
        assert!(result.final_diff.contains("+err"));
    }

    #[tokio::test]
    async fn exhausted_iterations_record_every_step() {
        let tracker = Arc::new(Tracker::new());
        let runner = Runner::new(
            Arc::new(BillingDeveloper {
                tracker: tracker.clone(),
                cost_per_call: 0.01,
            }),
            Arc::new(ScriptedReviewer::new(vec![
                failing("a"),
                failing("b"),
                failing("c"),
            ])),
        )
        .with_max_iterations(3);

        let result = runner.run(&request(), &CancellationToken::new()).await;
        assert_eq!(result.status, PipelineStatus::MaxIterations);
        assert_eq!(result.iterations, 3);
        assert_eq!(
            result.step_names(),
            vec![
                "execute",
                "review_1",
                "refactor_1",
                "review_2",
                "refactor_2",
                "review_3"
            ]
        );
    }

    #[tokio::test]
    async fn run_lifecycle_is_published_to_the_bus() {
        let store = Store::open_in_memory().unwrap();
        let bus = EventBus::new(store.events());
        let tracker = Arc::new(Tracker::new());

        let runner = Runner::new(
            Arc::new(BillingDeveloper {
                tracker: tracker.clone(),
                cost_per_call: 0.01,
            }),
            Arc::new(ScriptedReviewer::new(vec![passing(9.0)])),
        )
        .with_observer(Arc::new(BusObserver::new(bus.clone(), scope(), "r1")));

        let result = runner.run(&request(), &CancellationToken::new()).await;
        assert_eq!(result.status, PipelineStatus::Passed);

        let events = store.events().query(EventFilter::default()).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "run.started",
                "step.execute",
                "step.review_1",
                "run.completed"
            ]
        );
        let completed = events.last().unwrap();
        assert_eq!(completed.data["status"], "passed");
        assert_eq!(completed.run_id, "r1");
    }
}

// ── Policy enforcement ────────────────────────────────────────────────

mod policy_enforcement {
    use super::*;

    #[tokio::test]
    async fn merge_then_enforce_config() {
        let store = Store::open_in_memory().unwrap();
        store
            .policies()
            .set(&Policy {
                scope: Scope::org("acme"),
                max_iterations: 5,
                require_tests: true,
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .policies()
            .set(&Policy {
                scope: Scope::team("acme", "web"),
                max_iterations: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        let engine = Engine::new(store.policies());
        let effective = engine.effective_policy(scope()).await.unwrap().unwrap();
        assert_eq!(effective.max_iterations, 3);
        assert!(effective.require_tests);

        let enforced = engine
            .enforce_config(
                scope(),
                RunnerConfig {
                    max_iterations: 10,
                    test_before_review: false,
                    fail_on_test_failure: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(enforced.max_iterations, 3);
        assert!(enforced.test_before_review);
        assert!(enforced.fail_on_test_failure);
    }

    #[tokio::test]
    async fn guard_halts_run_on_cost_overrun() {
        let store = Store::open_in_memory().unwrap();
        store
            .policies()
            .set(&Policy {
                scope: Scope::org("acme"),
                max_cost_per_run: 0.50,
                ..Default::default()
            })
            .await
            .unwrap();

        let bus = EventBus::new(store.events());
        let tracker = Arc::new(Tracker::new());
        let guard = PolicyGuard::new(Engine::new(store.policies()), scope()).with_bus(bus.clone());

        // Each developer call bills $0.30: $0.30 after execute, $0.60 after
        // the first refactor, so iteration two's review is rejected.
        let runner = Runner::new(
            Arc::new(BillingDeveloper {
                tracker: tracker.clone(),
                cost_per_call: 0.30,
            }),
            Arc::new(ScriptedReviewer::new(vec![
                failing("a"),
                failing("b"),
                failing("c"),
            ])),
        )
        .with_cost_tracker(tracker)
        .with_guard(Arc::new(guard));

        let result = runner.run(&request(), &CancellationToken::new()).await;
        assert_eq!(result.status, PipelineStatus::Error);
        let error = result.error.unwrap().to_string();
        assert!(error.contains("cost budget exceeded"), "got: {error}");

        let violations = store
            .events()
            .query(EventFilter {
                types: vec![subjects::TYPE_POLICY_VIOLATION.to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].data["step"], "review_2");
        assert!(
            violations[0].data["reason"]
                .as_str()
                .unwrap()
                .contains("cost budget exceeded")
        );
    }
}

// ── Cost governance ───────────────────────────────────────────────────

mod cost_governance {
    use super::*;

    #[tokio::test]
    async fn alert_fires_at_eighty_percent_of_daily_budget() {
        let store = Store::open_in_memory().unwrap();
        let bus = EventBus::new(store.events());
        let governor = Governor::new(store.costs()).with_bus(bus.clone());
        let scope = Scope::org("acme");

        store
            .costs()
            .set_budget(&Budget {
                scope: scope.clone(),
                daily_limit: 1.00,
                alert_at: 0.8,
                ..Default::default()
            })
            .await
            .unwrap();

        governor
            .record_step(
                "r1",
                "execute",
                Usage {
                    total_cost_usd: 0.90,
                    ..Default::default()
                },
                scope.clone(),
            )
            .await
            .unwrap();

        let status = governor.check_budget(scope).await.unwrap();
        assert!((status.daily_spend - 0.90).abs() < 1e-9);
        assert!(status.alert_triggered);
        assert!(!status.at_limit);

        let alerts = store
            .events()
            .query(EventFilter {
                types: vec![subjects::TYPE_BUDGET_ALERT.to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!alerts.is_empty());
    }

    #[tokio::test]
    async fn run_cost_matches_the_sum_of_its_usage_records() {
        let store = Store::open_in_memory().unwrap();
        let governor = Governor::new(store.costs());

        let steps = [("execute", 0.10), ("review_1", 0.05), ("refactor_1", 0.07)];
        for (step, cost) in steps {
            governor
                .record_step(
                    "r1",
                    step,
                    Usage {
                        total_cost_usd: cost,
                        ..Default::default()
                    },
                    scope(),
                )
                .await
                .unwrap();
        }

        let total: f64 = store
            .costs()
            .get_usage(flotilla::store::models::UsageFilter {
                run_id: Some("r1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .iter()
            .map(|r| r.total_cost_usd)
            .sum();
        let expected: f64 = steps.iter().map(|(_, c)| c).sum();
        assert!((total - expected).abs() < 1e-9);

        let mut run = Run {
            id: "r1".to_string(),
            scope: scope(),
            ..Default::default()
        };
        store.runs().create(&run).await.unwrap();
        run.status = RunStatus::Passed;
        run.total_cost_usd = total;
        store.runs().update(&run).await.unwrap();

        let stored = store.runs().get("r1").await.unwrap().unwrap();
        assert!((stored.total_cost_usd - expected).abs() < 1e-9);
    }
}

// ── Team orchestration ────────────────────────────────────────────────

mod team_orchestration {
    use super::*;

    #[tokio::test]
    async fn parallel_team_merges_frontend_and_backend() {
        let frontend = Agent::new(
            "frontend",
            "UI work",
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
            "API work",
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
            .with_strategy(Strategy::Parallel)
            .with_aggregator(Arc::new(ConcatAggregator));

        let result = team
            .handle(
                Task {
                    id: "t1".to_string(),
                    description: "ship the feature".to_string(),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.output, "ui\napi");
        assert_eq!(result.files_changed, vec!["a.tsx", "b.go"]);
        assert_eq!(result.children.len(), 2);
    }

    #[tokio::test]
    async fn a_team_can_drive_the_pipeline_as_developer_and_reviewer() {
        use flotilla::team::adapter::{TeamDeveloper, TeamReviewer};

        let dev_team = Arc::new(Team::new("developers").with_agent(Agent::new(
            "solo-dev",
            "",
            handler_fn(|task: Task| async move {
                let diff = if task.id.ends_with("-refactor") {
                    "+x\n+fixed"
                } else {
                    "+x"
                };
                Ok(TaskResult {
                    output: "changed".to_string(),
                    files_changed: vec!["main.go".to_string()],
                    diff: diff.to_string(),
                    ..Default::default()
                })
            }),
        )));

        let calls = Arc::new(Mutex::new(0u32));
        let review_calls = calls.clone();
        let review_team = Arc::new(Team::new("reviewers").with_agent(Agent::new(
            "solo-reviewer",
            "",
            handler_fn(move |_task: Task| {
                let calls = review_calls.clone();
                async move {
                    let mut calls = calls.lock().unwrap();
                    *calls += 1;
                    let passed = *calls > 1;
                    Ok(TaskResult {
                        output: "reviewed".to_string(),
                        data: std::collections::HashMap::from([
                            ("passed".to_string(), serde_json::json!(passed)),
                            ("score".to_string(), serde_json::json!(8.0)),
                        ]),
                        ..Default::default()
                    })
                }
            }),
        )));

        let runner = Runner::new(
            Arc::new(TeamDeveloper::new(dev_team)),
            Arc::new(TeamReviewer::new(review_team)),
        );
        let result = runner.run(&request(), &CancellationToken::new()).await;

        assert_eq!(result.status, PipelineStatus::Passed);
        assert_eq!(result.iterations, 2);
        assert!(result.final_diff.contains("+fixed"));
    }

    #[tokio::test]
    async fn collect_errors_keeps_the_team_going() {
        let team = Team::new("resilient")
            .with_agents([
                Agent::new("boom", "", handler_fn(|_| async { anyhow::bail!("kaput") })),
                Agent::new(
                    "steady",
                    "",
                    handler_fn(|_| async {
                        Ok(TaskResult {
                            output: "done".to_string(),
                            ..Default::default()
                        })
                    }),
                ),
            ])
            .with_error_policy(ErrorPolicy::CollectErrors);

        let result = team
            .handle(Task::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.children.len(), 2);
        assert!(result.children[0].error.is_some());
        assert_eq!(result.children[1].output, "done");
    }
}

// ── Store laws ────────────────────────────────────────────────────────

mod store_laws {
    use super::*;

    #[tokio::test]
    async fn migrate_twice_then_use() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();

        store
            .runs()
            .create(&Run {
                id: "r1".to_string(),
                scope: scope(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.runs().list(RunFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn policy_set_get_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let policy = Policy {
            scope: Scope::org("acme"),
            max_iterations: 4,
            allowed_models: vec!["opus".to_string()],
            blocked_patterns: vec!["*.pem".to_string()],
            require_review: true,
            ..Default::default()
        };
        store.policies().set(&policy).await.unwrap();

        let stored = store.policies().get(Scope::org("acme")).await.unwrap().unwrap();
        assert_eq!(stored.max_iterations, policy.max_iterations);
        assert_eq!(stored.allowed_models, policy.allowed_models);
        assert_eq!(stored.blocked_patterns, policy.blocked_patterns);
        assert_eq!(stored.require_review, policy.require_review);
    }

    #[tokio::test]
    async fn budget_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let budget = Budget {
            scope: Scope::org("acme"),
            daily_limit: 2.0,
            monthly_limit: 40.0,
            alert_at: 0.9,
            ..Default::default()
        };
        store.costs().set_budget(&budget).await.unwrap();
        store.costs().set_budget(&budget).await.unwrap();

        let stored = store.costs().get_budget(Scope::org("acme")).await.unwrap().unwrap();
        assert!((stored.daily_limit - 2.0).abs() < f64::EPSILON);
        assert!((stored.monthly_limit - 40.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn persisted_events_never_change_for_an_id() {
        let store = Store::open_in_memory().unwrap();
        let bus = EventBus::new(store.events());

        let mut event = Event::new(scope(), "run.started");
        event.id = "e1".to_string();
        bus.publish(&event).await.unwrap();

        let first = store.events().query(EventFilter::default()).await.unwrap();

        // Republishing the same id fails and leaves the original intact.
        event.event_type = "run.completed".to_string();
        assert!(bus.publish(&event).await.is_err());

        let second = store.events().query(EventFilter::default()).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].event_type, second[0].event_type);
    }

    #[tokio::test]
    async fn learned_patterns_surface_through_the_memory_service() {
        let store = Store::open_in_memory().unwrap();
        let memory = MemoryService::new(store.memory());

        let run = Run {
            id: "r1".to_string(),
            scope: scope(),
            files_changed: vec!["src/limits.rs".to_string()],
            ..Default::default()
        };
        memory.learn_from_run(&run, 90).await.unwrap();

        let merged = memory.merged_patterns(scope()).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, "success");
        assert!(merged[0].matches_file("src/limits.rs"));
    }
}

// ── Event bus replay ──────────────────────────────────────────────────

mod bus_replay {
    use super::*;

    #[tokio::test]
    async fn replay_returns_everything_a_live_subscriber_saw() {
        let store = Store::open_in_memory().unwrap();
        let bus = EventBus::new(store.events());
        let mut live = bus.subscribe(&subjects::org_wildcard("acme"));

        for i in 0..4 {
            let mut event = Event::new(Scope::org("acme"), "step.execute");
            event.id = format!("e{i}");
            bus.publish(&event).await.unwrap();
        }

        let mut live_ids = Vec::new();
        for _ in 0..4 {
            live_ids.push(live.recv().await.unwrap().id);
        }

        let mut replayed = bus.replay(EventFilter::default()).await.unwrap();
        let mut replay_ids = Vec::new();
        while let Some(event) = replayed.recv().await {
            replay_ids.push(event.id);
        }
        assert_eq!(live_ids, replay_ids);
    }
}
