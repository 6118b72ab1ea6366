//! The execute → test → review → refactor orchestrator.
//!
//! A runner drives caller-supplied roles through an optional planning step,
//! one execution step, then up to `max_iterations` review/refactor cycles.
//! The run always completes with a terminal status in its result; `run`
//! itself never fails.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::config::{PipelineStatus, RunResult, RunnerConfig, StepRecord};
use super::guard::{Guard, GuardState};
use super::hooks::Hooks;
use super::issues::IssueHistory;
use super::observer::Observer;
use super::review::{Issue, Reviewer, Severity};
use super::roles::{Developer, ExecuteResult, Planner, Request, Tester};
use crate::cost::Tracker;
use crate::errors::PipelineError;

/// Orchestrates one pipeline run at a time over a fixed set of roles.
pub struct Runner {
    developer: Arc<dyn Developer>,
    reviewer: Arc<dyn Reviewer>,
    tester: Option<Arc<dyn Tester>>,
    planner: Option<Arc<dyn Planner>>,
    guard: Option<Arc<dyn Guard>>,
    observer: Option<Arc<dyn Observer>>,
    hooks: Hooks,
    cost_tracker: Option<Arc<Tracker>>,
    config: RunnerConfig,
    issue_history: Mutex<IssueHistory>,
}

impl Runner {
    /// A runner with the two required roles and default configuration.
    pub fn new(developer: Arc<dyn Developer>, reviewer: Arc<dyn Reviewer>) -> Self {
        Self {
            developer,
            reviewer,
            tester: None,
            planner: None,
            guard: None,
            observer: None,
            hooks: Hooks::default(),
            cost_tracker: None,
            config: RunnerConfig::default(),
            issue_history: Mutex::new(IssueHistory::new()),
        }
    }

    pub fn with_tester(mut self, tester: Arc<dyn Tester>) -> Self {
        self.tester = Some(tester);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_cost_tracker(mut self, tracker: Arc<Tracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execute the full pipeline: plan → execute → (test → review →
    /// refactor)*. The result carries the terminal status; failures are
    /// never surfaced as an `Err`.
    pub async fn run(&self, req: &Request, cancel: &CancellationToken) -> RunResult {
        let start = Instant::now();
        let mut result = RunResult::default();

        self.observe_run_start(req).await;
        self.run_inner(req, cancel, start, &mut result).await;

        result.duration = start.elapsed();
        result.cost = self.cost_tracker.as_ref().map(|t| t.snapshot());
        result.issue_stats = Some(
            self.issue_history
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .stats(),
        );

        self.observe_run_complete(&result).await;
        result
    }

    async fn run_inner(
        &self,
        req: &Request,
        cancel: &CancellationToken,
        start: Instant,
        result: &mut RunResult,
    ) {
        // --- 1. Plan (optional) ---
        if let Some(planner) = &self.planner {
            let state = self.guard_state(start, 0, 0);
            match self
                .step("plan", state, &mut result.steps, cancel, planner.plan(req))
                .await
            {
                Ok(plan) => {
                    self.hooks.fire_plan_complete(Some(&plan), None);
                    result.plan = Some(plan);
                }
                Err(PipelineError::Role { step, source }) => {
                    let msg = source.to_string();
                    self.hooks.fire_plan_complete(None, Some(&msg));
                    if !self.config.skip_planning_on_error {
                        result.status = PipelineStatus::Error;
                        result.error = Some(PipelineError::Role { step, source });
                        return;
                    }
                    // Continue without a plan.
                }
                Err(err) => {
                    result.status = terminal_status(&err);
                    result.error = Some(err);
                    return;
                }
            }
        }

        // --- 2. Execute ---
        let state = self.guard_state(start, 0, 0);
        let exec = match self
            .step(
                "execute",
                state,
                &mut result.steps,
                cancel,
                self.developer.execute(req, result.plan.as_ref()),
            )
            .await
        {
            Ok(exec) => {
                self.hooks.fire_execute_complete(Some(&exec), None);
                exec
            }
            Err(err) => {
                if let PipelineError::Role { source, .. } = &err {
                    self.hooks
                        .fire_execute_complete(None, Some(&source.to_string()));
                    result.status = PipelineStatus::ExecuteFailed;
                } else {
                    result.status = terminal_status(&err);
                }
                result.error = Some(err);
                return;
            }
        };

        let mut current = exec;

        // --- 3. Review loop ---
        match self
            .review_loop(req, cancel, start, result, &mut current)
            .await
        {
            Ok(true) => result.status = PipelineStatus::Passed,
            Ok(false) => result.status = PipelineStatus::MaxIterations,
            Err(err) => {
                result.status = terminal_status(&err);
                result.error = Some(err);
            }
        }

        result.final_diff = current.diff;
        result.files_changed = current.files_changed;
    }

    /// Runs the bounded (test → review → refactor) loop. Returns whether the
    /// review passed before the iteration cap.
    async fn review_loop(
        &self,
        req: &Request,
        cancel: &CancellationToken,
        start: Instant,
        result: &mut RunResult,
        current: &mut ExecuteResult,
    ) -> Result<bool, PipelineError> {
        for i in 1..=self.config.max_iterations {
            result.iterations = i;

            if cancel.is_cancelled() {
                return Err(PipelineError::Canceled);
            }

            // 3a. Test (optional).
            let mut synthetic: Option<Issue> = None;
            let mut review_diff = current.diff.clone();
            if let Some(tester) = &self.tester {
                if self.config.test_before_review {
                    let state = self.guard_state(start, i, current.files_changed.len());
                    match self
                        .step(
                            &format!("test_{i}"),
                            state,
                            &mut result.steps,
                            cancel,
                            tester.test(req, &current.files_changed),
                        )
                        .await
                    {
                        Ok(test) => {
                            self.hooks.fire_test_complete(Some(&test), i);
                            if self.config.fail_on_test_failure && !test.passed {
                                synthetic = Some(Issue {
                                    severity: Severity::Critical,
                                    description: format!(
                                        "Tests failed: {}",
                                        format_failed_tests(&test.failed_tests)
                                    ),
                                    suggestion: "Fix the failing tests before proceeding."
                                        .to_string(),
                                    ..Default::default()
                                });
                                review_diff = augment_diff_with_test_failure(&current.diff, &test);
                            }
                            result.test_result = Some(test);
                        }
                        // A tester error skips testing for this iteration.
                        Err(PipelineError::Role { .. }) => {
                            self.hooks.fire_test_complete(None, i);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }

            // 3b. Review.
            let state = self.guard_state(start, i, current.files_changed.len());
            let mut review = self
                .step(
                    &format!("review_{i}"),
                    state,
                    &mut result.steps,
                    cancel,
                    self.reviewer.review(&review_diff, &req.description),
                )
                .await?;
            self.hooks.fire_review_complete(&review, i);

            // A failed test surfaces as a critical issue alongside the
            // reviewer's own findings.
            if let Some(issue) = synthetic.take() {
                review.issues.push(issue);
            }
            if !review.issues.is_empty() {
                self.issue_history
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record_iteration(&review.issues);
            }

            let review_passed = review.passed;
            result.review_result = Some(review);

            // 3c. Pass check: the review must pass and any recorded test
            // result must not veto it.
            let tests_ok = result.test_result.as_ref().is_none_or(|t| t.passed)
                || !self.config.fail_on_test_failure;
            if review_passed && tests_ok {
                self.hooks.fire_iteration_complete(i, true);
                return Ok(true);
            }
            self.hooks.fire_iteration_complete(i, false);

            // 3d. Refactor, unless this was the last iteration.
            if i < self.config.max_iterations {
                let (issues, guidance) = result
                    .review_result
                    .as_ref()
                    .map(|r| (r.issues.clone(), r.guidance.clone()))
                    .unwrap_or_default();

                let state = self.guard_state(start, i, current.files_changed.len());
                let refactor = self
                    .step(
                        &format!("refactor_{i}"),
                        state,
                        &mut result.steps,
                        cancel,
                        self.developer.refactor(req, &issues, &guidance, current),
                    )
                    .await?;
                self.hooks.fire_refactor_complete(&refactor, i);

                *current = ExecuteResult {
                    files_changed: refactor.files_changed,
                    diff: refactor.diff,
                    summary: refactor.summary,
                };
            }
        }

        Ok(false)
    }

    /// Gate, time, and record one role step. The role future is raced
    /// against the cancellation token; cancellation drops it.
    async fn step<T>(
        &self,
        name: &str,
        state: GuardState,
        steps: &mut Vec<StepRecord>,
        cancel: &CancellationToken,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, PipelineError> {
        if let Some(guard) = &self.guard {
            if let Err(rejection) = guard.allow_step(name, &state).await {
                let reason = rejection.to_string();
                steps.push(StepRecord {
                    name: name.to_string(),
                    duration: Duration::ZERO,
                    error: Some(reason.clone()),
                });
                return Err(PipelineError::PolicyViolation {
                    step: name.to_string(),
                    reason,
                });
            }
        }

        self.hooks.fire_step_start(name);
        self.observe_step_start(name).await;

        let cost_before = self.cost_tracker.as_ref().map(|t| t.total());
        let start = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            out = fut => Some(out),
        };
        let duration = start.elapsed();

        let (out, err_text) = match outcome {
            None => (
                Err(PipelineError::Canceled),
                Some("canceled".to_string()),
            ),
            Some(Ok(value)) => (Ok(value), None),
            Some(Err(source)) => {
                let msg = source.to_string();
                (
                    Err(PipelineError::Role {
                        step: name.to_string(),
                        source,
                    }),
                    Some(msg),
                )
            }
        };

        self.hooks.fire_step_end(name, duration, err_text.as_deref());
        self.observe_step_complete(name, duration, err_text.as_deref())
            .await;

        if let Some(tracker) = &self.cost_tracker {
            let delta = tracker.total().since(&cost_before.unwrap_or_default());
            if !delta.is_empty() {
                self.hooks.fire_cost_update(name, delta);
            }
        }

        steps.push(StepRecord {
            name: name.to_string(),
            duration,
            error: err_text,
        });
        out
    }

    fn guard_state(&self, start: Instant, iterations: u32, files_changed: usize) -> GuardState {
        GuardState {
            iterations,
            elapsed: start.elapsed(),
            total_cost_usd: self
                .cost_tracker
                .as_ref()
                .map(|t| t.total().total_cost_usd)
                .unwrap_or(0.0),
            files_changed,
        }
    }

    // Observer calls are panic-shielded; a telemetry failure must not
    // affect the run.

    async fn observe_run_start(&self, req: &Request) {
        if let Some(observer) = &self.observer {
            let _ = AssertUnwindSafe(observer.on_run_start(req))
                .catch_unwind()
                .await;
        }
    }

    async fn observe_run_complete(&self, result: &RunResult) {
        if let Some(observer) = &self.observer {
            let _ = AssertUnwindSafe(observer.on_run_complete(result))
                .catch_unwind()
                .await;
        }
    }

    async fn observe_step_start(&self, step: &str) {
        if let Some(observer) = &self.observer {
            let _ = AssertUnwindSafe(observer.on_step_start(step))
                .catch_unwind()
                .await;
        }
    }

    async fn observe_step_complete(&self, step: &str, duration: Duration, err: Option<&str>) {
        if let Some(observer) = &self.observer {
            let _ = AssertUnwindSafe(observer.on_step_complete(step, duration, err))
                .catch_unwind()
                .await;
        }
    }
}

fn terminal_status(err: &PipelineError) -> PipelineStatus {
    match err {
        PipelineError::Canceled => PipelineStatus::Canceled,
        _ => PipelineStatus::Error,
    }
}

fn format_failed_tests(names: &[String]) -> String {
    match names {
        [] => "one or more tests failed".to_string(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{first} and {} more", rest.len()),
    }
}

/// Appends the failing test output beneath the diff so the reviewer sees
/// what went wrong.
fn augment_diff_with_test_failure(diff: &str, test: &super::roles::TestResult) -> String {
    if test.passed {
        return diff.to_string();
    }
    format!("{diff}\n\n# Test Failures\n{}", test.output)
}
