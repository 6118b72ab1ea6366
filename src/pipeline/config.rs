//! Runner configuration, terminal statuses, and the run result.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::issues::IssueStats;
use super::review::ReviewResult;
use super::roles::{Plan, TestResult};
use crate::cost::TrackerSnapshot;
use crate::errors::PipelineError;

/// Controls runner behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Max review/refactor cycles.
    pub max_iterations: u32,
    /// Run tests before each review when a tester is present.
    pub test_before_review: bool,
    /// Treat a test failure as a synthetic critical review issue.
    pub fail_on_test_failure: bool,
    /// Continue without a plan if the planner errors.
    pub skip_planning_on_error: bool,
    /// Handed to a checkpoint collaborator. Empty = no checkpointing.
    #[serde(default)]
    pub checkpoint_dir: String,
    /// Checkpoint id to resume from. Empty = fresh start.
    #[serde(default)]
    pub resume_from: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            test_before_review: true,
            fail_on_test_failure: true,
            skip_planning_on_error: true,
            checkpoint_dir: String::new(),
            resume_from: String::new(),
        }
    }
}

/// The terminal outcome of a run. Set exactly once at pipeline end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Review passed.
    Passed,
    /// Hit the iteration cap without passing.
    MaxIterations,
    /// The execute step failed.
    ExecuteFailed,
    /// The run was canceled.
    Canceled,
    /// Guard rejection, role failure after execute, or planner failure.
    Error,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Passed => "passed",
            PipelineStatus::MaxIterations => "max_iterations",
            PipelineStatus::ExecuteFailed => "execute_failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timing and outcome for a single executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: String,
    pub duration: Duration,
    pub error: Option<String>,
}

/// The final output of a run.
///
/// The runner always returns one of these; pipeline failures are expressed
/// as a terminal status plus `error`, never as an `Err` from the call.
#[derive(Debug)]
pub struct RunResult {
    pub status: PipelineStatus,
    pub iterations: u32,
    pub plan: Option<Plan>,
    pub final_diff: String,
    pub files_changed: Vec<String>,
    pub review_result: Option<ReviewResult>,
    pub test_result: Option<TestResult>,
    pub cost: Option<TrackerSnapshot>,
    pub issue_stats: Option<IssueStats>,
    pub duration: Duration,
    pub error: Option<PipelineError>,
    pub steps: Vec<StepRecord>,
}

impl Default for RunResult {
    fn default() -> Self {
        Self {
            status: PipelineStatus::Error,
            iterations: 0,
            plan: None,
            final_diff: String::new(),
            files_changed: Vec::new(),
            review_result: None,
            test_result: None,
            cost: None,
            issue_stats: None,
            duration: Duration::ZERO,
            error: None,
            steps: Vec::new(),
        }
    }
}

impl RunResult {
    /// Names of the executed steps, in invocation order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.max_iterations, 3);
        assert!(cfg.test_before_review);
        assert!(cfg.fail_on_test_failure);
        assert!(cfg.skip_planning_on_error);
        assert!(cfg.checkpoint_dir.is_empty());
    }

    #[test]
    fn status_names_are_stable() {
        assert_eq!(PipelineStatus::Passed.as_str(), "passed");
        assert_eq!(PipelineStatus::MaxIterations.as_str(), "max_iterations");
        assert_eq!(PipelineStatus::ExecuteFailed.as_str(), "execute_failed");
        assert_eq!(PipelineStatus::Canceled.as_str(), "canceled");
        assert_eq!(PipelineStatus::Error.as_str(), "error");
    }
}
