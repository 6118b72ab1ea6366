//! The pipeline engine: roles, configuration, guards, observation surfaces,
//! issue tracking, and the runner that drives them.

pub mod config;
pub mod guard;
pub mod hooks;
pub mod issues;
pub mod observer;
pub mod review;
pub mod roles;
pub mod runner;

pub use config::{PipelineStatus, RunResult, RunnerConfig, StepRecord};
pub use guard::{Guard, GuardState, NopGuard};
pub use hooks::Hooks;
pub use issues::{IssueHistory, IssueStats, TrackedIssue};
pub use observer::{NopObserver, Observer};
pub use review::{Issue, ReviewResult, Reviewer, Severity};
pub use roles::{Developer, ExecuteResult, Plan, Planner, RefactorResult, Request, TestResult, Tester};
pub use runner::Runner;
