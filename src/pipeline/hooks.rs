//! Fine-grained lifecycle hooks.
//!
//! All fields are optional; unset hooks are silently ignored. Hooks observe
//! progress only: every invocation is wrapped in a panic boundary so a
//! misbehaving callback can never affect the run outcome.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tracing::warn;

use super::review::ReviewResult;
use super::roles::{ExecuteResult, Plan, RefactorResult, TestResult};
use crate::cost::Usage;

/// Optional per-phase callbacks fired as the runner progresses.
#[derive(Default)]
pub struct Hooks {
    pub on_plan_complete: Option<Box<dyn Fn(Option<&Plan>, Option<&str>) + Send + Sync>>,
    pub on_execute_complete: Option<Box<dyn Fn(Option<&ExecuteResult>, Option<&str>) + Send + Sync>>,
    pub on_test_complete: Option<Box<dyn Fn(Option<&TestResult>, u32) + Send + Sync>>,
    pub on_review_complete: Option<Box<dyn Fn(&ReviewResult, u32) + Send + Sync>>,
    pub on_refactor_complete: Option<Box<dyn Fn(&RefactorResult, u32) + Send + Sync>>,
    pub on_iteration_complete: Option<Box<dyn Fn(u32, bool) + Send + Sync>>,
    pub on_cost_update: Option<Box<dyn Fn(&str, Usage) + Send + Sync>>,
    pub on_step_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_step_end: Option<Box<dyn Fn(&str, Duration, Option<&str>) + Send + Sync>>,
}

impl Hooks {
    fn shielded(name: &str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            warn!("hook {name} panicked; ignoring");
        }
    }

    pub(crate) fn fire_plan_complete(&self, plan: Option<&Plan>, err: Option<&str>) {
        if let Some(hook) = &self.on_plan_complete {
            Self::shielded("on_plan_complete", || hook(plan, err));
        }
    }

    pub(crate) fn fire_execute_complete(&self, result: Option<&ExecuteResult>, err: Option<&str>) {
        if let Some(hook) = &self.on_execute_complete {
            Self::shielded("on_execute_complete", || hook(result, err));
        }
    }

    pub(crate) fn fire_test_complete(&self, result: Option<&TestResult>, iteration: u32) {
        if let Some(hook) = &self.on_test_complete {
            Self::shielded("on_test_complete", || hook(result, iteration));
        }
    }

    pub(crate) fn fire_review_complete(&self, result: &ReviewResult, iteration: u32) {
        if let Some(hook) = &self.on_review_complete {
            Self::shielded("on_review_complete", || hook(result, iteration));
        }
    }

    pub(crate) fn fire_refactor_complete(&self, result: &RefactorResult, iteration: u32) {
        if let Some(hook) = &self.on_refactor_complete {
            Self::shielded("on_refactor_complete", || hook(result, iteration));
        }
    }

    pub(crate) fn fire_iteration_complete(&self, iteration: u32, passed: bool) {
        if let Some(hook) = &self.on_iteration_complete {
            Self::shielded("on_iteration_complete", || hook(iteration, passed));
        }
    }

    pub(crate) fn fire_cost_update(&self, step: &str, usage: Usage) {
        if let Some(hook) = &self.on_cost_update {
            Self::shielded("on_cost_update", || hook(step, usage));
        }
    }

    pub(crate) fn fire_step_start(&self, step: &str) {
        if let Some(hook) = &self.on_step_start {
            Self::shielded("on_step_start", || hook(step));
        }
    }

    pub(crate) fn fire_step_end(&self, step: &str, duration: Duration, err: Option<&str>) {
        if let Some(hook) = &self.on_step_end {
            Self::shielded("on_step_end", || hook(step, duration, err));
        }
    }
}
