//! Mid-run gating.
//!
//! A guard is consulted before each step execution. A rejection terminates
//! the run with status `error` carrying the guard's reason.

use std::time::Duration;

use async_trait::async_trait;

/// Current run metrics a guard can base decisions on.
#[derive(Debug, Clone, Default)]
pub struct GuardState {
    pub iterations: u32,
    pub elapsed: Duration,
    pub total_cost_usd: f64,
    pub files_changed: usize,
}

/// Consulted before each step. Returning an error rejects the step and
/// terminates the run.
#[async_trait]
pub trait Guard: Send + Sync {
    async fn allow_step(&self, step: &str, state: &GuardState) -> anyhow::Result<()>;
}

/// Allows every step.
pub struct NopGuard;

#[async_trait]
impl Guard for NopGuard {
    async fn allow_step(&self, _step: &str, _state: &GuardState) -> anyhow::Result<()> {
        Ok(())
    }
}
