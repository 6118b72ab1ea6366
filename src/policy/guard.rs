//! Policy-backed pipeline guard.
//!
//! Reads the effective policy before each step and rejects when the run has
//! exceeded its cost or files-changed caps. A rejection publishes a
//! `policy.violation` event. If the policy cannot be read, the guard fails
//! open and allows the step.

use async_trait::async_trait;
use tracing::warn;

use super::engine::Engine;
use crate::bus::{EventBus, subjects};
use crate::pipeline::{Guard, GuardState};
use crate::scope::Scope;
use crate::store::models::Event;

pub struct PolicyGuard {
    engine: Engine,
    scope: Scope,
    bus: Option<EventBus>,
}

impl PolicyGuard {
    pub fn new(engine: Engine, scope: Scope) -> Self {
        Self {
            engine,
            scope,
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    async fn publish_violation(&self, step: &str, reason: &str) {
        let Some(bus) = &self.bus else { return };
        let event = Event::new(self.scope.clone(), subjects::TYPE_POLICY_VIOLATION)
            .with_name("policy_violation")
            .with_message(reason)
            .with_data("step", step)
            .with_data("reason", reason);
        if let Err(e) = bus.publish(&event).await {
            warn!("publish policy.violation: {e}");
        }
    }
}

#[async_trait]
impl Guard for PolicyGuard {
    async fn allow_step(&self, step: &str, state: &GuardState) -> anyhow::Result<()> {
        let policy = match self.engine.effective_policy(self.scope.clone()).await {
            Ok(Some(policy)) => policy,
            // No policy, or the read failed: allow the step.
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("read effective policy, failing open: {e}");
                return Ok(());
            }
        };

        if policy.max_cost_per_run > 0.0 && state.total_cost_usd > policy.max_cost_per_run {
            let reason = format!(
                "cost budget exceeded: ${:.4} > ${:.4} limit",
                state.total_cost_usd, policy.max_cost_per_run
            );
            self.publish_violation(step, &reason).await;
            anyhow::bail!("policy violation: {reason}");
        }

        if policy.max_files_changed > 0 && state.files_changed > policy.max_files_changed as usize {
            let reason = format!(
                "files changed limit exceeded: {} > {}",
                state.files_changed, policy.max_files_changed
            );
            self.publish_violation(step, &reason).await;
            anyhow::bail!("policy violation: {reason}");
        }

        Ok(())
    }
}
