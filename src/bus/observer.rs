//! Publishes pipeline lifecycle events onto the bus.
//!
//! `BusObserver` implements the pipeline observer contract and turns run and
//! step events into `run.started`, `step.<name>`, and `run.completed`
//! platform events. `bus_hooks` covers the hook surface for
//! `iteration.complete`. Publish failures are logged and swallowed;
//! telemetry never affects a run.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{EventBus, subjects};
use crate::pipeline::{Hooks, Observer, Request, RunResult};
use crate::scope::Scope;
use crate::store::models::Event;

pub struct BusObserver {
    bus: EventBus,
    scope: Scope,
    run_id: String,
}

impl BusObserver {
    pub fn new(bus: EventBus, scope: Scope, run_id: impl Into<String>) -> Self {
        Self {
            bus,
            scope,
            run_id: run_id.into(),
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.bus.publish(&event).await {
            warn!("publish pipeline event: {e}");
        }
    }
}

#[async_trait]
impl Observer for BusObserver {
    async fn on_run_start(&self, req: &Request) {
        self.publish(
            Event::new(self.scope.clone(), subjects::TYPE_RUN_STARTED)
                .with_run_id(&self.run_id)
                .with_name("run_started")
                .with_data("title", req.title.clone()),
        )
        .await;
    }

    async fn on_run_complete(&self, result: &RunResult) {
        let mut event = Event::new(self.scope.clone(), subjects::TYPE_RUN_COMPLETED)
            .with_run_id(&self.run_id)
            .with_name("run_completed")
            .with_data("status", result.status.as_str())
            .with_data("iterations", result.iterations);
        if let Some(err) = &result.error {
            event = event.with_data("error", err.to_string());
        }
        self.publish(event).await;
    }

    async fn on_step_complete(&self, step: &str, duration: Duration, error: Option<&str>) {
        let mut event = Event::new(
            self.scope.clone(),
            format!("{}{step}", subjects::TYPE_STEP_PREFIX),
        )
        .with_run_id(&self.run_id)
        .with_name(step)
        .with_data("duration_ms", duration.as_millis() as u64);
        if let Some(error) = error {
            event = event.with_data("error", error);
        }
        self.publish(event).await;
    }
}

/// Hooks that publish `iteration.complete` events. Compose with caller
/// hooks as needed; publication happens on a spawned task so the
/// synchronous hook never blocks the run.
pub fn bus_hooks(bus: EventBus, scope: Scope, run_id: impl Into<String>) -> Hooks {
    let run_id = run_id.into();
    Hooks {
        on_iteration_complete: Some(Box::new(move |iteration, passed| {
            let bus = bus.clone();
            let event = Event::new(scope.clone(), subjects::TYPE_ITERATION_COMPLETE)
                .with_run_id(run_id.clone())
                .with_data("iteration", iteration)
                .with_data("passed", passed);
            tokio::spawn(async move {
                if let Err(e) = bus.publish(&event).await {
                    warn!("publish iteration.complete: {e}");
                }
            });
        })),
        ..Default::default()
    }
}
