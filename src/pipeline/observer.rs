//! Structured run observation.
//!
//! The observer is the coarse-grained counterpart to [`super::hooks::Hooks`]:
//! it receives run- and step-level events in a form suitable for external
//! telemetry, such as publication onto the event bus. Observer failures and
//! panics never affect the run outcome.

use std::time::Duration;

use async_trait::async_trait;

use super::config::RunResult;
use super::roles::Request;

/// Receives runner lifecycle events. All methods default to no-ops so
/// implementations override only what they need.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_run_start(&self, _req: &Request) {}
    async fn on_run_complete(&self, _result: &RunResult) {}
    async fn on_step_start(&self, _step: &str) {}
    async fn on_step_complete(&self, _step: &str, _duration: Duration, _error: Option<&str>) {}
}

/// Ignores all events.
pub struct NopObserver;

#[async_trait]
impl Observer for NopObserver {}
