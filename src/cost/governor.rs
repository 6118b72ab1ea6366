//! Org-level cost governance: durable usage records, budget evaluation,
//! and alert events.

use chrono::{Datelike, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;

use super::tracker::Usage;
use crate::bus::{EventBus, subjects};
use crate::errors::StoreError;
use crate::scope::Scope;
use crate::store::CostStore;
use crate::store::models::{Budget, Event, UsageFilter, UsageRecord};

/// Current spend vs limits for a scope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BudgetStatus {
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub at_limit: bool,
    pub alert_triggered: bool,
}

/// Records per-step usage, aggregates spend, and emits alert events.
#[derive(Clone)]
pub struct Governor {
    costs: CostStore,
    bus: Option<EventBus>,
}

impl Governor {
    pub fn new(costs: CostStore) -> Self {
        Self { costs, bus: None }
    }

    /// Attach a bus so `cost.recorded` and `budget.alert` events are
    /// published.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Append a usage record for one step, emit `cost.recorded`, then
    /// re-evaluate the scope budget and emit `budget.alert` when the alert
    /// threshold is crossed.
    pub async fn record_step(
        &self,
        run_id: &str,
        step: &str,
        usage: Usage,
        scope: Scope,
    ) -> Result<(), StoreError> {
        let record = UsageRecord {
            id: format!("{run_id}-{step}-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)),
            run_id: run_id.to_string(),
            scope: scope.clone(),
            step: step.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            total_cost_usd: usage.total_cost_usd,
            ..Default::default()
        };
        self.costs.record_usage(&record).await?;

        if let Some(bus) = &self.bus {
            let event = Event::new(scope.clone(), subjects::TYPE_COST_RECORDED)
                .with_run_id(run_id)
                .with_data("step", step)
                .with_data("cost_usd", usage.total_cost_usd);
            if let Err(e) = bus.publish(&event).await {
                warn!("publish cost.recorded: {e}");
            }
        }

        // Budget evaluation never fails the recording.
        if let Err(e) = self.check_budget(scope).await {
            warn!("budget check after record: {e}");
        }
        Ok(())
    }

    /// Spend since start of the UTC day and UTC month, compared against the
    /// scope's budget. `at_limit` means a limit is exceeded;
    /// `alert_triggered` means spend reached `limit × alert_at`, and a
    /// `budget.alert` event is emitted for the evaluation. Re-firing on
    /// subsequent evaluations is accepted; subscribers dedupe if needed.
    pub async fn check_budget(&self, scope: Scope) -> Result<BudgetStatus, StoreError> {
        let budget = self.costs.get_budget(scope.clone()).await?;
        let mut status = BudgetStatus {
            scope: scope.clone(),
            budget,
            ..Default::default()
        };
        let Some(budget) = status.budget.clone() else {
            return Ok(status);
        };

        let now = Utc::now();
        let day_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);

        let monthly = self
            .costs
            .get_usage(UsageFilter {
                scope: Some(scope.clone()),
                since: Some(month_start),
                until: Some(now),
                ..Default::default()
            })
            .await?;
        for record in &monthly {
            status.monthly_spend += record.total_cost_usd;
            if record.recorded_at >= day_start {
                status.daily_spend += record.total_cost_usd;
            }
        }

        if budget.daily_limit > 0.0 && status.daily_spend >= budget.daily_limit {
            status.at_limit = true;
        }
        if budget.monthly_limit > 0.0 && status.monthly_spend >= budget.monthly_limit {
            status.at_limit = true;
        }

        if budget.alert_at > 0.0 {
            if budget.daily_limit > 0.0 && status.daily_spend >= budget.daily_limit * budget.alert_at
            {
                status.alert_triggered = true;
            }
            if budget.monthly_limit > 0.0
                && status.monthly_spend >= budget.monthly_limit * budget.alert_at
            {
                status.alert_triggered = true;
            }
        }

        if status.alert_triggered {
            self.publish_alert(&status).await;
        }

        Ok(status)
    }

    async fn publish_alert(&self, status: &BudgetStatus) {
        let Some(bus) = &self.bus else { return };
        let event = Event::new(status.scope.clone(), subjects::TYPE_BUDGET_ALERT)
            .with_message(format!(
                "Budget alert: daily spend ${:.4}, monthly spend ${:.4}",
                status.daily_spend, status.monthly_spend
            ))
            .with_data("daily_spend", status.daily_spend)
            .with_data("monthly_spend", status.monthly_spend);
        if let Err(e) = bus.publish(&event).await {
            warn!("publish budget.alert: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::store::Store;
    use crate::store::models::EventFilter;

    fn governor() -> (Store, EventBus, Governor) {
        let store = Store::open_in_memory().unwrap();
        let bus = EventBus::new(store.events());
        let governor = Governor::new(store.costs()).with_bus(bus.clone());
        (store, bus, governor)
    }

    fn cost(usd: f64) -> Usage {
        Usage {
            total_cost_usd: usd,
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn record_step_appends_and_emits_cost_event() {
        let (store, _bus, governor) = governor();
        let scope = Scope::new("acme", "web", "api");

        governor
            .record_step("r1", "execute", cost(0.10), scope.clone())
            .await
            .unwrap();

        let records = store
            .costs()
            .get_usage(UsageFilter {
                run_id: Some("r1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step, "execute");

        let events = store
            .events()
            .query(EventFilter {
                types: vec![subjects::TYPE_COST_RECORDED.to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["step"], "execute");
    }

    #[tokio::test]
    async fn check_budget_without_budget_reports_zero() {
        let (_store, _bus, governor) = governor();
        let status = governor.check_budget(Scope::org("acme")).await.unwrap();
        assert!(status.budget.is_none());
        assert!(!status.at_limit);
        assert!(!status.alert_triggered);
    }

    #[tokio::test]
    async fn alert_triggers_at_threshold_without_hitting_limit() {
        let (store, _bus, governor) = governor();
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
            .record_step("r1", "execute", cost(0.90), scope.clone())
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
        assert!(!alerts.is_empty(), "a budget.alert event was emitted");
    }

    #[tokio::test]
    async fn at_limit_when_daily_limit_exceeded() {
        let (store, _bus, governor) = governor();
        let scope = Scope::org("acme");

        store
            .costs()
            .set_budget(&Budget {
                scope: scope.clone(),
                daily_limit: 0.50,
                alert_at: 0.8,
                ..Default::default()
            })
            .await
            .unwrap();

        governor
            .record_step("r1", "execute", cost(0.60), scope.clone())
            .await
            .unwrap();

        let status = governor.check_budget(scope).await.unwrap();
        assert!(status.at_limit);
        assert!(status.alert_triggered);
    }

    #[tokio::test]
    async fn org_budget_covers_child_scope_spend() {
        let (store, _bus, governor) = governor();

        store
            .costs()
            .set_budget(&Budget {
                scope: Scope::org("acme"),
                daily_limit: 1.00,
                alert_at: 0.8,
                ..Default::default()
            })
            .await
            .unwrap();

        governor
            .record_step("r1", "execute", cost(0.85), Scope::new("acme", "web", "api"))
            .await
            .unwrap();

        let status = governor.check_budget(Scope::org("acme")).await.unwrap();
        assert!((status.daily_spend - 0.85).abs() < 1e-9);
        assert!(status.alert_triggered);
    }
}
