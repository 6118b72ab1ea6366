//! Cost endpoints: usage summaries and budgets.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use super::{ApiError, ScopeHeaders, SharedState, parse_json, parse_rfc3339};
use crate::store::models::{Budget, TimeGroup, UsageSummary};

#[derive(Deserialize)]
pub(super) struct SummaryQuery {
    group: Option<String>,
    since: Option<String>,
    until: Option<String>,
}

pub(super) async fn summary(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Vec<UsageSummary>>, ApiError> {
    let group = match query.group.as_deref() {
        None => TimeGroup::Day,
        Some(value) => value
            .parse::<TimeGroup>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    let since = query.since.as_deref().map(parse_rfc3339).transpose()?;
    let until = query.until.as_deref().map(parse_rfc3339).transpose()?;

    Ok(Json(
        state
            .store
            .costs()
            .get_usage_summary(scope, group, since, until)
            .await?,
    ))
}

/// The budget for exactly the request scope; JSON `null` when never set.
pub(super) async fn get_budget(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
) -> Result<Json<Option<Budget>>, ApiError> {
    Ok(Json(state.store.costs().get_budget(scope).await?))
}

pub(super) async fn put_budget(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    body: String,
) -> Result<Json<Budget>, ApiError> {
    let mut budget: Budget = parse_json(&body)?;
    if budget.scope.is_empty() {
        budget.scope = scope;
    }
    state.store.costs().set_budget(&budget).await?;
    let stored = state
        .store
        .costs()
        .get_budget(budget.scope.clone())
        .await?
        .ok_or_else(|| ApiError::Internal("budget missing after upsert".to_string()))?;
    Ok(Json(stored))
}

#[cfg(test)]
mod tests {
    use crate::cost::Usage;
    use crate::scope::Scope;
    use crate::server::testutil::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn summary_groups_recorded_usage() {
        let (_dir, state, app) = test_app().await;
        state
            .governor
            .record_step(
                "r1",
                "execute",
                Usage {
                    total_cost_usd: 0.10,
                    input_tokens: 100,
                    output_tokens: 20,
                    ..Default::default()
                },
                Scope::new("acme", "web", "api"),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/costs/summary?group=day")
                    .header("X-Scope-Org", "acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let summaries: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0]["total_runs"], 1);
    }

    #[tokio::test]
    async fn bad_group_and_bad_timestamp_are_400() {
        let (_dir, _state, app) = test_app().await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/costs/summary?group=fortnight")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/costs/summary?since=yesterday")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn budget_put_then_get_round_trips() {
        let (_dir, _state, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/costs/budget")
                    .header("X-Scope-Org", "acme")
                    .body(Body::from(
                        serde_json::json!({"daily_limit": 1.0, "alert_at": 0.8}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/costs/budget")
                    .header("X-Scope-Org", "acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["daily_limit"], 1.0);
        assert_eq!(value["alert_at"], 0.8);
    }
}
