//! Policy endpoints.

use axum::Json;
use axum::extract::State;

use super::{ApiError, ScopeHeaders, SharedState, parse_json};
use crate::store::models::Policy;

/// The policy stored at exactly the request scope; `null` when never set.
pub(super) async fn get_policy(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
) -> Result<Json<Option<Policy>>, ApiError> {
    Ok(Json(state.store.policies().get(scope).await?))
}

pub(super) async fn put_policy(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    body: String,
) -> Result<Json<Policy>, ApiError> {
    let mut policy: Policy = parse_json(&body)?;
    if policy.scope.is_empty() {
        policy.scope = scope;
    }
    state.store.policies().set(&policy).await?;
    let stored = state
        .store
        .policies()
        .get(policy.scope.clone())
        .await?
        .ok_or_else(|| ApiError::Internal("policy missing after upsert".to_string()))?;
    Ok(Json(stored))
}

/// The effective policy for the request scope, merged across all ancestor
/// scopes; `null` when no ancestor sets one.
pub(super) async fn effective(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
) -> Result<Json<Option<Policy>>, ApiError> {
    Ok(Json(state.policy_engine.effective_policy(scope).await?))
}
