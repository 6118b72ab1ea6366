//! Memory endpoints: patterns and preferences.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use super::{ApiError, ScopeHeaders, SharedState, parse_json};
use crate::store::models::{Pattern, Preferences};

/// Merged patterns visible at the request scope (ancestor levels included).
pub(super) async fn list_patterns(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
) -> Result<Json<Vec<Pattern>>, ApiError> {
    Ok(Json(state.memory.merged_patterns(scope).await?))
}

pub(super) async fn create_pattern(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    body: String,
) -> Result<(StatusCode, Json<Pattern>), ApiError> {
    let mut pattern: Pattern = parse_json(&body)?;
    if pattern.scope.is_empty() {
        pattern.scope = scope;
    }
    state.store.memory().create_pattern(&pattern).await?;
    Ok((StatusCode::CREATED, Json(pattern)))
}

/// Preferences for exactly the request scope; JSON `null` when never set.
pub(super) async fn get_preferences(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
) -> Result<Json<Option<Preferences>>, ApiError> {
    Ok(Json(state.store.memory().get_preferences(scope).await?))
}

pub(super) async fn put_preferences(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    body: String,
) -> Result<Json<Preferences>, ApiError> {
    let mut prefs: Preferences = parse_json(&body)?;
    if prefs.scope.is_empty() {
        prefs.scope = scope;
    }
    state.store.memory().set_preferences(&prefs).await?;
    let stored = state
        .store
        .memory()
        .get_preferences(prefs.scope.clone())
        .await?
        .ok_or_else(|| ApiError::Internal("preferences missing after upsert".to_string()))?;
    Ok(Json(stored))
}
