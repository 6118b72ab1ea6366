//! Run endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::warn;

use super::{ApiError, ScopeHeaders, SharedState, parse_json, parse_rfc3339};
use crate::bus::subjects;
use crate::store::models::{Event, Run, RunFilter, RunStatus};

#[derive(Deserialize)]
pub(super) struct ListQuery {
    user_id: Option<String>,
    status: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

pub(super) async fn list(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let mut filter = RunFilter {
        user_id: query.user_id,
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };
    if !scope.is_empty() {
        filter.scope = Some(scope);
    }
    if let Some(status) = query.status {
        filter.status = Some(
            status
                .parse::<RunStatus>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        );
    }
    if let Some(since) = query.since {
        filter.since = Some(parse_rfc3339(&since)?);
    }
    if let Some(until) = query.until {
        filter.until = Some(parse_rfc3339(&until)?);
    }

    Ok(Json(state.store.runs().list(filter).await?))
}

pub(super) async fn create(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    body: String,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    let mut run: Run = parse_json(&body)?;
    if run.scope.is_empty() {
        run.scope = scope;
    }

    let stored = state.store.runs().create(&run).await?;

    let event = Event::new(stored.scope.clone(), subjects::TYPE_RUN_STARTED)
        .with_run_id(&stored.id)
        .with_name("run_created")
        .with_data("status", stored.status.as_str());
    if let Err(e) = state.bus.publish(&event).await {
        warn!("publish run.started for {}: {e}", stored.id);
    }

    Ok((StatusCode::CREATED, Json(stored)))
}

pub(super) async fn get_by_id(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    match state.store.runs().get(&id).await? {
        Some(run) => Ok(Json(run)),
        None => Err(ApiError::NotFound(format!("run {id} not found"))),
    }
}
