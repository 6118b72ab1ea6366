//! Event endpoints: query and live SSE streaming.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;

use super::{ApiError, ScopeHeaders, SharedState, parse_rfc3339};
use crate::bus::subjects;
use crate::store::models::{Event, EventFilter};

#[derive(Deserialize)]
pub(super) struct EventsQuery {
    run_id: Option<String>,
    /// Comma-separated list of event types.
    types: Option<String>,
    since: Option<String>,
    limit: Option<u32>,
}

/// Persisted events matching the filter, newest first.
pub(super) async fn query(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let mut filter = EventFilter {
        run_id: query.run_id,
        limit: query.limit,
        ..Default::default()
    };
    if !scope.is_empty() {
        filter.scope = Some(scope);
    }
    if let Some(types) = query.types {
        filter.types = types
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(since) = query.since {
        filter.since = Some(parse_rfc3339(&since)?);
    }

    let mut events = state.store.events().query(filter).await?;
    events.reverse();
    Ok(Json(events))
}

/// Live event stream as Server-Sent Events. The subscription subject is
/// derived from the scope headers: team wildcard when org and team are set,
/// org wildcard when only org is set, everything otherwise. The connection
/// stays open until the client disconnects.
pub(super) async fn stream(
    State(state): State<SharedState>,
    ScopeHeaders(scope): ScopeHeaders,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subject = if !scope.org_id.is_empty() && !scope.team_id.is_empty() {
        subjects::team_wildcard(&scope.org_id, &scope.team_id)
    } else if !scope.org_id.is_empty() {
        subjects::org_wildcard(&scope.org_id)
    } else {
        subjects::ALL_EVENTS.to_string()
    };

    let mut subscription = state.bus.subscribe(&subject);
    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let data = match serde_json::to_string(&event) {
                Ok(data) => data,
                Err(_) => continue,
            };
            yield Ok(SseEvent::default().event(event.event_type).data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
