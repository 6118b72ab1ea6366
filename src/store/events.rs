//! Append-only event journal.
//!
//! `publish` appends one event; `query` returns matching events ascending by
//! creation time. Persisted events are never rewritten, so the same id always
//! queries back with the same body.

use std::collections::HashMap;

use rusqlite::{Row, params};
use serde_json::Value;

use super::models::{Event, EventFilter};
use super::{
    DbHandle, SqlParam, decode_json, decode_ts, encode_json, encode_ts, is_unique_violation,
    push_scope_filter,
};
use crate::errors::StoreError;
use crate::scope::Scope;

const EVENT_COLUMNS: &str =
    "id, run_id, org_id, team_id, repo_id, type, name, message, data, version, created_at";

#[derive(Clone)]
pub struct EventStore {
    db: DbHandle,
}

impl EventStore {
    pub(crate) fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Append one event. Missing id/version/timestamp are filled in; the
    /// type must be a non-empty dotted token.
    pub async fn publish(&self, event: &Event) -> Result<Event, StoreError> {
        if event.event_type.is_empty() {
            return Err(StoreError::InvalidArgument(
                "event type is required".into(),
            ));
        }
        event.scope.validate()?;

        let mut event = event.clone();
        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }
        if event.version == 0 {
            event.version = 1;
        }
        if event.created_at == chrono::DateTime::<chrono::Utc>::UNIX_EPOCH {
            event.created_at = chrono::Utc::now();
        }

        let stored = event.clone();
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO events (id, run_id, org_id, team_id, repo_id, type, name,
                        message, data, version, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        event.id,
                        event.run_id,
                        event.scope.org_id,
                        event.scope.team_id,
                        event.scope.repo_id,
                        event.event_type,
                        event.name,
                        event.message,
                        encode_json(&event.data)?,
                        event.version,
                        encode_ts(event.created_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(StoreError::conflict("event", event.id.clone()))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(stored)
    }

    /// Events matching the filter, ascending by creation time. When a limit
    /// is set, the *most recent* matching events are returned (still in
    /// ascending order).
    pub async fn query(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        self.db
            .call(move |conn| {
                let mut clauses = Vec::new();
                let mut sql_params: Vec<SqlParam> = Vec::new();

                if let Some(scope) = &filter.scope {
                    push_scope_filter(scope, &mut clauses, &mut sql_params);
                }
                if let Some(run_id) = &filter.run_id {
                    clauses.push("run_id = ?".to_string());
                    sql_params.push(Box::new(run_id.clone()));
                }
                if !filter.types.is_empty() {
                    let placeholders = vec!["?"; filter.types.len()].join(", ");
                    clauses.push(format!("type IN ({placeholders})"));
                    for t in &filter.types {
                        sql_params.push(Box::new(t.clone()));
                    }
                }
                if let Some(since) = filter.since {
                    clauses.push("created_at >= ?".to_string());
                    sql_params.push(Box::new(encode_ts(since)));
                }
                if let Some(until) = filter.until {
                    clauses.push("created_at <= ?".to_string());
                    sql_params.push(Box::new(encode_ts(until)));
                }

                let where_sql = if clauses.is_empty() {
                    String::new()
                } else {
                    format!(" WHERE {}", clauses.join(" AND "))
                };

                // rowid preserves insertion order for same-timestamp events.
                let sql = match filter.limit {
                    Some(limit) => format!(
                        "SELECT {EVENT_COLUMNS} FROM (
                            SELECT {EVENT_COLUMNS}, rowid AS rid FROM events{where_sql}
                            ORDER BY created_at DESC, rid DESC LIMIT {limit}
                         ) ORDER BY created_at, rid"
                    ),
                    None => format!(
                        "SELECT {EVENT_COLUMNS} FROM events{where_sql} ORDER BY created_at, rowid"
                    ),
                };

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql_params), row_to_event)?;
                let mut events = Vec::new();
                for row in rows {
                    events.push(row??);
                }
                Ok(events)
            })
            .await
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Result<Event, StoreError>> {
    let data: String = row.get(8)?;
    let created: String = row.get(10)?;
    let event = (|| {
        Ok::<Event, StoreError>(Event {
            id: row.get(0)?,
            run_id: row.get(1)?,
            scope: Scope::new(
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ),
            event_type: row.get(5)?,
            name: row.get(6)?,
            message: row.get(7)?,
            data: decode_json::<HashMap<String, Value>>(&data)?,
            version: row.get(9)?,
            created_at: decode_ts(&created)?,
        })
    })();
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use super::super::models::{Event, EventFilter};
    use crate::errors::StoreError;
    use crate::scope::Scope;

    #[tokio::test]
    async fn publish_fills_defaults_and_queries_back() {
        let store = Store::open_in_memory().unwrap();
        let events = store.events();

        let published = events
            .publish(
                &Event::new(Scope::team("acme", "web"), "run.started")
                    .with_run_id("r1")
                    .with_data("status", "pending"),
            )
            .await
            .unwrap();
        assert!(!published.id.is_empty());
        assert_eq!(published.version, 1);

        let all = events.query(EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].event_type, "run.started");
        assert_eq!(all[0].data["status"], "pending");
    }

    #[tokio::test]
    async fn publish_requires_a_type() {
        let store = Store::open_in_memory().unwrap();
        let mut event = Event::new(Scope::org("acme"), "x");
        event.event_type.clear();
        let err = store.events().publish(&event).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn query_orders_ascending_and_filters_by_type() {
        let store = Store::open_in_memory().unwrap();
        let events = store.events();
        let scope = Scope::team("acme", "web");

        for (id, kind) in [("e1", "run.started"), ("e2", "cost.recorded"), ("e3", "run.completed")]
        {
            let mut event = Event::new(scope.clone(), kind);
            event.id = id.to_string();
            events.publish(&event).await.unwrap();
        }

        let all = events.query(EventFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2", "e3"],
            "ascending by creation"
        );

        let run_events = events
            .query(EventFilter {
                types: vec!["run.started".to_string(), "run.completed".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(run_events.len(), 2);
    }

    #[tokio::test]
    async fn limit_keeps_the_most_recent_events() {
        let store = Store::open_in_memory().unwrap();
        let events = store.events();

        for i in 0..5 {
            let mut event = Event::new(Scope::org("acme"), "step.execute");
            event.id = format!("e{i}");
            events.publish(&event).await.unwrap();
        }

        let recent = events
            .query(EventFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            recent.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["e3", "e4"],
            "latest two, still ascending"
        );
    }

    #[tokio::test]
    async fn events_are_append_only() {
        let store = Store::open_in_memory().unwrap();
        let events = store.events();

        let mut event = Event::new(Scope::org("acme"), "run.started");
        event.id = "e1".to_string();
        events.publish(&event).await.unwrap();

        event.event_type = "run.completed".to_string();
        let err = events.publish(&event).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = events.query(EventFilter::default()).await.unwrap();
        assert_eq!(stored[0].event_type, "run.started");
    }
}
