//! Run records: create, get, update, filtered listing.

use rusqlite::{Connection, Row, params};

use super::models::{Run, RunFilter};
use super::{
    DbHandle, SqlParam, decode_json, decode_ts, encode_json, encode_ts, is_unique_violation,
    push_scope_filter, where_clause,
};
use crate::errors::StoreError;

const RUN_COLUMNS: &str = "id, org_id, team_id, repo_id, user_id, status, prompt, \
     total_cost_usd, iterations, files_changed, duration_ms, created_at, updated_at";

#[derive(Clone)]
pub struct RunStore {
    db: DbHandle,
}

impl RunStore {
    pub(crate) fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Insert a new run. The caller supplies the id; timestamps are stamped
    /// here. Inserting an existing id is a conflict.
    pub async fn create(&self, run: &Run) -> Result<Run, StoreError> {
        if run.id.is_empty() {
            return Err(StoreError::InvalidArgument("run id is required".into()));
        }
        run.scope.validate()?;

        let mut run = run.clone();
        let now = chrono::Utc::now();
        run.created_at = now;
        run.updated_at = now;

        let stored = run.clone();
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO runs (id, org_id, team_id, repo_id, user_id, status, prompt,
                        total_cost_usd, iterations, files_changed, duration_ms, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        run.id,
                        run.scope.org_id,
                        run.scope.team_id,
                        run.scope.repo_id,
                        run.user_id,
                        run.status.as_str(),
                        run.prompt,
                        run.total_cost_usd,
                        run.iterations,
                        encode_json(&run.files_changed)?,
                        run.duration_ms,
                        encode_ts(run.created_at),
                        encode_ts(run.updated_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(StoreError::conflict("run", run.id.clone()))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Run>, StoreError> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"))?;
                let mut rows = stmt.query_map(params![id], row_to_run)?;
                match rows.next() {
                    Some(row) => Ok(Some(row??)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Update a run's mutable fields. Runs in a terminal state are immutable;
    /// updating a missing run is `NotFound`.
    pub async fn update(&self, run: &Run) -> Result<Run, StoreError> {
        let mut run = run.clone();
        run.updated_at = chrono::Utc::now();
        let stored = run.clone();
        self.db
            .call(move |conn| {
                let existing = get_by_id(conn, &run.id)?
                    .ok_or_else(|| StoreError::not_found("run", run.id.clone()))?;
                if existing.status.is_terminal() {
                    return Err(StoreError::InvalidArgument(format!(
                        "run {} is terminal ({}) and cannot be updated",
                        run.id, existing.status
                    )));
                }
                conn.execute(
                    "UPDATE runs SET user_id = ?2, status = ?3, prompt = ?4, total_cost_usd = ?5,
                        iterations = ?6, files_changed = ?7, duration_ms = ?8, updated_at = ?9
                     WHERE id = ?1",
                    params![
                        run.id,
                        run.user_id,
                        run.status.as_str(),
                        run.prompt,
                        run.total_cost_usd,
                        run.iterations,
                        encode_json(&run.files_changed)?,
                        run.duration_ms,
                        encode_ts(run.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(stored)
    }

    /// List runs newest-first. Unset filter fields match everything.
    pub async fn list(&self, filter: RunFilter) -> Result<Vec<Run>, StoreError> {
        self.db
            .call(move |conn| {
                let mut clauses = Vec::new();
                let mut sql_params: Vec<SqlParam> = Vec::new();

                if let Some(scope) = &filter.scope {
                    push_scope_filter(scope, &mut clauses, &mut sql_params);
                }
                if let Some(user_id) = &filter.user_id {
                    clauses.push("user_id = ?".to_string());
                    sql_params.push(Box::new(user_id.clone()));
                }
                if let Some(status) = filter.status {
                    clauses.push("status = ?".to_string());
                    sql_params.push(Box::new(status.as_str()));
                }
                if let Some(since) = filter.since {
                    clauses.push("created_at >= ?".to_string());
                    sql_params.push(Box::new(encode_ts(since)));
                }
                if let Some(until) = filter.until {
                    clauses.push("created_at <= ?".to_string());
                    sql_params.push(Box::new(encode_ts(until)));
                }

                let limit = filter.limit.map(i64::from).unwrap_or(-1);
                let offset = filter.offset.unwrap_or(0) as i64;
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM runs{} ORDER BY created_at DESC, id DESC \
                     LIMIT {limit} OFFSET {offset}",
                    where_clause(&clauses)
                );

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql_params), row_to_run)?;
                let mut runs = Vec::new();
                for row in rows {
                    runs.push(row??);
                }
                Ok(runs)
            })
            .await
    }
}

fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Run>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id], row_to_run)?;
    match rows.next() {
        Some(row) => Ok(Some(row??)),
        None => Ok(None),
    }
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Result<Run, StoreError>> {
    let status: String = row.get(5)?;
    let files: String = row.get(9)?;
    let created: String = row.get(11)?;
    let updated: String = row.get(12)?;

    let run = (|| {
        Ok::<Run, StoreError>(Run {
            id: row.get(0)?,
            scope: crate::scope::Scope::new(
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ),
            user_id: row.get(4)?,
            status: status
                .parse()
                .map_err(|e: anyhow::Error| StoreError::Internal(e))?,
            prompt: row.get(6)?,
            total_cost_usd: row.get(7)?,
            iterations: row.get(8)?,
            files_changed: decode_json(&files)?,
            duration_ms: row.get(10)?,
            created_at: decode_ts(&created)?,
            updated_at: decode_ts(&updated)?,
        })
    })();
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::super::Store;
    use super::super::models::{Run, RunFilter, RunStatus};
    use crate::errors::StoreError;
    use crate::scope::Scope;

    fn sample_run(id: &str) -> Run {
        Run {
            id: id.to_string(),
            scope: Scope::new("acme", "web", "api"),
            user_id: "u1".to_string(),
            status: RunStatus::Pending,
            prompt: "add rate limiting".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.runs().create(&sample_run("r1")).await.unwrap();

        let got = store.runs().get("r1").await.unwrap().unwrap();
        assert_eq!(got.id, "r1");
        assert_eq!(got.scope, Scope::new("acme", "web", "api"));
        assert_eq!(got.status, RunStatus::Pending);
        assert_eq!(got.prompt, "add rate limiting");
    }

    #[tokio::test]
    async fn get_missing_run_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.runs().get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_duplicate_id_is_conflict() {
        let store = Store::open_in_memory().unwrap();
        store.runs().create(&sample_run("r1")).await.unwrap();
        let err = store.runs().create(&sample_run("r1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn create_requires_id_and_valid_scope() {
        let store = Store::open_in_memory().unwrap();
        let mut run = sample_run("");
        assert!(matches!(
            store.runs().create(&run).await.unwrap_err(),
            StoreError::InvalidArgument(_)
        ));

        run.id = "r1".to_string();
        run.scope = Scope::new("", "team-without-org", "");
        assert!(store.runs().create(&run).await.is_err());
    }

    #[tokio::test]
    async fn update_advances_status_and_blocks_terminal_mutation() {
        let store = Store::open_in_memory().unwrap();
        let mut run = store.runs().create(&sample_run("r1")).await.unwrap();

        run.status = RunStatus::Running;
        store.runs().update(&run).await.unwrap();

        run.status = RunStatus::Passed;
        run.iterations = 2;
        run.total_cost_usd = 0.42;
        store.runs().update(&run).await.unwrap();

        let stored = store.runs().get("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Passed);
        assert_eq!(stored.iterations, 2);

        run.status = RunStatus::Failed;
        let err = store.runs().update(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn update_missing_run_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.runs().update(&sample_run("ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_scope_status_and_orders_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let runs = store.runs();

        runs.create(&sample_run("r1")).await.unwrap();
        runs.create(&sample_run("r2")).await.unwrap();
        let mut other = sample_run("r3");
        other.scope = Scope::new("globex", "infra", "db");
        runs.create(&other).await.unwrap();

        let all = runs.list(RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let acme = runs
            .list(RunFilter {
                scope: Some(Scope::org("acme")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(acme.len(), 2);
        // Newest first: r2 was created after r1.
        assert_eq!(acme[0].id, "r2");
        assert_eq!(acme[1].id, "r1");

        let pending = runs
            .list(RunFilter {
                status: Some(RunStatus::Pending),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
