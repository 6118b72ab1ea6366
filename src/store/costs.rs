//! Usage records and budgets.
//!
//! Usage records are append-only and immutable; budgets are a per-scope
//! singleton with upsert semantics.

use rusqlite::{Row, params};

use super::models::{Budget, TimeGroup, UsageFilter, UsageRecord, UsageSummary};
use super::{
    DbHandle, SqlParam, decode_ts, encode_ts, is_unique_violation, push_scope_filter, where_clause,
};
use crate::errors::StoreError;
use crate::scope::Scope;

const USAGE_COLUMNS: &str = "id, run_id, org_id, team_id, repo_id, step, input_tokens, \
     output_tokens, cache_read_tokens, cache_write_tokens, total_cost_usd, recorded_at";

#[derive(Clone)]
pub struct CostStore {
    db: DbHandle,
}

impl CostStore {
    pub(crate) fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Append a usage record. Records are never updated or deleted.
    pub async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        if record.id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "usage record id is required".into(),
            ));
        }
        record.scope.validate()?;
        let mut record = record.clone();
        if record.recorded_at == chrono::DateTime::<chrono::Utc>::UNIX_EPOCH {
            record.recorded_at = chrono::Utc::now();
        }

        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO usage_records (id, run_id, org_id, team_id, repo_id, step,
                        input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
                        total_cost_usd, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        record.id,
                        record.run_id,
                        record.scope.org_id,
                        record.scope.team_id,
                        record.scope.repo_id,
                        record.step,
                        record.input_tokens,
                        record.output_tokens,
                        record.cache_read_tokens,
                        record.cache_write_tokens,
                        record.total_cost_usd,
                        encode_ts(record.recorded_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(StoreError::conflict("usage record", record.id.clone()))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Usage records matching the filter, oldest first. A filter scope
    /// matches hierarchically: org-level scope covers every child record.
    pub async fn get_usage(&self, filter: UsageFilter) -> Result<Vec<UsageRecord>, StoreError> {
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
                if let Some(since) = filter.since {
                    clauses.push("recorded_at >= ?".to_string());
                    sql_params.push(Box::new(encode_ts(since)));
                }
                if let Some(until) = filter.until {
                    clauses.push("recorded_at <= ?".to_string());
                    sql_params.push(Box::new(encode_ts(until)));
                }

                let sql = format!(
                    "SELECT {USAGE_COLUMNS} FROM usage_records{} ORDER BY recorded_at, id",
                    where_clause(&clauses)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql_params), row_to_usage)?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row??);
                }
                Ok(records)
            })
            .await
    }

    /// Per-bucket totals for the scope within `[since, until]`, ordered by
    /// bucket.
    pub async fn get_usage_summary(
        &self,
        scope: Scope,
        group: TimeGroup,
        since: Option<chrono::DateTime<chrono::Utc>>,
        until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<UsageSummary>, StoreError> {
        self.db
            .call(move |conn| {
                let mut clauses = Vec::new();
                let mut sql_params: Vec<SqlParam> = Vec::new();
                push_scope_filter(&scope, &mut clauses, &mut sql_params);
                if let Some(since) = since {
                    clauses.push("recorded_at >= ?".to_string());
                    sql_params.push(Box::new(encode_ts(since)));
                }
                if let Some(until) = until {
                    clauses.push("recorded_at <= ?".to_string());
                    sql_params.push(Box::new(encode_ts(until)));
                }

                let sql = format!(
                    "SELECT strftime('{fmt}', recorded_at) AS period,
                        COUNT(DISTINCT run_id),
                        COALESCE(SUM(total_cost_usd), 0),
                        COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0)
                     FROM usage_records{filter}
                     GROUP BY period ORDER BY period",
                    fmt = group.strftime_format(),
                    filter = where_clause(&clauses),
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql_params), |row| {
                    Ok(UsageSummary {
                        period: row.get(0)?,
                        total_runs: row.get(1)?,
                        total_cost_usd: row.get(2)?,
                        input_tokens: row.get(3)?,
                        output_tokens: row.get(4)?,
                    })
                })?;
                let mut summaries = Vec::new();
                for row in rows {
                    summaries.push(row?);
                }
                Ok(summaries)
            })
            .await
    }

    /// The budget for exactly this scope, or `None` when never set.
    pub async fn get_budget(&self, scope: Scope) -> Result<Option<Budget>, StoreError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, org_id, team_id, repo_id, monthly_limit, daily_limit,
                        per_run_limit, alert_at, updated_at
                     FROM budgets WHERE org_id = ?1 AND team_id = ?2 AND repo_id = ?3",
                )?;
                let mut rows = stmt.query_map(
                    params![scope.org_id, scope.team_id, scope.repo_id],
                    row_to_budget,
                )?;
                match rows.next() {
                    Some(row) => Ok(Some(row??)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Insert or replace the budget for the scope.
    pub async fn set_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        budget.scope.validate()?;
        if budget.alert_at < 0.0 || budget.alert_at > 1.0 {
            return Err(StoreError::InvalidArgument(format!(
                "budget alert_at {} out of range (0, 1]",
                budget.alert_at
            )));
        }
        let mut budget = budget.clone();
        if budget.id.is_empty() {
            budget.id = uuid::Uuid::new_v4().to_string();
        }
        budget.updated_at = chrono::Utc::now();

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO budgets (id, org_id, team_id, repo_id, monthly_limit,
                        daily_limit, per_run_limit, alert_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(org_id, team_id, repo_id)
                     DO UPDATE SET monthly_limit = excluded.monthly_limit,
                        daily_limit = excluded.daily_limit,
                        per_run_limit = excluded.per_run_limit,
                        alert_at = excluded.alert_at,
                        updated_at = excluded.updated_at",
                    params![
                        budget.id,
                        budget.scope.org_id,
                        budget.scope.team_id,
                        budget.scope.repo_id,
                        budget.monthly_limit,
                        budget.daily_limit,
                        budget.per_run_limit,
                        budget.alert_at,
                        encode_ts(budget.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

fn row_to_usage(row: &Row<'_>) -> rusqlite::Result<Result<UsageRecord, StoreError>> {
    let recorded: String = row.get(11)?;
    let record = (|| {
        Ok::<UsageRecord, StoreError>(UsageRecord {
            id: row.get(0)?,
            run_id: row.get(1)?,
            scope: Scope::new(
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ),
            step: row.get(5)?,
            input_tokens: row.get(6)?,
            output_tokens: row.get(7)?,
            cache_read_tokens: row.get(8)?,
            cache_write_tokens: row.get(9)?,
            total_cost_usd: row.get(10)?,
            recorded_at: decode_ts(&recorded)?,
        })
    })();
    Ok(record)
}

fn row_to_budget(row: &Row<'_>) -> rusqlite::Result<Result<Budget, StoreError>> {
    let updated: String = row.get(8)?;
    let budget = (|| {
        Ok::<Budget, StoreError>(Budget {
            id: row.get(0)?,
            scope: Scope::new(
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ),
            monthly_limit: row.get(4)?,
            daily_limit: row.get(5)?,
            per_run_limit: row.get(6)?,
            alert_at: row.get(7)?,
            updated_at: decode_ts(&updated)?,
        })
    })();
    Ok(budget)
}
