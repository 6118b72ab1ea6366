//! SQLite-backed persistence façade.
//!
//! Five typed sub-stores (runs, memory, costs, policies, events) share one
//! connection behind [`DbHandle`], which runs all access on tokio's blocking
//! thread pool via `spawn_blocking` so synchronous SQLite I/O never ties up
//! async worker threads.
//!
//! Cancellation follows the usual async contract: dropping a store future
//! abandons the call, and because every write is a single statement or an
//! explicit transaction, a canceled operation never leaves a partial write
//! visible.

mod costs;
mod events;
mod memory;
pub mod models;
mod policies;
mod runs;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub use costs::CostStore;
pub use events::EventStore;
pub use memory::MemoryStore;
pub use policies::PolicyStore;
pub use runs::RunStore;

use crate::errors::StoreError;
use crate::scope::Scope;

/// Async-safe handle to the platform database.
#[derive(Clone)]
pub(crate) struct DbHandle {
    inner: Arc<Mutex<Connection>>,
}

impl DbHandle {
    fn new(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a closure with access to the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner
                .lock()
                .map_err(|e| StoreError::Internal(anyhow::anyhow!("db lock poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("db task panicked: {e}")))?
    }
}

/// Top-level store grouping all sub-stores.
#[derive(Clone)]
pub struct Store {
    db: DbHandle,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("enable foreign keys")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: DbHandle::new(conn),
        })
    }

    pub fn runs(&self) -> RunStore {
        RunStore::new(self.db.clone())
    }

    pub fn memory(&self) -> MemoryStore {
        MemoryStore::new(self.db.clone())
    }

    pub fn costs(&self) -> CostStore {
        CostStore::new(self.db.clone())
    }

    pub fn policies(&self) -> PolicyStore {
        PolicyStore::new(self.db.clone())
    }

    pub fn events(&self) -> EventStore {
        EventStore::new(self.db.clone())
    }

    /// Re-run migrations. A no-op when the schema already matches.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.db.call(|conn| run_migrations(conn)).await
    }

    /// Release the underlying connection once all clones are dropped.
    pub fn close(self) {}
}

/// Ordered DDL statements. Each is idempotent (IF NOT EXISTS), and the batch
/// runs inside one transaction so a failed migration leaves nothing behind.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        user_id TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending',
        prompt TEXT NOT NULL DEFAULT '',
        total_cost_usd REAL NOT NULL DEFAULT 0,
        iterations INTEGER NOT NULL DEFAULT 0,
        files_changed TEXT NOT NULL DEFAULT '[]',
        duration_ms INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_scope ON runs(org_id, team_id, repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)",
    "CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at)",
    "CREATE TABLE IF NOT EXISTS patterns (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        example TEXT NOT NULL DEFAULT '',
        file_matcher TEXT NOT NULL DEFAULT '',
        weight REAL NOT NULL DEFAULT 0,
        usage_count INTEGER NOT NULL DEFAULT 0,
        success_rate REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_patterns_scope ON patterns(org_id, team_id, repo_id)",
    "CREATE TABLE IF NOT EXISTS preferences (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        data TEXT NOT NULL DEFAULT '{}',
        updated_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_preferences_scope
        ON preferences(org_id, team_id, repo_id)",
    "CREATE TABLE IF NOT EXISTS common_issues (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        solution TEXT NOT NULL DEFAULT '',
        frequency INTEGER NOT NULL DEFAULT 0,
        auto_fix INTEGER NOT NULL DEFAULT 0,
        file_matcher TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_issues_scope ON common_issues(org_id, team_id, repo_id)",
    "CREATE TABLE IF NOT EXISTS usage_records (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL DEFAULT '',
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        step TEXT NOT NULL DEFAULT '',
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        cache_read_tokens INTEGER NOT NULL DEFAULT 0,
        cache_write_tokens INTEGER NOT NULL DEFAULT 0,
        total_cost_usd REAL NOT NULL DEFAULT 0,
        recorded_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_usage_run ON usage_records(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_usage_scope_recorded
        ON usage_records(org_id, team_id, repo_id, recorded_at)",
    "CREATE TABLE IF NOT EXISTS budgets (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        monthly_limit REAL NOT NULL DEFAULT 0,
        daily_limit REAL NOT NULL DEFAULT 0,
        per_run_limit REAL NOT NULL DEFAULT 0,
        alert_at REAL NOT NULL DEFAULT 0.8,
        updated_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_budgets_scope ON budgets(org_id, team_id, repo_id)",
    "CREATE TABLE IF NOT EXISTS policies (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        max_iterations INTEGER NOT NULL DEFAULT 0,
        max_cost_per_run REAL NOT NULL DEFAULT 0,
        max_files_changed INTEGER NOT NULL DEFAULT 0,
        allowed_models TEXT NOT NULL DEFAULT '[]',
        blocked_patterns TEXT NOT NULL DEFAULT '[]',
        require_tests INTEGER NOT NULL DEFAULT 0,
        require_review INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_policies_scope ON policies(org_id, team_id, repo_id)",
    "CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL DEFAULT '',
        org_id TEXT NOT NULL DEFAULT '',
        team_id TEXT NOT NULL DEFAULT '',
        repo_id TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL DEFAULT '',
        message TEXT NOT NULL DEFAULT '',
        data TEXT NOT NULL DEFAULT '{}',
        version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_scope ON events(org_id, team_id, repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_type ON events(type)",
    "CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at)",
];

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction().context("begin migration")?;
    for ddl in MIGRATIONS {
        tx.execute(ddl, []).context("run migration")?;
    }
    tx.commit().context("commit migration")?;
    Ok(())
}

// ── Shared row/parameter helpers ──────────────────────────────────────

/// Timestamps are stored as fixed-precision RFC 3339 strings so that
/// lexicographic comparison in SQL matches chronological order.
pub(crate) fn encode_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("parse stored timestamp {s:?}: {e}")))
}

pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("encode json column: {e}")))
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s)
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("decode json column: {e}")))
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) type SqlParam = Box<dyn rusqlite::ToSql + Send>;

/// Adds equality predicates for the non-empty fields of a filter scope.
/// An empty field is a wildcard at that level, so `(acme, "", "")`
/// matches every record under the org.
pub(crate) fn push_scope_filter(scope: &Scope, clauses: &mut Vec<String>, params: &mut Vec<SqlParam>) {
    if !scope.org_id.is_empty() {
        clauses.push("org_id = ?".to_string());
        params.push(Box::new(scope.org_id.clone()));
    }
    if !scope.team_id.is_empty() {
        clauses.push("team_id = ?".to_string());
        params.push(Box::new(scope.team_id.clone()));
    }
    if !scope.repo_id.is_empty() {
        clauses.push("repo_id = ?".to_string());
        params.push(Box::new(scope.repo_id.clone()));
    }
}

pub(crate) fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}
