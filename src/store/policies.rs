//! Policies: per-scope rules plus the most-restrictive-wins merge that
//! produces an effective policy from the org → team → repo chain.

use rusqlite::{Connection, Row, params};

use super::models::Policy;
use super::{DbHandle, decode_json, decode_ts, encode_json, encode_ts};
use crate::errors::StoreError;
use crate::scope::Scope;

const POLICY_COLUMNS: &str = "id, org_id, team_id, repo_id, max_iterations, max_cost_per_run, \
     max_files_changed, allowed_models, blocked_patterns, require_tests, require_review, \
     updated_at";

#[derive(Clone)]
pub struct PolicyStore {
    db: DbHandle,
}

impl PolicyStore {
    pub(crate) fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// The policy stored at exactly this scope, or `None`.
    pub async fn get(&self, scope: Scope) -> Result<Option<Policy>, StoreError> {
        self.db.call(move |conn| get_exact(conn, &scope)).await
    }

    /// Insert or replace the policy for the scope.
    pub async fn set(&self, policy: &Policy) -> Result<(), StoreError> {
        policy.scope.validate()?;
        let mut policy = policy.clone();
        if policy.id.is_empty() {
            policy.id = uuid::Uuid::new_v4().to_string();
        }
        policy.updated_at = chrono::Utc::now();

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO policies (id, org_id, team_id, repo_id, max_iterations,
                        max_cost_per_run, max_files_changed, allowed_models, blocked_patterns,
                        require_tests, require_review, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(org_id, team_id, repo_id)
                     DO UPDATE SET max_iterations = excluded.max_iterations,
                        max_cost_per_run = excluded.max_cost_per_run,
                        max_files_changed = excluded.max_files_changed,
                        allowed_models = excluded.allowed_models,
                        blocked_patterns = excluded.blocked_patterns,
                        require_tests = excluded.require_tests,
                        require_review = excluded.require_review,
                        updated_at = excluded.updated_at",
                    params![
                        policy.id,
                        policy.scope.org_id,
                        policy.scope.team_id,
                        policy.scope.repo_id,
                        policy.max_iterations,
                        policy.max_cost_per_run,
                        policy.max_files_changed,
                        encode_json(&policy.allowed_models)?,
                        encode_json(&policy.blocked_patterns)?,
                        policy.require_tests,
                        policy.require_review,
                        encode_ts(policy.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, scope: Scope) -> Result<(), StoreError> {
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM policies WHERE org_id = ?1 AND team_id = ?2 AND repo_id = ?3",
                    params![scope.org_id, scope.team_id, scope.repo_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Merge all policies on the scope's ancestor chain, most restrictive
    /// wins:
    ///
    /// - numeric caps take the minimum of set (non-zero) values
    /// - `allowed_models` is the intersection across layers that set it
    /// - `blocked_patterns` is the union
    /// - boolean requirements OR together
    ///
    /// Returns `None` when no ancestor has a policy.
    pub async fn get_effective(&self, scope: Scope) -> Result<Option<Policy>, StoreError> {
        self.db
            .call(move |conn| {
                let mut layers = Vec::new();
                for ancestor in scope.ancestors() {
                    if let Some(policy) = get_exact(conn, &ancestor)? {
                        layers.push(policy);
                    }
                }
                if layers.is_empty() {
                    return Ok(None);
                }
                Ok(Some(merge_policies(scope, &layers)))
            })
            .await
    }
}

/// Fold policy layers (broadest first) into one effective policy.
pub(crate) fn merge_policies(scope: Scope, layers: &[Policy]) -> Policy {
    let mut effective = Policy {
        scope,
        ..Default::default()
    };
    for layer in layers {
        if layer.max_iterations > 0
            && (effective.max_iterations == 0 || layer.max_iterations < effective.max_iterations)
        {
            effective.max_iterations = layer.max_iterations;
        }
        if layer.max_cost_per_run > 0.0
            && (effective.max_cost_per_run == 0.0
                || layer.max_cost_per_run < effective.max_cost_per_run)
        {
            effective.max_cost_per_run = layer.max_cost_per_run;
        }
        if layer.max_files_changed > 0
            && (effective.max_files_changed == 0
                || layer.max_files_changed < effective.max_files_changed)
        {
            effective.max_files_changed = layer.max_files_changed;
        }
        if !layer.allowed_models.is_empty() {
            if effective.allowed_models.is_empty() {
                effective.allowed_models = layer.allowed_models.clone();
            } else {
                effective
                    .allowed_models
                    .retain(|m| layer.allowed_models.contains(m));
            }
        }
        for pattern in &layer.blocked_patterns {
            if !effective.blocked_patterns.contains(pattern) {
                effective.blocked_patterns.push(pattern.clone());
            }
        }
        effective.require_tests |= layer.require_tests;
        effective.require_review |= layer.require_review;
    }
    effective
}

fn get_exact(conn: &Connection, scope: &Scope) -> Result<Option<Policy>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POLICY_COLUMNS} FROM policies
         WHERE org_id = ?1 AND team_id = ?2 AND repo_id = ?3"
    ))?;
    let mut rows = stmt.query_map(
        params![scope.org_id, scope.team_id, scope.repo_id],
        row_to_policy,
    )?;
    match rows.next() {
        Some(row) => Ok(Some(row??)),
        None => Ok(None),
    }
}

fn row_to_policy(row: &Row<'_>) -> rusqlite::Result<Result<Policy, StoreError>> {
    let models: String = row.get(7)?;
    let patterns: String = row.get(8)?;
    let updated: String = row.get(11)?;
    let policy = (|| {
        Ok::<Policy, StoreError>(Policy {
            id: row.get(0)?,
            scope: Scope::new(
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ),
            max_iterations: row.get(4)?,
            max_cost_per_run: row.get(5)?,
            max_files_changed: row.get(6)?,
            allowed_models: decode_json(&models)?,
            blocked_patterns: decode_json(&patterns)?,
            require_tests: row.get(9)?,
            require_review: row.get(10)?,
            updated_at: decode_ts(&updated)?,
        })
    })();
    Ok(policy)
}
