//! Memory records: patterns, preferences, and common issues.
//!
//! Patterns get full CRUD. Preferences are a per-scope singleton with upsert
//! semantics, stored as one JSON document. Issues have no delete; their
//! frequency is historical data and only ever grows.

use std::collections::HashMap;

use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::models::{CommonIssue, Pattern, Preferences};
use super::{
    DbHandle, decode_json, decode_ts, encode_json, encode_ts, is_unique_violation,
};
use crate::errors::StoreError;
use crate::scope::Scope;

const PATTERN_COLUMNS: &str = "id, org_id, team_id, repo_id, kind, description, example, \
     file_matcher, weight, usage_count, success_rate, created_at, updated_at";

const ISSUE_COLUMNS: &str = "id, org_id, team_id, repo_id, kind, description, solution, \
     frequency, auto_fix, file_matcher, created_at";

#[derive(Clone)]
pub struct MemoryStore {
    db: DbHandle,
}

impl MemoryStore {
    pub(crate) fn new(db: DbHandle) -> Self {
        Self { db }
    }

    // ── Patterns ──────────────────────────────────────────────────────

    pub async fn create_pattern(&self, pattern: &Pattern) -> Result<(), StoreError> {
        validate_pattern(pattern)?;
        let mut pattern = pattern.clone();
        let now = chrono::Utc::now();
        pattern.created_at = now;
        pattern.updated_at = now;

        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO patterns (id, org_id, team_id, repo_id, kind, description,
                        example, file_matcher, weight, usage_count, success_rate,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        pattern.id,
                        pattern.scope.org_id,
                        pattern.scope.team_id,
                        pattern.scope.repo_id,
                        pattern.kind,
                        pattern.description,
                        pattern.example,
                        pattern.file_matcher,
                        pattern.weight,
                        pattern.usage_count,
                        pattern.success_rate,
                        encode_ts(pattern.created_at),
                        encode_ts(pattern.updated_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(StoreError::conflict("pattern", pattern.id.clone()))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    pub async fn update_pattern(&self, pattern: &Pattern) -> Result<(), StoreError> {
        validate_pattern(pattern)?;
        let mut pattern = pattern.clone();
        pattern.updated_at = chrono::Utc::now();

        self.db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE patterns SET kind = ?2, description = ?3, example = ?4,
                        file_matcher = ?5, weight = ?6, usage_count = ?7, success_rate = ?8,
                        updated_at = ?9
                     WHERE id = ?1",
                    params![
                        pattern.id,
                        pattern.kind,
                        pattern.description,
                        pattern.example,
                        pattern.file_matcher,
                        pattern.weight,
                        pattern.usage_count,
                        pattern.success_rate,
                        encode_ts(pattern.updated_at),
                    ],
                )?;
                if changed == 0 {
                    return Err(StoreError::not_found("pattern", pattern.id.clone()));
                }
                Ok(())
            })
            .await
    }

    /// Patterns stored at exactly this scope. Hierarchical merging across
    /// scope levels is the memory service's job.
    pub async fn list_patterns(&self, scope: Scope) -> Result<Vec<Pattern>, StoreError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PATTERN_COLUMNS} FROM patterns
                     WHERE org_id = ?1 AND team_id = ?2 AND repo_id = ?3
                     ORDER BY weight DESC, id"
                ))?;
                let rows = stmt.query_map(
                    params![scope.org_id, scope.team_id, scope.repo_id],
                    row_to_pattern,
                )?;
                let mut patterns = Vec::new();
                for row in rows {
                    patterns.push(row??);
                }
                Ok(patterns)
            })
            .await
    }

    pub async fn delete_pattern(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM patterns WHERE id = ?1", params![id])?;
                if changed == 0 {
                    return Err(StoreError::not_found("pattern", id));
                }
                Ok(())
            })
            .await
    }

    // ── Preferences ───────────────────────────────────────────────────

    /// Preferences for exactly this scope, or `None` when never set.
    pub async fn get_preferences(&self, scope: Scope) -> Result<Option<Preferences>, StoreError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, org_id, team_id, repo_id, data, updated_at FROM preferences
                     WHERE org_id = ?1 AND team_id = ?2 AND repo_id = ?3",
                )?;
                let mut rows = stmt.query_map(
                    params![scope.org_id, scope.team_id, scope.repo_id],
                    |row| {
                        let data: String = row.get(4)?;
                        let updated: String = row.get(5)?;
                        let id: String = row.get(0)?;
                        let scope = Scope::new(
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        );
                        Ok((id, scope, data, updated))
                    },
                )?;
                match rows.next() {
                    Some(row) => {
                        let (id, scope, data, updated) = row?;
                        let body: PreferencesBody = decode_json(&data)?;
                        Ok(Some(Preferences {
                            id,
                            scope,
                            preferred_test_framework: body.preferred_test_framework,
                            naming_conventions: body.naming_conventions,
                            file_organization: body.file_organization,
                            code_style: body.code_style,
                            commit_message_format: body.commit_message_format,
                            reviewer_thresholds: body.reviewer_thresholds,
                            updated_at: decode_ts(&updated)?,
                        }))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    /// Insert or replace the preferences record for the scope.
    pub async fn set_preferences(&self, prefs: &Preferences) -> Result<(), StoreError> {
        prefs.scope.validate()?;
        let mut prefs = prefs.clone();
        if prefs.id.is_empty() {
            prefs.id = uuid::Uuid::new_v4().to_string();
        }
        prefs.updated_at = chrono::Utc::now();

        self.db
            .call(move |conn| {
                let body = PreferencesBody {
                    preferred_test_framework: prefs.preferred_test_framework.clone(),
                    naming_conventions: prefs.naming_conventions.clone(),
                    file_organization: prefs.file_organization.clone(),
                    code_style: prefs.code_style.clone(),
                    commit_message_format: prefs.commit_message_format.clone(),
                    reviewer_thresholds: prefs.reviewer_thresholds.clone(),
                };
                conn.execute(
                    "INSERT INTO preferences (id, org_id, team_id, repo_id, data, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(org_id, team_id, repo_id)
                     DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    params![
                        prefs.id,
                        prefs.scope.org_id,
                        prefs.scope.team_id,
                        prefs.scope.repo_id,
                        encode_json(&body)?,
                        encode_ts(prefs.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    // ── Common issues ─────────────────────────────────────────────────

    pub async fn create_issue(&self, issue: &CommonIssue) -> Result<(), StoreError> {
        if issue.id.is_empty() {
            return Err(StoreError::InvalidArgument("issue id is required".into()));
        }
        issue.scope.validate()?;
        let mut issue = issue.clone();
        issue.created_at = chrono::Utc::now();

        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO common_issues (id, org_id, team_id, repo_id, kind, description,
                        solution, frequency, auto_fix, file_matcher, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        issue.id,
                        issue.scope.org_id,
                        issue.scope.team_id,
                        issue.scope.repo_id,
                        issue.kind,
                        issue.description,
                        issue.solution,
                        issue.frequency,
                        issue.auto_fix,
                        issue.file_matcher,
                        encode_ts(issue.created_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if is_unique_violation(&e) => {
                        Err(StoreError::conflict("issue", issue.id.clone()))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Update an issue's fields. Frequency is monotone: the stored value
    /// only moves up, never down.
    pub async fn update_issue(&self, issue: &CommonIssue) -> Result<(), StoreError> {
        let issue = issue.clone();
        self.db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE common_issues SET kind = ?2, description = ?3, solution = ?4,
                        frequency = MAX(frequency, ?5), auto_fix = ?6, file_matcher = ?7
                     WHERE id = ?1",
                    params![
                        issue.id,
                        issue.kind,
                        issue.description,
                        issue.solution,
                        issue.frequency,
                        issue.auto_fix,
                        issue.file_matcher,
                    ],
                )?;
                if changed == 0 {
                    return Err(StoreError::not_found("issue", issue.id.clone()));
                }
                Ok(())
            })
            .await
    }

    pub async fn list_issues(&self, scope: Scope) -> Result<Vec<CommonIssue>, StoreError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ISSUE_COLUMNS} FROM common_issues
                     WHERE org_id = ?1 AND team_id = ?2 AND repo_id = ?3
                     ORDER BY frequency DESC, id"
                ))?;
                let rows = stmt.query_map(
                    params![scope.org_id, scope.team_id, scope.repo_id],
                    row_to_issue,
                )?;
                let mut issues = Vec::new();
                for row in rows {
                    issues.push(row??);
                }
                Ok(issues)
            })
            .await
    }
}

/// Serialized shape of the preferences JSON document.
#[derive(Default, Serialize, Deserialize)]
struct PreferencesBody {
    #[serde(default)]
    preferred_test_framework: String,
    #[serde(default)]
    naming_conventions: HashMap<String, String>,
    #[serde(default)]
    file_organization: HashMap<String, String>,
    #[serde(default)]
    code_style: HashMap<String, String>,
    #[serde(default)]
    commit_message_format: String,
    #[serde(default)]
    reviewer_thresholds: HashMap<String, i64>,
}

fn validate_pattern(pattern: &Pattern) -> Result<(), StoreError> {
    if pattern.id.is_empty() {
        return Err(StoreError::InvalidArgument("pattern id is required".into()));
    }
    pattern.scope.validate()?;
    if !(0.0..=1.0).contains(&pattern.weight) {
        return Err(StoreError::InvalidArgument(format!(
            "pattern weight {} out of range [0, 1]",
            pattern.weight
        )));
    }
    if !(0.0..=1.0).contains(&pattern.success_rate) {
        return Err(StoreError::InvalidArgument(format!(
            "pattern success_rate {} out of range [0, 1]",
            pattern.success_rate
        )));
    }
    Ok(())
}

fn row_to_pattern(row: &Row<'_>) -> rusqlite::Result<Result<Pattern, StoreError>> {
    let created: String = row.get(11)?;
    let updated: String = row.get(12)?;
    let pattern = (|| {
        Ok::<Pattern, StoreError>(Pattern {
            id: row.get(0)?,
            scope: Scope::new(
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ),
            kind: row.get(4)?,
            description: row.get(5)?,
            example: row.get(6)?,
            file_matcher: row.get(7)?,
            weight: row.get(8)?,
            usage_count: row.get(9)?,
            success_rate: row.get(10)?,
            created_at: decode_ts(&created)?,
            updated_at: decode_ts(&updated)?,
        })
    })();
    Ok(pattern)
}

fn row_to_issue(row: &Row<'_>) -> rusqlite::Result<Result<CommonIssue, StoreError>> {
    let created: String = row.get(10)?;
    let issue = (|| {
        Ok::<CommonIssue, StoreError>(CommonIssue {
            id: row.get(0)?,
            scope: Scope::new(
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ),
            kind: row.get(4)?,
            description: row.get(5)?,
            solution: row.get(6)?,
            frequency: row.get(7)?,
            auto_fix: row.get(8)?,
            file_matcher: row.get(9)?,
            created_at: decode_ts(&created)?,
        })
    })();
    Ok(issue)
}
