//! Record types persisted by the store, plus the filters that select them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scope::Scope;

// ── Runs ──────────────────────────────────────────────────────────────

/// Lifecycle state of an agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    Canceled,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
            RunStatus::Error => "error",
        }
    }

    /// Terminal states are set exactly once; a run never leaves one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Canceled | RunStatus::Error
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "passed" => Ok(RunStatus::Passed),
            "failed" => Ok(RunStatus::Failed),
            "canceled" => Ok(RunStatus::Canceled),
            "error" => Ok(RunStatus::Error),
            _ => anyhow::bail!("unknown run status '{s}'"),
        }
    }
}

/// A single agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Wall duration in milliseconds.
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Selects runs by criteria. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub scope: Option<Scope>,
    pub user_id: Option<String>,
    pub status: Option<RunStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// ── Memory ────────────────────────────────────────────────────────────

/// A learned code convention with organizational scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    /// Kind tag, e.g. "success", "naming", "structure".
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub example: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_matcher: String,
    /// Relevance weight in [0, 1].
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub usage_count: u32,
    /// Success rate in [0, 1].
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

impl Pattern {
    /// True when the pattern's file matcher glob applies to `path`.
    /// A pattern without a matcher applies everywhere.
    pub fn matches_file(&self, path: &str) -> bool {
        if self.file_matcher.is_empty() {
            return true;
        }
        glob::Pattern::new(&self.file_matcher)
            .map(|p| p.matches(path))
            .unwrap_or(false)
    }
}

/// Per-scope key/value preferences. Exactly one record per scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub preferred_test_framework: String,
    #[serde(default)]
    pub naming_conventions: HashMap<String, String>,
    #[serde(default)]
    pub file_organization: HashMap<String, String>,
    #[serde(default)]
    pub code_style: HashMap<String, String>,
    #[serde(default)]
    pub commit_message_format: String,
    #[serde(default)]
    pub reviewer_thresholds: HashMap<String, i64>,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

/// A frequently encountered issue with a canonical solution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommonIssue {
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub solution: String,
    /// Observed frequency. Increments on update, never decrements.
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub auto_fix: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_matcher: String,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
}

// ── Costs ─────────────────────────────────────────────────────────────

/// Token usage for a single step within a run. Append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default = "epoch")]
    pub recorded_at: DateTime<Utc>,
}

/// Selects usage records by criteria.
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub scope: Option<Scope>,
    pub run_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Time bucket for usage summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGroup {
    Hour,
    Day,
    Week,
    Month,
}

impl TimeGroup {
    /// SQLite strftime format that produces the bucket key.
    pub(crate) fn strftime_format(&self) -> &'static str {
        match self {
            TimeGroup::Hour => "%Y-%m-%dT%H:00",
            TimeGroup::Day => "%Y-%m-%d",
            TimeGroup::Week => "%Y-W%W",
            TimeGroup::Month => "%Y-%m",
        }
    }
}

impl std::str::FromStr for TimeGroup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(TimeGroup::Hour),
            "day" => Ok(TimeGroup::Day),
            "week" => Ok(TimeGroup::Week),
            "month" => Ok(TimeGroup::Month),
            _ => anyhow::bail!("unknown time group '{s}' (expected hour, day, week, or month)"),
        }
    }
}

/// Aggregated usage over one time bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Bucket key, e.g. "2026-08-02" for daily grouping.
    pub period: String,
    pub total_runs: u64,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-scope spending limits. Zero means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub monthly_limit: f64,
    #[serde(default)]
    pub daily_limit: f64,
    #[serde(default)]
    pub per_run_limit: f64,
    /// Fraction of a limit at which to alert, in (0, 1].
    #[serde(default)]
    pub alert_at: f64,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

// ── Policies ──────────────────────────────────────────────────────────

/// Enforcement rules for a scope. Zero/empty/false means "unset".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub max_iterations: u32,
    #[serde(default)]
    pub max_cost_per_run: f64,
    #[serde(default)]
    pub max_files_changed: u32,
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub require_tests: bool,
    #[serde(default)]
    pub require_review: bool,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

// ── Events ────────────────────────────────────────────────────────────

/// An append-only journal entry describing something that happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    #[serde(default)]
    pub scope: Scope,
    /// Hierarchical dotted type, e.g. "run.started" or "step.review_1".
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
}

fn default_version() -> i64 {
    1
}

impl Event {
    /// An event of the given type at the given scope, stamped now.
    pub fn new(scope: Scope, event_type: impl Into<String>) -> Self {
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            scope,
            event_type: event_type.into(),
            version: 1,
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Selects events by criteria.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub scope: Option<Scope>,
    pub run_id: Option<String>,
    pub types: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}
