//! Cross-iteration issue tracking.
//!
//! Review issues are deduplicated by a stable fingerprint of
//! file + line + description so the runner can tell new issues from ones
//! that persist across refactor cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::review::Issue;

/// An issue observed across one or more iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub issue: Issue,
    pub fingerprint: String,
    pub first_seen: u32,
    pub last_seen: u32,
    pub occurrences: u32,
}

/// Aggregate issue statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueStats {
    pub total: usize,
    /// Issues first observed in the most recent iteration.
    pub new_in_last_iteration: usize,
    /// Issues observed in more than one iteration.
    pub persistent: usize,
    pub by_severity: HashMap<String, usize>,
}

/// Records review issues per iteration, keyed by fingerprint.
#[derive(Default)]
pub struct IssueHistory {
    iteration: u32,
    // Insertion order preserved for deterministic reporting.
    order: Vec<String>,
    issues: HashMap<String, TrackedIssue>,
}

impl IssueHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the issues from one review, advancing the iteration counter.
    /// Returns the tracked form of the recorded issues.
    pub fn record_iteration(&mut self, issues: &[Issue]) -> Vec<TrackedIssue> {
        self.iteration += 1;
        let mut tracked = Vec::with_capacity(issues.len());
        for issue in issues {
            let fp = fingerprint(issue);
            let entry = self
                .issues
                .entry(fp.clone())
                .and_modify(|t| {
                    t.last_seen = self.iteration;
                    t.occurrences += 1;
                })
                .or_insert_with(|| {
                    self.order.push(fp.clone());
                    TrackedIssue {
                        issue: issue.clone(),
                        fingerprint: fp,
                        first_seen: self.iteration,
                        last_seen: self.iteration,
                        occurrences: 1,
                    }
                });
            tracked.push(entry.clone());
        }
        tracked
    }

    /// Issues first seen in the current iteration.
    pub fn new_issues(&self) -> Vec<&TrackedIssue> {
        self.all()
            .filter(|t| t.first_seen == self.iteration)
            .collect()
    }

    /// Issues observed in more than one iteration.
    pub fn persistent_issues(&self) -> Vec<&TrackedIssue> {
        self.all().filter(|t| t.occurrences > 1).collect()
    }

    pub fn stats(&self) -> IssueStats {
        let mut stats = IssueStats {
            total: self.issues.len(),
            ..Default::default()
        };
        for tracked in self.all() {
            if tracked.first_seen == self.iteration {
                stats.new_in_last_iteration += 1;
            }
            if tracked.occurrences > 1 {
                stats.persistent += 1;
            }
            *stats
                .by_severity
                .entry(tracked.issue.severity.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    fn all(&self) -> impl Iterator<Item = &TrackedIssue> {
        self.order.iter().filter_map(|fp| self.issues.get(fp))
    }
}

fn fingerprint(issue: &Issue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issue.file.as_bytes());
    hasher.update([0]);
    hasher.update(issue.line.unwrap_or(0).to_le_bytes());
    hasher.update([0]);
    hasher.update(issue.description.as_bytes());
    let digest = hasher.finalize();
    // 16 hex chars are plenty for per-run dedup.
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::review::Severity;

    fn issue(file: &str, line: u32, description: &str) -> Issue {
        Issue {
            severity: Severity::Major,
            file: file.to_string(),
            line: Some(line),
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn same_issue_across_iterations_is_persistent() {
        let mut history = IssueHistory::new();
        history.record_iteration(&[issue("main.rs", 10, "missing error handling")]);
        history.record_iteration(&[
            issue("main.rs", 10, "missing error handling"),
            issue("lib.rs", 3, "dead code"),
        ]);

        let stats = history.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.persistent, 1);
        assert_eq!(stats.new_in_last_iteration, 1);
        assert_eq!(stats.by_severity["major"], 2);

        assert_eq!(history.persistent_issues().len(), 1);
        assert_eq!(
            history.persistent_issues()[0].issue.description,
            "missing error handling"
        );
    }

    #[test]
    fn fingerprint_distinguishes_file_line_description() {
        let a = fingerprint(&issue("main.rs", 10, "x"));
        let b = fingerprint(&issue("main.rs", 11, "x"));
        let c = fingerprint(&issue("lib.rs", 10, "x"));
        let d = fingerprint(&issue("main.rs", 10, "y"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a, fingerprint(&issue("main.rs", 10, "x")));
    }

    #[test]
    fn empty_history_has_empty_stats() {
        let history = IssueHistory::new();
        assert_eq!(history.stats(), IssueStats::default());
    }
}
