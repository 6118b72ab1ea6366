//! Event subject grammar.
//!
//! Subjects are hierarchical dotted tokens rooted at `platform`:
//! `platform.{org}.{team}.{type}`. A trailing `>` in a subscription pattern
//! matches one or more remaining tokens.

/// Well-known event types.
pub const TYPE_RUN_STARTED: &str = "run.started";
pub const TYPE_RUN_COMPLETED: &str = "run.completed";
pub const TYPE_STEP_PREFIX: &str = "step.";
pub const TYPE_ITERATION_COMPLETE: &str = "iteration.complete";
pub const TYPE_COST_RECORDED: &str = "cost.recorded";
pub const TYPE_BUDGET_ALERT: &str = "budget.alert";
pub const TYPE_POLICY_VIOLATION: &str = "policy.violation";

/// Subscribes to every platform event.
pub const ALL_EVENTS: &str = "platform.>";

/// Fully qualified subject for an event at the given scope.
pub fn build_subject(org_id: &str, team_id: &str, event_type: &str) -> String {
    format!("platform.{org_id}.{team_id}.{event_type}")
}

/// Wildcard subscription for all events in an org, e.g. `platform.acme.>`.
pub fn org_wildcard(org_id: &str) -> String {
    format!("platform.{org_id}.>")
}

/// Wildcard subscription for all events in a team, e.g. `platform.acme.web.>`.
pub fn team_wildcard(org_id: &str, team_id: &str) -> String {
    format!("platform.{org_id}.{team_id}.>")
}

/// Token-wise subject match. `>` is only meaningful as the final pattern
/// token, where it matches one or more remaining subject tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some(p), Some(s)) => {
                if p != s {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
