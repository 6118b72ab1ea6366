//! Organizational scope identifiers.
//!
//! Every stored record and every event subject is keyed by a
//! `(org, team, repo)` tuple. Empty fields mean "all" at that level, so a
//! policy or pattern stored at `(acme, "", "")` applies to every team and
//! repo under `acme`.

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Identifies the organizational context for a stored entity or event.
///
/// The hierarchy is org → team → repo. A non-empty `team_id` requires a
/// non-empty `org_id`, and a non-empty `repo_id` requires both parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub repo_id: String,
}

impl Scope {
    pub fn new(
        org_id: impl Into<String>,
        team_id: impl Into<String>,
        repo_id: impl Into<String>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            team_id: team_id.into(),
            repo_id: repo_id.into(),
        }
    }

    /// Org-wide scope.
    pub fn org(org_id: impl Into<String>) -> Self {
        Self::new(org_id, "", "")
    }

    /// Team-wide scope.
    pub fn team(org_id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self::new(org_id, team_id, "")
    }

    pub fn is_empty(&self) -> bool {
        self.org_id.is_empty() && self.team_id.is_empty() && self.repo_id.is_empty()
    }

    /// Checks the hierarchy invariant: team requires org, repo requires both.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !self.team_id.is_empty() && self.org_id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "scope team_id set without org_id".to_string(),
            ));
        }
        if !self.repo_id.is_empty() && (self.org_id.is_empty() || self.team_id.is_empty()) {
            return Err(StoreError::InvalidArgument(
                "scope repo_id set without org_id and team_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Ancestor scopes from broadest to narrowest, including this scope's
    /// own level. Used for policy and pattern merging.
    ///
    /// For `(acme, web, api)` this yields `(acme,,)`, `(acme,web,)`,
    /// `(acme,web,api)`. Empty levels are skipped.
    pub fn ancestors(&self) -> Vec<Scope> {
        let mut chain = Vec::with_capacity(3);
        if !self.org_id.is_empty() {
            chain.push(Scope::org(self.org_id.clone()));
        }
        if !self.org_id.is_empty() && !self.team_id.is_empty() {
            chain.push(Scope::team(self.org_id.clone(), self.team_id.clone()));
        }
        if !self.org_id.is_empty() && !self.team_id.is_empty() && !self.repo_id.is_empty() {
            chain.push(self.clone());
        }
        chain
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.org_id, self.team_id, self.repo_id)
    }
}
