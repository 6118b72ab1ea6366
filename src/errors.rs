//! Typed error hierarchy for the Flotilla platform.
//!
//! Four top-level enums cover the four subsystems:
//! - `StoreError` — persistence failures with semantic kinds
//! - `BusError` — event bus publish/subscribe failures
//! - `PipelineError` — terminal pipeline run errors
//! - `TeamError` — team orchestration failures

use thiserror::Error;

/// Errors from the persistence façade and artifact store.
///
/// `NotFound` is reserved for required records; optional singletons
/// (budget, policy, preferences) return `Ok(None)` from their getters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    Conflict { kind: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation canceled")]
    Canceled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::Conflict {
            kind,
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Internal(err.into())
    }
}

/// Errors from the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,

    #[error("persist event: {0}")]
    Persist(#[source] StoreError),

    #[error("invalid subject: {0}")]
    InvalidSubject(String),
}

/// Terminal errors carried in a pipeline run result.
///
/// The runner itself never returns these as `Err`; the run completes and
/// its result carries the terminal status plus the error that caused it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{step} failed: {source}")]
    Role {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("policy violation at {step}: {reason}")]
    PolicyViolation { step: String, reason: String },

    #[error("run canceled")]
    Canceled,
}

impl PipelineError {
    /// The step the error originated from, when one is known.
    pub fn step(&self) -> Option<&str> {
        match self {
            PipelineError::Role { step, .. } => Some(step),
            PipelineError::PolicyViolation { step, .. } => Some(step),
            PipelineError::Canceled => None,
        }
    }
}

/// Errors from team orchestration.
#[derive(Debug, Error)]
pub enum TeamError {
    #[error("team {team}: routing failed: {source}")]
    Routing {
        team: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("team {team}: agent {agent} failed: {source}")]
    Agent {
        team: String,
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("team {team}: guard rejected agent {agent}: {reason}")]
    GuardRejected {
        team: String,
        agent: String,
        reason: String,
    },

    #[error("team {team}: aggregation failed: {source}")]
    Aggregation {
        team: String,
        #[source]
        source: anyhow::Error,
    },
}
