//! Per-run token usage accounting.
//!
//! A [`Tracker`] is shared (via `Arc`) between the roles that incur usage,
//! the pipeline runner that snapshots it into results, and teams that
//! account per-agent usage under `{team}/{agent}` keys. Trackers are never
//! shared across runs; durable accounting goes through the cost governor.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Token counts and cost for one unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
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
}

impl Usage {
    pub fn add(self, other: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
            cache_write_tokens: self.cache_write_tokens + other.cache_write_tokens,
            total_cost_usd: self.total_cost_usd + other.total_cost_usd,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_read_tokens == 0
            && self.cache_write_tokens == 0
            && self.total_cost_usd == 0.0
    }

    /// Usage delta relative to an earlier total. Saturates at zero.
    pub fn since(&self, earlier: &Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens.saturating_sub(earlier.input_tokens),
            output_tokens: self.output_tokens.saturating_sub(earlier.output_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_sub(earlier.cache_read_tokens),
            cache_write_tokens: self
                .cache_write_tokens
                .saturating_sub(earlier.cache_write_tokens),
            total_cost_usd: (self.total_cost_usd - earlier.total_cost_usd).max(0.0),
        }
    }
}

/// Usage attributed to one named step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    pub step: String,
    pub usage: Usage,
}

#[derive(Default)]
struct TrackerInner {
    steps: Vec<StepUsage>,
    total: Usage,
}

/// Accumulates usage for a single run.
#[derive(Default)]
pub struct Tracker {
    inner: Mutex<TrackerInner>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, step: impl Into<String>, usage: Usage) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.steps.push(StepUsage {
            step: step.into(),
            usage,
        });
        inner.total = inner.total.add(usage);
    }

    pub fn total(&self) -> Usage {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).total
    }

    pub fn steps(&self) -> Vec<StepUsage> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .steps
            .clone()
    }

    pub fn has_usage(&self) -> bool {
        !self.total().is_empty()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        TrackerSnapshot {
            total: inner.total,
            steps: inner.steps.clone(),
        }
    }
}

/// Point-in-time copy of a tracker, carried in run results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub total: Usage,
    pub steps: Vec<StepUsage>,
}
