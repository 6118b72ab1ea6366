//! Result aggregation: combining multiple agent results into one.

use async_trait::async_trait;

use super::agent::TaskResult;
use crate::cost::Usage;

/// Combines the results of all selected agents into a single result.
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn aggregate(&self, results: Vec<TaskResult>) -> anyhow::Result<TaskResult>;
}

/// Concatenates outputs with newlines, merges file lists (deduplicated,
/// order preserving), sums usage, unions data maps, and keeps all results
/// as children.
pub struct ConcatAggregator;

#[async_trait]
impl Aggregator for ConcatAggregator {
    async fn aggregate(&self, results: Vec<TaskResult>) -> anyhow::Result<TaskResult> {
        if results.is_empty() {
            return Ok(TaskResult::default());
        }

        let mut aggregated = TaskResult::default();
        let mut outputs = Vec::new();
        let mut diffs = Vec::new();
        let mut usage = Usage::default();
        let mut files = Vec::new();

        for result in &results {
            if !result.output.is_empty() {
                outputs.push(result.output.clone());
            }
            if !result.diff.is_empty() {
                diffs.push(result.diff.clone());
            }
            usage = usage.add(result.usage);
            files.extend(result.files_changed.iter().cloned());
            for (key, value) in &result.data {
                aggregated.data.insert(key.clone(), value.clone());
            }
        }

        aggregated.output = outputs.join("\n");
        aggregated.diff = diffs.join("\n");
        aggregated.usage = usage;
        aggregated.files_changed = dedup_strings(files);
        aggregated.children = results;
        Ok(aggregated)
    }
}

/// Returns the first error-free result. If every result errored, returns
/// the first one, error and all.
pub struct FirstResultAggregator;

#[async_trait]
impl Aggregator for FirstResultAggregator {
    async fn aggregate(&self, results: Vec<TaskResult>) -> anyhow::Result<TaskResult> {
        if results.is_empty() {
            return Ok(TaskResult::default());
        }
        let winner = results
            .iter()
            .find(|r| r.error.is_none())
            .unwrap_or(&results[0]);
        let mut winner = winner.clone();
        winner.children = results;
        Ok(winner)
    }
}

/// Returns the highest-scored result according to a caller-provided
/// scoring function.
pub struct BestResultAggregator {
    score: Box<dyn Fn(&TaskResult) -> f64 + Send + Sync>,
}

impl BestResultAggregator {
    pub fn new(score: impl Fn(&TaskResult) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            score: Box::new(score),
        }
    }
}

#[async_trait]
impl Aggregator for BestResultAggregator {
    async fn aggregate(&self, results: Vec<TaskResult>) -> anyhow::Result<TaskResult> {
        if results.is_empty() {
            return Ok(TaskResult::default());
        }

        let mut best_idx = 0;
        let mut best_score = (self.score)(&results[0]);
        for (idx, result) in results.iter().enumerate().skip(1) {
            let score = (self.score)(result);
            if score > best_score {
                best_idx = idx;
                best_score = score;
            }
        }

        let mut winner = results[best_idx].clone();
        winner.children = results;
        Ok(winner)
    }
}

/// Unique strings, preserving first-occurrence order.
fn dedup_strings(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}
