//! Hierarchical shared memory.
//!
//! Merges learned patterns across the org → team → repo scope chain and
//! records new patterns from successful runs.

use std::collections::HashMap;

use crate::errors::StoreError;
use crate::scope::Scope;
use crate::store::MemoryStore;
use crate::store::models::{Pattern, Run};

/// Review score (on the 0–100 scale) a run must reach before its changes
/// are recorded as patterns.
pub const LEARN_THRESHOLD: u32 = 70;

/// Scope-merging view over the memory store.
#[derive(Clone)]
pub struct MemoryService {
    store: MemoryStore,
}

impl MemoryService {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Patterns visible at a scope: every ancestor level's patterns,
    /// deduplicated by id with the most specific scope winning, sorted by
    /// weight descending.
    pub async fn merged_patterns(&self, scope: Scope) -> Result<Vec<Pattern>, StoreError> {
        let mut by_id: HashMap<String, Pattern> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for level in scope.ancestors() {
            for pattern in self.store.list_patterns(level).await? {
                if !by_id.contains_key(&pattern.id) {
                    order.push(pattern.id.clone());
                }
                // Later (more specific) levels replace earlier ones.
                by_id.insert(pattern.id.clone(), pattern);
            }
        }

        let mut merged: Vec<Pattern> = order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect();
        merged.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(merged)
    }

    /// Patterns visible at a scope that apply to the given file path.
    pub async fn patterns_for_file(
        &self,
        scope: Scope,
        path: &str,
    ) -> Result<Vec<Pattern>, StoreError> {
        let merged = self.merged_patterns(scope).await?;
        Ok(merged
            .into_iter()
            .filter(|p| p.matches_file(path))
            .collect())
    }

    /// Record one pattern per changed file for a run whose review score
    /// reached the learning threshold. Low-scoring runs contribute nothing.
    pub async fn learn_from_run(&self, run: &Run, review_score: u32) -> Result<(), StoreError> {
        if review_score < LEARN_THRESHOLD {
            return Ok(());
        }

        let weight = f64::from(review_score.min(100)) / 100.0;
        for file in &run.files_changed {
            let pattern = Pattern {
                id: format!("run-{}-{}", run.id, file),
                scope: run.scope.clone(),
                kind: "success".to_string(),
                description: format!(
                    "Successful change to {file} in run {} (score {review_score})",
                    run.id
                ),
                file_matcher: file.clone(),
                weight,
                usage_count: 1,
                success_rate: weight,
                ..Default::default()
            };
            self.store.create_pattern(&pattern).await?;
        }
        Ok(())
    }
}
