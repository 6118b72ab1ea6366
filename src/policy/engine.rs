//! Policy evaluation and config enforcement.

use crate::errors::StoreError;
use crate::pipeline::RunnerConfig;
use crate::scope::Scope;
use crate::store::PolicyStore;
use crate::store::models::Policy;

/// Evaluates effective policies and enforces them on pipeline configs.
#[derive(Clone)]
pub struct Engine {
    policies: PolicyStore,
}

impl Engine {
    pub fn new(policies: PolicyStore) -> Self {
        Self { policies }
    }

    /// The merged effective policy for a scope (§ merge rule: most
    /// restrictive wins), or `None` when no ancestor sets one.
    pub async fn effective_policy(&self, scope: Scope) -> Result<Option<Policy>, StoreError> {
        self.policies.get_effective(scope).await
    }

    /// Cap a runner config to comply with the effective policy:
    /// `max_iterations` is lowered to the policy's cap, and a tests
    /// requirement forces test-before-review and fail-on-test-failure.
    /// Cost and files-changed caps are enforced mid-run by the guard.
    pub async fn enforce_config(
        &self,
        scope: Scope,
        mut config: RunnerConfig,
    ) -> Result<RunnerConfig, StoreError> {
        let Some(policy) = self.policies.get_effective(scope).await? else {
            return Ok(config);
        };

        if policy.max_iterations > 0
            && (config.max_iterations == 0 || config.max_iterations > policy.max_iterations)
        {
            config.max_iterations = policy.max_iterations;
        }

        if policy.require_tests {
            config.test_before_review = true;
            config.fail_on_test_failure = true;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::store::models::Policy;

    async fn engine_with_policies(policies: Vec<Policy>) -> Engine {
        let store = Store::open_in_memory().unwrap();
        for policy in policies {
            store.policies().set(&policy).await.unwrap();
        }
        Engine::new(store.policies())
    }

    #[tokio::test]
    async fn enforce_caps_iterations_and_forces_tests() {
        let engine = engine_with_policies(vec![
            Policy {
                scope: Scope::org("acme"),
                max_iterations: 5,
                require_tests: true,
                ..Default::default()
            },
            Policy {
                scope: Scope::team("acme", "web"),
                max_iterations: 3,
                ..Default::default()
            },
        ])
        .await;

        let scope = Scope::new("acme", "web", "api");
        let effective = engine.effective_policy(scope.clone()).await.unwrap().unwrap();
        assert_eq!(effective.max_iterations, 3);
        assert!(effective.require_tests);

        let config = RunnerConfig {
            max_iterations: 10,
            test_before_review: false,
            fail_on_test_failure: false,
            ..Default::default()
        };
        let enforced = engine.enforce_config(scope, config).await.unwrap();
        assert_eq!(enforced.max_iterations, 3);
        assert!(enforced.test_before_review);
        assert!(enforced.fail_on_test_failure);
    }

    #[tokio::test]
    async fn enforce_with_no_policy_is_identity() {
        let engine = engine_with_policies(vec![]).await;
        let config = RunnerConfig {
            max_iterations: 7,
            test_before_review: false,
            ..Default::default()
        };
        let enforced = engine
            .enforce_config(Scope::new("acme", "web", "api"), config.clone())
            .await
            .unwrap();
        assert_eq!(enforced.max_iterations, 7);
        assert!(!enforced.test_before_review);
    }

    #[tokio::test]
    async fn unset_config_iterations_take_the_policy_cap() {
        let engine = engine_with_policies(vec![Policy {
            scope: Scope::org("acme"),
            max_iterations: 4,
            ..Default::default()
        }])
        .await;

        let config = RunnerConfig {
            max_iterations: 0,
            ..Default::default()
        };
        let enforced = engine
            .enforce_config(Scope::org("acme"), config)
            .await
            .unwrap();
        assert_eq!(enforced.max_iterations, 4);
    }
}
