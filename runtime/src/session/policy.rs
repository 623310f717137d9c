//! Per-stage retry, timeout and degrade-vs-fail policy.

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::session::stage::Stage;
use std::collections::HashMap;
use std::time::Duration;

/// What happens when a stage runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// The session fails and goes straight to teardown.
    Abort,
    /// The stage is marked degraded and the pipeline continues.
    Degrade,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePolicy {
    pub retry: RetryConfig,
    /// Bound on a single attempt.
    pub timeout: Duration,
    pub on_exhausted: Exhaustion,
}

impl StagePolicy {
    pub fn new(retry: RetryConfig, timeout_ms: u64, on_exhausted: Exhaustion) -> Self {
        Self {
            retry,
            timeout: Duration::from_millis(timeout_ms),
            on_exhausted,
        }
    }
}

/// Policies for every retried stage of a run. Teardown runs once, outside
/// any policy.
#[derive(Debug, Clone)]
pub struct StagePolicies {
    policies: HashMap<Stage, StagePolicy>,
}

impl Default for StagePolicies {
    fn default() -> Self {
        use Exhaustion::{Abort, Degrade};
        let policies = HashMap::from([
            (Stage::Init, StagePolicy::new(RetryConfig::once(), 60_000, Abort)),
            (
                Stage::NavigateLogin,
                StagePolicy::new(RetryConfig::new(3, 2000, 2.0, 10_000), 30_000, Abort),
            ),
            (
                Stage::OpenPopup,
                StagePolicy::new(RetryConfig::new(2, 2000, 1.5, 10_000), 15_000, Abort),
            ),
            (
                Stage::SubmitCredentials,
                StagePolicy::new(RetryConfig::new(2, 3000, 1.5, 10_000), 30_000, Abort),
            ),
            (
                Stage::AwaitDashboard,
                StagePolicy::new(RetryConfig::new(3, 2000, 1.5, 10_000), 20_000, Degrade),
            ),
            (
                Stage::ExploreStructure,
                StagePolicy::new(RetryConfig::new(1, 1000, 2.0, 5000), 30_000, Degrade),
            ),
            (
                Stage::DocumentEvidence,
                StagePolicy::new(RetryConfig::new(1, 1000, 2.0, 5000), 30_000, Degrade),
            ),
        ]);
        Self { policies }
    }
}

impl StagePolicies {
    /// Same retry and timeout for every stage, keeping each stage's
    /// exhaustion behaviour.
    pub fn uniform(retry: RetryConfig, timeout: Duration) -> Self {
        let mut policies = Self::default();
        for stage in Stage::ALL.into_iter().filter(|s| *s != Stage::Teardown) {
            policies.set_backoff(stage, retry, timeout);
        }
        policies
    }

    pub fn for_stage(&self, stage: Stage) -> StagePolicy {
        self.policies
            .get(&stage)
            .copied()
            .unwrap_or_else(|| StagePolicy::new(RetryConfig::once(), 30_000, Exhaustion::Abort))
    }

    /// Replace a stage's retry and timeout.
    pub fn set_backoff(&mut self, stage: Stage, retry: RetryConfig, timeout: Duration) {
        let on_exhausted = self.for_stage(stage).on_exhausted;
        self.policies.insert(
            stage,
            StagePolicy {
                retry,
                timeout,
                on_exhausted,
            },
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (stage, policy) in &self.policies {
            policy
                .retry
                .validate()
                .map_err(|e| ConfigError::InvalidRetry(format!("{stage}: {e}")))?;
            if policy.timeout.is_zero() {
                return Err(ConfigError::InvalidRetry(format!("{stage}: zero timeout")));
            }
        }
        Ok(())
    }
}
