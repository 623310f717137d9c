// Copyright 2026 Customs Probe Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry with exponential backoff.
//!
//! [`RetryExecutor::run`] drives a fallible async step up to
//! `max_retries + 1` times. After every failed attempt the optional
//! [`FailureHook`] is invoked (the session uses it to capture evidence); hook
//! failures are logged and swallowed. Only [`ErrorKind::Transient`] failures
//! are retried.

use crate::error::{ConfigError, ErrorKind, StepError};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Backoff policy for one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each retry. Must be `>= 1`.
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        initial_delay_ms: u64,
        backoff_multiplier: f64,
        max_delay_ms: u64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            backoff_multiplier,
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// A policy that runs the step exactly once.
    pub fn once() -> Self {
        Self::new(0, 1, 1.0, 1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() || self.max_delay.is_zero() {
            return Err(ConfigError::InvalidRetry(
                "delays must be positive".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry(format!(
                "backoff multiplier {} is below 1",
                self.backoff_multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::InvalidRetry(format!(
                "max delay {}ms is shorter than initial delay {}ms",
                self.max_delay.as_millis(),
                self.initial_delay.as_millis()
            )));
        }
        Ok(())
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The delay used before the first retry.
    pub fn first_delay(&self) -> Duration {
        self.initial_delay.min(self.max_delay)
    }

    /// The delay that follows `current`, capped at `max_delay`.
    ///
    /// Computed in whole milliseconds so schedules such as 2000 → 3000 → 4500
    /// stay exact.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = (current.as_millis() as f64 * self.backoff_multiplier).round();
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64).max(current.min(self.max_delay))
    }

    /// Every inter-attempt delay this policy can produce, in order.
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::with_capacity(self.max_retries as usize);
        let mut delay = self.first_delay();
        for _ in 0..self.max_retries {
            out.push(delay);
            delay = self.next_delay(delay);
        }
        out
    }
}

/// Called after every failed attempt, before any backoff sleep.
#[async_trait]
pub trait FailureHook: Send + Sync {
    async fn on_failure(&self, error: &StepError, attempt: u32) -> anyhow::Result<()>;
}

/// A successful run and how it got there.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Delays slept between attempts.
    pub delays: Vec<Duration>,
}

/// All attempts failed, or one failed in a way that must not be retried.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub delays: Vec<Duration>,
    #[source]
    pub last: StepError,
}

impl RetryExhausted {
    pub fn kind(&self) -> ErrorKind {
        self.last.kind
    }
}

/// Runs steps under one [`RetryConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `step` until it succeeds, fails non-transiently, or the policy is
    /// exhausted. `step` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        mut step: F,
        hook: Option<&dyn FailureHook>,
    ) -> Result<Attempted<T>, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut delay = self.config.first_delay();
        let mut delays = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match step(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                        delays,
                    })
                }
                Err(err) => err,
            };

            debug!(attempt, max_attempts, kind = %err.kind, "attempt failed: {}", err.message);

            if let Some(hook) = hook {
                if let Err(hook_err) = hook.on_failure(&err, attempt).await {
                    warn!(attempt, "failure hook error ignored: {hook_err:#}");
                }
            }

            if !err.kind.is_retryable() || attempt >= max_attempts {
                return Err(RetryExhausted {
                    attempts: attempt,
                    delays,
                    last: err,
                });
            }

            tokio::time::sleep(delay).await;
            delays.push(delay);
            delay = self.config.next_delay(delay);
        }
    }
}
