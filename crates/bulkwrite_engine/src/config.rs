//! Configuration for the bulk mutator.

use crate::error::{EngineError, EngineResult};
use crate::idempotency::{AlwaysRetryClassifier, IdempotencyClassifier, SafeClassifier};
use crate::policy::{
    BackoffPolicy, ExponentialBackoffPolicy, LimitedErrorCountRetryPolicy,
    LimitedTimeRetryPolicy, RetryPolicy,
};
use crate::status::StatusClassifier;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for bulk apply operations.
#[derive(Debug, Clone)]
pub struct MutatorConfig {
    /// Fully qualified table name.
    pub table_name: String,
    /// Routing profile; empty selects the default profile.
    pub app_profile_id: String,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Backoff configuration.
    pub backoff: BackoffConfig,
    /// Which mutations may be replayed.
    pub idempotency: IdempotencyMode,
}

impl MutatorConfig {
    /// Creates a configuration with default policies.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            app_profile_id: String::new(),
            retry: RetryConfig::default(),
            backoff: BackoffConfig::default(),
            idempotency: IdempotencyMode::default(),
        }
    }

    /// Sets the routing profile.
    pub fn with_app_profile(mut self, app_profile_id: impl Into<String>) -> Self {
        self.app_profile_id = app_profile_id.into();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the idempotency mode.
    pub fn with_idempotency(mut self, idempotency: IdempotencyMode) -> Self {
        self.idempotency = idempotency;
        self
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.table_name.trim().is_empty() {
            return Err(EngineError::invalid_config("table name is empty"));
        }
        self.backoff.validate()
    }
}

/// Which mutations may be replayed after a transient failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdempotencyMode {
    /// Replay everything except cells stamped by the server.
    #[default]
    Safe,
    /// Replay everything.
    AlwaysRetry,
}

impl IdempotencyMode {
    /// Builds the matching classifier.
    pub fn build(&self) -> Box<dyn IdempotencyClassifier> {
        match self {
            IdempotencyMode::Safe => Box::new(SafeClassifier),
            IdempotencyMode::AlwaysRetry => Box::new(AlwaysRetryClassifier),
        }
    }
}

/// How long the engine keeps retrying transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryConfig {
    /// Stop after more than `max_failures` transient failures.
    ErrorCount {
        /// Transient failures tolerated per batch.
        max_failures: u32,
    },
    /// Stop once `max_duration` has elapsed since the batch started.
    Time {
        /// Time budget per batch.
        max_duration: Duration,
    },
}

impl RetryConfig {
    /// Tolerates up to `max_failures` transient failures.
    pub fn error_count(max_failures: u32) -> Self {
        RetryConfig::ErrorCount { max_failures }
    }

    /// Retries for up to `max_duration`.
    pub fn time(max_duration: Duration) -> Self {
        RetryConfig::Time { max_duration }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::error_count(0)
    }

    /// Builds the matching policy.
    pub fn build(&self, classifier: Arc<dyn StatusClassifier>) -> Box<dyn RetryPolicy> {
        match self {
            RetryConfig::ErrorCount { max_failures } => Box::new(
                LimitedErrorCountRetryPolicy::with_classifier(*max_failures, classifier),
            ),
            RetryConfig::Time { max_duration } => Box::new(
                LimitedTimeRetryPolicy::with_classifier(*max_duration, classifier),
            ),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::time(Duration::from_secs(600))
    }
}

/// Configuration for the delay between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl BackoffConfig {
    /// Creates an exponential backoff configuration with jitter.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retries immediately; useful for tests and emulators.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(EngineError::invalid_config(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(EngineError::invalid_config(
                "initial backoff delay exceeds the maximum delay",
            ));
        }
        Ok(())
    }

    /// Builds the matching policy.
    pub fn build(&self) -> Box<dyn BackoffPolicy> {
        let policy =
            ExponentialBackoffPolicy::new(self.initial_delay, self.max_delay, self.multiplier);
        if self.jitter {
            Box::new(policy)
        } else {
            Box::new(policy.without_jitter())
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DefaultStatusClassifier;
    use bulkwrite_protocol::{Mutation, Status};

    #[test]
    fn mutator_config_builder() {
        let config = MutatorConfig::new("projects/p/instances/i/tables/t")
            .with_app_profile("batch")
            .with_retry(RetryConfig::error_count(4))
            .with_backoff(BackoffConfig::none())
            .with_idempotency(IdempotencyMode::AlwaysRetry);

        assert_eq!(config.table_name, "projects/p/instances/i/tables/t");
        assert_eq!(config.app_profile_id, "batch");
        assert_eq!(config.retry, RetryConfig::ErrorCount { max_failures: 4 });
        assert_eq!(config.idempotency, IdempotencyMode::AlwaysRetry);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults() {
        let config = MutatorConfig::new("t");
        assert_eq!(config.idempotency, IdempotencyMode::Safe);
        assert_eq!(
            config.retry,
            RetryConfig::Time {
                max_duration: Duration::from_secs(600)
            }
        );
        assert_eq!(config.backoff.initial_delay, Duration::from_millis(10));
        assert!(config.backoff.jitter);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(MutatorConfig::new("  ").validate().is_err());

        let config =
            MutatorConfig::new("t").with_backoff(BackoffConfig::default().with_multiplier(0.5));
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));

        let inverted = BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(1));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn no_retry_gives_up_on_first_failure() {
        let mut policy = RetryConfig::no_retry().build(Arc::new(DefaultStatusClassifier));
        assert!(!policy.on_failure(&Status::unavailable("busy")));
    }

    #[test]
    fn idempotency_mode_builds_classifier() {
        let stamped = Mutation::set_cell_server_time("cf", "q", "v");
        assert!(!IdempotencyMode::Safe.build().is_idempotent(&stamped));
        assert!(IdempotencyMode::AlwaysRetry.build().is_idempotent(&stamped));
    }

    #[test]
    fn backoff_none_is_immediate() {
        let mut policy = BackoffConfig::none().build();
        assert_eq!(
            policy.on_completion(&Status::unavailable("busy")),
            Duration::ZERO
        );
    }
}
