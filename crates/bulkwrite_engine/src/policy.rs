//! Retry and backoff policies.
//!
//! Policies are stateful (failure counters, deadlines, growing delays), so
//! the driver clones a fresh copy for every batch through `clone_box`. A
//! clone always starts from the initial state.

use crate::status::{DefaultStatusClassifier, StatusClassifier};
use bulkwrite_protocol::Status;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides whether a failed attempt may be followed by another one.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Records a failed attempt; returns true to keep retrying.
    ///
    /// Returns false for non-transient failures and once the policy is used
    /// up.
    fn on_failure(&mut self, status: &Status) -> bool;

    /// Returns true once no further retries are allowed.
    fn is_exhausted(&self) -> bool;

    /// Returns a fresh copy of this policy.
    fn clone_box(&self) -> Box<dyn RetryPolicy>;
}

impl Clone for Box<dyn RetryPolicy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Computes the delay to wait before the next attempt.
pub trait BackoffPolicy: Send + Sync + fmt::Debug {
    /// Returns the delay following an attempt that ended with `status`.
    fn on_completion(&mut self, status: &Status) -> Duration;

    /// Returns a fresh copy of this policy.
    fn clone_box(&self) -> Box<dyn BackoffPolicy>;
}

impl Clone for Box<dyn BackoffPolicy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Tolerates up to `max_failures` transient failures.
#[derive(Debug, Clone)]
pub struct LimitedErrorCountRetryPolicy {
    max_failures: u32,
    failures: u32,
    classifier: Arc<dyn StatusClassifier>,
}

impl LimitedErrorCountRetryPolicy {
    /// Creates a policy using the default status classifier.
    pub fn new(max_failures: u32) -> Self {
        Self::with_classifier(max_failures, Arc::new(DefaultStatusClassifier))
    }

    /// Creates a policy using `classifier` to recognize transient failures.
    pub fn with_classifier(max_failures: u32, classifier: Arc<dyn StatusClassifier>) -> Self {
        Self {
            max_failures,
            failures: 0,
            classifier,
        }
    }

    /// Number of transient failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl RetryPolicy for LimitedErrorCountRetryPolicy {
    fn on_failure(&mut self, status: &Status) -> bool {
        if !self.classifier.is_transient(status) {
            return false;
        }
        self.failures = self.failures.saturating_add(1);
        !self.is_exhausted()
    }

    fn is_exhausted(&self) -> bool {
        self.failures > self.max_failures
    }

    fn clone_box(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::with_classifier(
            self.max_failures,
            Arc::clone(&self.classifier),
        ))
    }
}

/// Keeps retrying transient failures until `max_duration` has elapsed.
///
/// The clock starts when the policy (or a clone of it) is created.
#[derive(Debug, Clone)]
pub struct LimitedTimeRetryPolicy {
    max_duration: Duration,
    deadline: Instant,
    classifier: Arc<dyn StatusClassifier>,
}

impl LimitedTimeRetryPolicy {
    /// Creates a policy using the default status classifier.
    pub fn new(max_duration: Duration) -> Self {
        Self::with_classifier(max_duration, Arc::new(DefaultStatusClassifier))
    }

    /// Creates a policy using `classifier` to recognize transient failures.
    pub fn with_classifier(max_duration: Duration, classifier: Arc<dyn StatusClassifier>) -> Self {
        let now = Instant::now();
        Self {
            max_duration,
            deadline: now.checked_add(max_duration).unwrap_or(now),
            classifier,
        }
    }

    /// Point in time after which the policy is exhausted.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl RetryPolicy for LimitedTimeRetryPolicy {
    fn on_failure(&mut self, status: &Status) -> bool {
        self.classifier.is_transient(status) && !self.is_exhausted()
    }

    fn is_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn clone_box(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::with_classifier(
            self.max_duration,
            Arc::clone(&self.classifier),
        ))
    }
}

/// Exponential backoff with optional jitter.
///
/// Each call returns a delay no larger than the current ceiling, then grows
/// the ceiling by `multiplier` up to `maximum`. With jitter the delay is drawn
/// uniformly from `[ceiling / multiplier, ceiling]`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    initial: Duration,
    maximum: Duration,
    multiplier: f64,
    jitter: bool,
    current: Duration,
}

impl ExponentialBackoffPolicy {
    /// Creates a jittered policy.
    pub fn new(initial: Duration, maximum: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        Self {
            initial,
            maximum,
            multiplier,
            jitter: true,
            current: initial.min(maximum),
        }
    }

    /// Disables jitter, making delays deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn grow(&self) -> Duration {
        let next = self.current.as_secs_f64() * self.multiplier;
        Duration::try_from_secs_f64(next)
            .unwrap_or(self.maximum)
            .min(self.maximum)
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn on_completion(&mut self, status: &Status) -> Duration {
        let ceiling = self.current;
        self.current = self.grow();

        let delay = if self.jitter && !ceiling.is_zero() {
            let floor = ceiling.div_f64(self.multiplier);
            rand::thread_rng().gen_range(floor..=ceiling)
        } else {
            ceiling
        };

        tracing::trace!(code = %status.code, ?delay, "backoff computed");
        delay
    }

    fn clone_box(&self) -> Box<dyn BackoffPolicy> {
        let mut fresh = Self::new(self.initial, self.maximum, self.multiplier);
        fresh.jitter = self.jitter;
        Box::new(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkwrite_protocol::StatusCode;

    #[test]
    fn error_count_policy_counts_transient_failures() {
        let mut policy = LimitedErrorCountRetryPolicy::new(2);
        let transient = Status::unavailable("busy");

        assert!(policy.on_failure(&transient));
        assert!(policy.on_failure(&transient));
        assert!(!policy.is_exhausted());
        assert!(!policy.on_failure(&transient));
        assert!(policy.is_exhausted());
        assert_eq!(policy.failures(), 3);
    }

    #[test]
    fn error_count_policy_rejects_permanent_failures() {
        let mut policy = LimitedErrorCountRetryPolicy::new(5);
        assert!(!policy.on_failure(&Status::new(StatusCode::PermissionDenied, "no")));
        assert_eq!(policy.failures(), 0);
        assert!(!policy.is_exhausted());
    }

    #[test]
    fn zero_failures_allowed() {
        let mut policy = LimitedErrorCountRetryPolicy::new(0);
        assert!(!policy.on_failure(&Status::unavailable("busy")));
    }

    #[test]
    fn clone_starts_fresh() {
        let mut policy = LimitedErrorCountRetryPolicy::new(1);
        policy.on_failure(&Status::unavailable("busy"));
        policy.on_failure(&Status::unavailable("busy"));
        assert!(policy.is_exhausted());

        let fresh = policy.clone_box();
        assert!(!fresh.is_exhausted());
    }

    #[test]
    fn time_policy_clone_restarts_deadline() {
        let policy = LimitedTimeRetryPolicy::new(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert!(policy.is_exhausted());

        let fresh = policy.clone_box();
        assert!(!fresh.is_exhausted());
    }

    #[test]
    fn time_policy_expires() {
        let mut policy = LimitedTimeRetryPolicy::new(Duration::ZERO);
        assert!(policy.is_exhausted());
        assert!(!policy.on_failure(&Status::unavailable("busy")));

        let mut policy = LimitedTimeRetryPolicy::new(Duration::from_secs(3600));
        assert!(!policy.is_exhausted());
        assert!(policy.on_failure(&Status::unavailable("busy")));
        assert!(!policy.on_failure(&Status::invalid_argument("bad")));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        )
        .without_jitter();
        let status = Status::unavailable("busy");

        assert_eq!(policy.on_completion(&status), Duration::from_millis(100));
        assert_eq!(policy.on_completion(&status), Duration::from_millis(200));
        assert_eq!(policy.on_completion(&status), Duration::from_millis(400));
        assert_eq!(policy.on_completion(&status), Duration::from_millis(500));
        assert_eq!(policy.on_completion(&status), Duration::from_millis(500));
    }

    #[test]
    fn backoff_jitter_bounds() {
        let mut policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
        );
        let status = Status::unavailable("busy");

        let first = policy.on_completion(&status);
        assert!(first >= Duration::from_millis(50));
        assert!(first <= Duration::from_millis(100));

        let second = policy.on_completion(&status);
        assert!(second >= Duration::from_millis(100));
        assert!(second <= Duration::from_millis(200));
    }

    #[test]
    fn zero_backoff_stays_zero() {
        let mut policy = ExponentialBackoffPolicy::new(Duration::ZERO, Duration::ZERO, 2.0);
        for _ in 0..5 {
            assert_eq!(
                policy.on_completion(&Status::unavailable("busy")),
                Duration::ZERO
            );
        }
    }

    #[test]
    fn backoff_clone_resets_delay() {
        let mut policy =
            ExponentialBackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 3.0)
                .without_jitter();
        let status = Status::unavailable("busy");
        policy.on_completion(&status);
        policy.on_completion(&status);

        let mut fresh = policy.clone_box();
        assert_eq!(fresh.on_completion(&status), Duration::from_millis(10));
    }
}
