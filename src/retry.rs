use std::time::Duration;

use http::StatusCode;
use rand::Rng;

use crate::error::{Error, ErrorKind};
use crate::request::Request;

const THROTTLING_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "ProvisionedThroughputExceededException",
    "SlowDown",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "PriorRequestNotComplete",
    "EC2ThrottledException",
    "TransactionInProgressException",
];

const CLOCK_SKEW_ERROR_CODES: &[&str] = &[
    "RequestTimeTooSkewed",
    "RequestExpired",
    "InvalidSignatureException",
    "SignatureDoesNotMatch",
    "AuthFailure",
    "RequestInTheFuture",
];

pub fn is_throttling_code(code: &str) -> bool {
    THROTTLING_ERROR_CODES.contains(&code)
}

pub fn is_clock_skew_code(code: &str) -> bool {
    CLOCK_SKEW_ERROR_CODES.contains(&code)
}

/// What a retry policy sees after a failed attempt.
#[derive(Debug)]
pub struct RetryPolicyContext<'a> {
    request: &'a Request,
    error: &'a Error,
    retries_attempted: usize,
}

impl<'a> RetryPolicyContext<'a> {
    pub fn new(request: &'a Request, error: &'a Error, retries_attempted: usize) -> Self {
        Self {
            request,
            error,
            retries_attempted,
        }
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn error(&self) -> &Error {
        self.error
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// `None` for transport failures.
    pub fn http_status(&self) -> Option<StatusCode> {
        self.error.status()
    }

    /// Retries already performed by the call, zero before the first retry.
    pub fn retries_attempted(&self) -> usize {
        self.retries_attempted
    }
}

/// Outcome of one retry check after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub kind: ErrorKind,
    /// Budget capacity was taken by this very check.
    pub capacity_acquired: bool,
}

impl RetryDecision {
    pub(crate) fn stop(kind: ErrorKind) -> Self {
        Self {
            retry: false,
            kind,
            capacity_acquired: false,
        }
    }
}

pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool;

    fn compute_delay_before_next_retry(&self, context: &RetryPolicyContext<'_>) -> Duration;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn should_retry(&self, _context: &RetryPolicyContext<'_>) -> bool {
        false
    }

    fn compute_delay_before_next_retry(&self, _context: &RetryPolicyContext<'_>) -> Duration {
        Duration::ZERO
    }
}

/// Bounded retries of retryable failures with capped exponential backoff and jitter.
#[derive(Clone, Debug)]
pub struct StandardRetryPolicy {
    max_retries: usize,
    base_backoff: Duration,
    throttled_base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
}

impl StandardRetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            throttled_base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(20),
            jitter_ratio: 0.2,
        }
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn throttled_base_backoff(mut self, throttled_base_backoff: Duration) -> Self {
        self.throttled_base_backoff = throttled_base_backoff;
        self
    }

    /// Upper bound on every delay, throttled or not, after jitter.
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn max_retries_value(&self) -> usize {
        self.max_retries
    }

    pub(crate) fn backoff_for_retry(&self, retries_attempted: usize, throttled: bool) -> Duration {
        let base = if throttled {
            self.throttled_base_backoff
        } else {
            self.base_backoff
        };
        let base_ms = base.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let capped_exponent = retries_attempted.min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let max_ms = self.max_backoff.as_millis();
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for StandardRetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy for StandardRetryPolicy {
    fn should_retry(&self, context: &RetryPolicyContext<'_>) -> bool {
        context.retries_attempted() < self.max_retries && context.kind().is_retryable()
    }

    fn compute_delay_before_next_retry(&self, context: &RetryPolicyContext<'_>) -> Duration {
        let throttled = context.kind() == ErrorKind::Throttling;
        self.backoff_for_retry(context.retries_attempted(), throttled)
    }
}
