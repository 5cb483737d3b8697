use std::time::Duration;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::body::DEFAULT_READ_LIMIT;
use crate::budget::{DEFAULT_MAX_RETRY_CAPACITY, DEFAULT_RETRY_COST, DEFAULT_SUCCESS_INCREMENT};
use crate::retry::StandardRetryPolicy;

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("reqexec/", env!("CARGO_PKG_VERSION"));
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientProfile {
    #[default]
    StandardSdk,
    LowLatency,
    HighThroughput,
}

impl ClientProfile {
    pub fn config(self) -> ClientConfig {
        match self {
            Self::StandardSdk => ClientConfig::default(),
            Self::LowLatency => ClientConfig::default()
                .with_execution_timeout(Duration::from_secs(5))
                .with_attempt_timeout(Duration::from_secs(2))
                .with_connect_timeout(Duration::from_secs(1)),
            Self::HighThroughput => ClientConfig::default()
                .with_execution_timeout(Duration::from_secs(60))
                .with_attempt_timeout(Duration::from_secs(20))
                .with_max_retry_capacity(DEFAULT_MAX_RETRY_CAPACITY * 2),
        }
    }

    pub fn retry_policy(self) -> StandardRetryPolicy {
        match self {
            Self::StandardSdk => StandardRetryPolicy::standard(),
            Self::LowLatency => StandardRetryPolicy::standard()
                .max_retries(1)
                .base_backoff(Duration::from_millis(25))
                .throttled_base_backoff(Duration::from_millis(100))
                .max_backoff(Duration::from_millis(300)),
            Self::HighThroughput => StandardRetryPolicy::standard()
                .max_retries(4)
                .base_backoff(Duration::from_millis(150))
                .max_backoff(Duration::from_secs(3)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub execution_timeout: Option<Duration>,
    pub attempt_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    /// Negative means unbounded: throttled retries are never denied.
    pub max_retry_capacity: i64,
    pub retry_cost: u32,
    pub success_increment: u32,
    pub read_limit: usize,
    pub user_agent: String,
    pub default_headers: HeaderMap,
    pub metrics_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            execution_timeout: None,
            attempt_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retry_capacity: DEFAULT_MAX_RETRY_CAPACITY,
            retry_cost: DEFAULT_RETRY_COST,
            success_increment: DEFAULT_SUCCESS_INCREMENT,
            read_limit: DEFAULT_READ_LIMIT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_headers: HeaderMap::new(),
            metrics_enabled: false,
        }
    }
}

impl ClientConfig {
    pub fn with_execution_timeout(mut self, execution_timeout: Duration) -> Self {
        self.execution_timeout = Some(execution_timeout);
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn with_max_retry_capacity(mut self, max_retry_capacity: i64) -> Self {
        self.max_retry_capacity = max_retry_capacity;
        self
    }

    pub fn with_unbounded_retry_capacity(mut self) -> Self {
        self.max_retry_capacity = -1;
        self
    }

    pub fn with_retry_cost(mut self, retry_cost: u32) -> Self {
        self.retry_cost = retry_cost;
        self
    }

    pub fn with_success_increment(mut self, success_increment: u32) -> Self {
        self.success_increment = success_increment;
        self
    }

    pub fn with_read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = read_limit.max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_metrics_enabled(mut self, metrics_enabled: bool) -> Self {
        self.metrics_enabled = metrics_enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_profile_uses_throttled_retry_defaults() {
        let config = ClientProfile::StandardSdk.config();
        assert_eq!(config.max_retry_capacity, 500);
        assert_eq!(config.retry_cost, 5);
        assert_eq!(config.success_increment, 1);
        assert_eq!(config.read_limit, 128 * 1024 + 1);
        assert_eq!(config.execution_timeout, None);
    }

    #[test]
    fn low_latency_profile_bounds_every_phase() {
        let config = ClientProfile::LowLatency.config();
        assert_eq!(config.execution_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(2)));
        assert_eq!(ClientProfile::LowLatency.retry_policy().max_retries_value(), 1);
    }

    #[test]
    fn unbounded_capacity_uses_negative_sentinel() {
        let config = ClientConfig::default().with_unbounded_retry_capacity();
        assert!(config.max_retry_capacity < 0);
    }
}
