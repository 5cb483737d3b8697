use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};

use crate::budget::RetryBudget;
use crate::clock_skew::ClockOffset;
use crate::config::{ClientConfig, ClientProfile};
use crate::error::Error;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::metrics::ClientMetrics;
use crate::timer::ExecutionTimer;
use crate::transport::Transport;
use crate::util::{parse_header_name, parse_header_value};

use super::{Client, ClientBuilder};

impl ClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            retry_budget: None,
            clock_offset: None,
            interceptors: InterceptorChain::new(),
        }
    }

    /// Replaces the whole configuration with the profile's preset.
    pub fn profile(mut self, profile: ClientProfile) -> Self {
        self.config = profile.config();
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn execution_timeout(mut self, execution_timeout: Duration) -> Self {
        self.config = self.config.with_execution_timeout(execution_timeout);
        self
    }

    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.config = self.config.with_attempt_timeout(attempt_timeout);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config = self.config.with_connect_timeout(connect_timeout);
        self
    }

    pub fn max_retry_capacity(mut self, max_retry_capacity: i64) -> Self {
        self.config = self.config.with_max_retry_capacity(max_retry_capacity);
        self
    }

    pub fn unbounded_retry_capacity(mut self) -> Self {
        self.config = self.config.with_unbounded_retry_capacity();
        self
    }

    pub fn retry_cost(mut self, retry_cost: u32) -> Self {
        self.config = self.config.with_retry_cost(retry_cost);
        self
    }

    pub fn success_increment(mut self, success_increment: u32) -> Self {
        self.config = self.config.with_success_increment(success_increment);
        self
    }

    pub fn read_limit(mut self, read_limit: usize) -> Self {
        self.config = self.config.with_read_limit(read_limit);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config = self.config.with_user_agent(user_agent);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config = self.config.with_default_header(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.default_header(header_name, header_value))
    }

    pub fn metrics_enabled(mut self, metrics_enabled: bool) -> Self {
        self.config = self.config.with_metrics_enabled(metrics_enabled);
        self
    }

    /// Shares one budget between several clients. Overrides the capacity settings.
    pub fn retry_budget(mut self, retry_budget: Arc<RetryBudget>) -> Self {
        self.retry_budget = Some(retry_budget);
        self
    }

    /// Shares one clock offset between several clients talking to the same service.
    pub fn clock_offset(mut self, clock_offset: Arc<ClockOffset>) -> Self {
        self.clock_offset = Some(clock_offset);
        self
    }

    /// Client-wide interceptors run ahead of the ones carried by each call's context.
    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn interceptor_arc(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn try_build(self) -> crate::Result<Client> {
        parse_header_value("user-agent", &self.config.user_agent)?;
        if self.config.read_limit == 0 {
            return Err(Error::InvalidConfig {
                message: "read_limit must be greater than zero".to_owned(),
            });
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };
        let retry_budget = self.retry_budget.unwrap_or_else(|| {
            Arc::new(
                RetryBudget::new(self.config.max_retry_capacity)
                    .with_success_increment(self.config.success_increment),
            )
        });
        let clock_offset = self
            .clock_offset
            .unwrap_or_else(|| Arc::new(ClockOffset::default()));
        let metrics = if self.config.metrics_enabled {
            ClientMetrics::enabled()
        } else {
            ClientMetrics::disabled()
        };

        Ok(Client {
            config: self.config,
            transport,
            retry_budget,
            clock_offset,
            timer: Arc::new(ExecutionTimer::new()),
            interceptors: self.interceptors,
            metrics,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "ureq-transport")]
fn default_transport(config: &ClientConfig) -> crate::Result<Arc<dyn Transport>> {
    Ok(Arc::new(super::UreqTransport::with_settings(
        &config.user_agent,
        config.connect_timeout,
    )))
}

#[cfg(not(feature = "ureq-transport"))]
fn default_transport(_config: &ClientConfig) -> crate::Result<Arc<dyn Transport>> {
    Err(Error::InvalidConfig {
        message: "no transport configured; enable the `ureq-transport` feature or call `transport`"
            .to_owned(),
    })
}
