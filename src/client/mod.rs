use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::budget::RetryBudget;
use crate::clock_skew::ClockOffset;
use crate::config::ClientConfig;
use crate::interceptor::InterceptorChain;
use crate::metrics::ClientMetrics;
use crate::timer::ExecutionTimer;
use crate::transport::{ResponseMetadata, Transport};

mod builder;
mod execute;
#[cfg(feature = "ureq-transport")]
mod transport;

#[cfg(feature = "ureq-transport")]
pub use transport::UreqTransport;

/// Executes requests against one service. Cloning is cheap; clones share the retry budget,
/// clock offset, timer and metrics.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    retry_budget: Arc<RetryBudget>,
    clock_offset: Arc<ClockOffset>,
    timer: Arc<ExecutionTimer>,
    interceptors: InterceptorChain,
    metrics: ClientMetrics,
}

impl fmt::Debug for Client {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Client")
            .field("config", &self.config)
            .field("retry_budget", &self.retry_budget)
            .field("clock_offset", &self.clock_offset.get())
            .field("interceptors", &self.interceptors)
            .finish()
    }
}

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    retry_budget: Option<Arc<RetryBudget>>,
    clock_offset: Option<Arc<ClockOffset>>,
    interceptors: InterceptorChain,
}

/// Decoded result of a successful call.
#[derive(Debug)]
pub struct Response<T> {
    value: T,
    metadata: ResponseMetadata,
    attempts: usize,
}

impl<T> Response<T> {
    pub(crate) fn new(value: T, metadata: ResponseMetadata, attempts: usize) -> Self {
        Self {
            value,
            metadata,
            attempts,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn status(&self) -> StatusCode {
        self.metadata.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.metadata.headers()
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    /// Transport attempts the call needed, including the successful one.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn into_parts(self) -> (T, ResponseMetadata) {
        (self.value, self.metadata)
    }
}
