//! `reqexec` is the blocking request-execution engine behind HTTP service clients.
//!
//! A [`Client`] drives one logical [`Request`] through as many transport attempts as the
//! injected [`RetryPolicy`] allows, while a shared [`RetryBudget`] throttles retries across
//! calls, an [`ExecutionTimer`] enforces the overall deadline, the [`ClockOffset`] corrects
//! signing time after clock-skew rejections and a [`ReplayableBody`] guarantees that every
//! retried attempt transmits the same bytes.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use http::Method;
//! use reqexec::prelude::*;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .execution_timeout(Duration::from_secs(10))
//!         .attempt_timeout(Duration::from_secs(3))
//!         .try_build()?;
//!
//!     let mut request = Request::new(Method::POST, "https://api.example.com")
//!         .with_resource_path("/v1/items")
//!         .with_body(ReplayableBody::from_bytes(r#"{"name":"demo"}"#));
//!     let mut context = ExecutionContext::new();
//!
//!     let response = client.execute(
//!         &mut request,
//!         &mut context,
//!         &JsonResponseHandler::<Item>::new(),
//!         &StandardErrorHandler::new(),
//!         &StandardRetryPolicy::standard().max_retries(3),
//!     )?;
//!     println!("created id={} after {} attempt(s)", response.value().id, response.attempts());
//!     Ok(())
//! }
//! ```

/// Correlation id attached to every attempt of one logical call.
pub const INVOCATION_ID_HEADER: &str = "amz-sdk-invocation-id";
/// Retry diagnostics: `<attemptsSoFar>/<lastBackoffMs>/<availableCapacityOrBlank>`.
pub const RETRY_INFO_HEADER: &str = "amz-sdk-retry";

mod auth;
mod body;
mod budget;
mod client;
mod clock_skew;
mod config;
mod context;
mod error;
mod handler;
mod interceptor;
mod metrics;
mod observe;
mod request;
mod retry;
mod timer;
mod transport;
mod util;

pub use crate::auth::{
    Credentials, CredentialsProvider, FixedSignerProvider, Signer, SignerProvider,
    StaticCredentialsProvider,
};
pub use crate::body::{DEFAULT_READ_LIMIT, ReplayableBody};
#[cfg(any(test, feature = "fault-injection"))]
pub use crate::body::FaultInjection;
pub use crate::budget::{
    DEFAULT_MAX_RETRY_CAPACITY, DEFAULT_RETRY_COST, DEFAULT_SUCCESS_INCREMENT, RetryBudget,
};
#[cfg(feature = "ureq-transport")]
pub use crate::client::UreqTransport;
pub use crate::client::{Client, ClientBuilder, Response};
pub use crate::clock_skew::{ClockOffset, ClockSkewCorrector};
pub use crate::config::{ClientConfig, ClientProfile};
pub use crate::context::ExecutionContext;
pub use crate::error::{BoxError, Error, ErrorCode, ErrorKind, ServiceError};
pub use crate::handler::{ErrorHandler, JsonResponseHandler, ResponseHandler, StandardErrorHandler};
pub use crate::interceptor::{Interceptor, InterceptorChain};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::observe::{ProgressEvent, ProgressListener};
pub use crate::request::{Request, RequestOptions, RequestSnapshot};
pub use crate::retry::{
    NoRetryPolicy, RetryDecision, RetryPolicy, RetryPolicyContext, StandardRetryPolicy,
    is_clock_skew_code, is_throttling_code,
};
pub use crate::timer::{
    AbortSignal, AttemptRegistration, CancellationToken, ExecutionTask, ExecutionTimer,
};
pub use crate::transport::{HttpResponse, ResponseMetadata, Transport, TransportRequest};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    #[cfg(feature = "ureq-transport")]
    pub use crate::UreqTransport;
    pub use crate::{
        CancellationToken, Client, ClientConfig, ClientProfile, Credentials, Error, ErrorCode,
        ErrorHandler, ErrorKind, ExecutionContext, HttpResponse, Interceptor,
        JsonResponseHandler, NoRetryPolicy, ReplayableBody, Request, RequestOptions, Response,
        ResponseHandler, RetryBudget, RetryPolicy, Signer, StandardErrorHandler,
        StandardRetryPolicy, Transport,
    };
}
