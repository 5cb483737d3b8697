use std::fmt;

use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

use crate::retry::{is_clock_skew_code, is_throttling_code};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Retry classification of an [`Error`], computed once by [`Error::kind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Throttling,
    ClockSkew,
    RetryableService,
    NonRetryableService,
    TransportIo,
    BodyNotResettable,
    DeadlineExceeded,
    Cancelled,
    Client,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Throttling => "throttling",
            Self::ClockSkew => "clock_skew",
            Self::RetryableService => "retryable_service",
            Self::NonRetryableService => "non_retryable_service",
            Self::TransportIo => "transport_io",
            Self::BodyNotResettable => "body_not_resettable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Client => "client",
        }
    }

    /// Throttled retries are paced by backoff alone and never draw from the retry budget.
    pub const fn consumes_retry_capacity(self) -> bool {
        !matches!(self, Self::Throttling)
    }

    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Throttling | Self::ClockSkew | Self::RetryableService | Self::TransportIo
        )
    }

    pub const fn is_interruption(self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidConfig,
    Transport,
    AttemptTimeout,
    Service,
    BodyNotResettable,
    DeadlineExceeded,
    Cancelled,
    ReadBody,
    ResponseBodyTooLarge,
    Deserialize,
    Unmarshall,
    Credentials,
    Signing,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::InvalidConfig => "invalid_config",
            Self::Transport => "transport",
            Self::AttemptTimeout => "attempt_timeout",
            Self::Service => "service",
            Self::BodyNotResettable => "body_not_resettable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::Deserialize => "deserialize",
            Self::Unmarshall => "unmarshall",
            Self::Credentials => "credentials",
            Self::Signing => "signing",
        }
    }
}

/// An error response decoded by an [`ErrorHandler`](crate::ErrorHandler).
#[derive(Clone, Debug)]
pub struct ServiceError {
    status: StatusCode,
    error_code: Option<String>,
    message: String,
    request_id: Option<String>,
    headers: HeaderMap,
}

impl ServiceError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code: None,
            message: message.into(),
            request_id: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Headers of the response that produced this error.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn kind(&self) -> ErrorKind {
        let code = self.error_code.as_deref();
        if self.status == StatusCode::TOO_MANY_REQUESTS || code.is_some_and(is_throttling_code) {
            return ErrorKind::Throttling;
        }
        if code.is_some_and(is_clock_skew_code) {
            return ErrorKind::ClockSkew;
        }
        if self.status.is_server_error() {
            return ErrorKind::RetryableService;
        }
        ErrorKind::NonRetryableService
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "service error {} ({}): {}",
            self.status.as_u16(),
            self.error_code.as_deref().unwrap_or("unknown"),
            self.message
        )?;
        if let Some(request_id) = &self.request_id {
            write!(formatter, "; request_id={request_id}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("invalid client configuration: {message}")]
    InvalidConfig { message: String },
    #[error("unable to execute http request ({method} {uri}): {source}")]
    Transport {
        method: Method,
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http attempt timed out after {timeout_ms}ms for {method} {uri}")]
    AttemptTimeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error(transparent)]
    Service(Box<ServiceError>),
    #[error("request body cannot be reset for retry of {method} {uri}: {source}")]
    BodyNotResettable {
        method: Method,
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("client execution deadline exceeded after {timeout_ms}ms for {method} {uri}")]
    DeadlineExceeded {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("request execution cancelled for {method} {uri}")]
    Cancelled { method: Method, uri: String },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: std::io::Error,
    },
    #[error("response body too large (> {limit_bytes} bytes)")]
    ResponseBodyTooLarge { limit_bytes: usize },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("unable to unmarshall response ({status}): {source}")]
    Unmarshall {
        status: u16,
        #[source]
        source: BoxError,
    },
    #[error("failed to resolve credentials: {source}")]
    Credentials {
        #[source]
        source: BoxError,
    },
    #[error("failed to sign request: {source}")]
    Signing {
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::AttemptTimeout { .. } => ErrorCode::AttemptTimeout,
            Self::Service(_) => ErrorCode::Service,
            Self::BodyNotResettable { .. } => ErrorCode::BodyNotResettable,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Unmarshall { .. } => ErrorCode::Unmarshall,
            Self::Credentials { .. } => ErrorCode::Credentials,
            Self::Signing { .. } => ErrorCode::Signing,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Service(service) => service.kind(),
            Self::Transport { .. } | Self::AttemptTimeout { .. } | Self::ReadBody { .. } => {
                ErrorKind::TransportIo
            }
            Self::BodyNotResettable { .. } => ErrorKind::BodyNotResettable,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            _ => ErrorKind::Client,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Service(service) => Some(service.status()),
            Self::Unmarshall { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(service) => Some(service),
            _ => None,
        }
    }
}

impl From<ServiceError> for Error {
    fn from(error: ServiceError) -> Self {
        Self::Service(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_throttling_even_without_error_code() {
        let error = Error::from(ServiceError::new(StatusCode::TOO_MANY_REQUESTS, "slow down"));
        assert_eq!(error.kind(), ErrorKind::Throttling);
        assert!(!error.kind().consumes_retry_capacity());
    }

    #[test]
    fn throttling_code_wins_over_server_error_status() {
        let error = Error::from(
            ServiceError::new(StatusCode::SERVICE_UNAVAILABLE, "reduce your request rate")
                .with_error_code("SlowDown"),
        );
        assert_eq!(error.kind(), ErrorKind::Throttling);
    }

    #[test]
    fn clock_skew_codes_are_classified_before_status() {
        let error = Error::from(
            ServiceError::new(StatusCode::FORBIDDEN, "skewed").with_error_code("RequestTimeTooSkewed"),
        );
        assert_eq!(error.kind(), ErrorKind::ClockSkew);
        assert!(error.kind().is_retryable());
    }

    #[test]
    fn server_and_client_statuses_split_retryability() {
        let server = Error::from(ServiceError::new(StatusCode::BAD_GATEWAY, "upstream"));
        let client = Error::from(ServiceError::new(StatusCode::NOT_FOUND, "missing"));
        assert_eq!(server.kind(), ErrorKind::RetryableService);
        assert_eq!(client.kind(), ErrorKind::NonRetryableService);
        assert_eq!(client.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn local_failures_are_client_kind() {
        let error = Error::Signing {
            source: "no key".into(),
        };
        assert_eq!(error.kind(), ErrorKind::Client);
        assert_eq!(error.code().as_str(), "signing");
    }

    #[test]
    fn attempt_timeout_is_transport_io() {
        let error = Error::AttemptTimeout {
            timeout_ms: 20,
            method: Method::GET,
            uri: "http://localhost/".to_owned(),
        };
        assert_eq!(error.kind(), ErrorKind::TransportIo);
        assert!(error.kind().is_retryable());
    }

    #[test]
    fn service_error_display_includes_code_and_request_id() {
        let error = ServiceError::new(StatusCode::BAD_REQUEST, "bad input")
            .with_error_code("ValidationException")
            .with_request_id("req-1");
        assert_eq!(
            error.to_string(),
            "service error 400 (ValidationException): bad input; request_id=req-1"
        );
    }
}
