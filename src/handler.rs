use std::fmt;
use std::marker::PhantomData;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, ServiceError};
use crate::transport::HttpResponse;
use crate::util::truncate_body;

const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_MAX_ERROR_BODY_BYTES: usize = 64 * 1024;
const REQUEST_ID_HEADERS: &[&str] = &["x-amzn-requestid", "x-amz-request-id"];
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Decodes a 2xx response into the call's result value.
pub trait ResponseHandler<T>: Send + Sync {
    fn handle(&self, response: &mut HttpResponse) -> crate::Result<T>;

    /// Handlers returning a streaming body keep the connection open past the call.
    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

/// Decodes a non-2xx response into a [`ServiceError`].
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, response: &mut HttpResponse) -> crate::Result<ServiceError>;

    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

impl<T, F> ResponseHandler<T> for F
where
    F: Fn(&mut HttpResponse) -> crate::Result<T> + Send + Sync,
{
    fn handle(&self, response: &mut HttpResponse) -> crate::Result<T> {
        self(response)
    }
}

pub struct JsonResponseHandler<T> {
    max_body_bytes: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T> JsonResponseHandler<T> {
    pub fn new() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            marker: PhantomData,
        }
    }

    pub fn max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes.max(1);
        self
    }
}

impl<T> Default for JsonResponseHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonResponseHandler<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("JsonResponseHandler")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl<T> ResponseHandler<T> for JsonResponseHandler<T>
where
    T: DeserializeOwned,
{
    fn handle(&self, response: &mut HttpResponse) -> crate::Result<T> {
        let body = response.read_body_limited(self.max_body_bytes)?;
        serde_json::from_slice(&body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&body),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct JsonErrorBody {
    #[serde(alias = "Code", alias = "__type")]
    code: Option<String>,
    #[serde(alias = "Message", alias = "errorMessage")]
    message: Option<String>,
}

/// Reads JSON error bodies of the form `{"code"|"__type": ..., "message": ...}`.
///
/// Unparsable bodies still produce a [`ServiceError`] carrying the raw text as its message.
#[derive(Clone, Debug)]
pub struct StandardErrorHandler {
    max_body_bytes: usize,
}

impl StandardErrorHandler {
    pub fn new() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_ERROR_BODY_BYTES,
        }
    }

    pub fn max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes.max(1);
        self
    }
}

impl Default for StandardErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler for StandardErrorHandler {
    fn handle(&self, response: &mut HttpResponse) -> crate::Result<ServiceError> {
        let status = response.status();
        let body = match response.read_body_limited(self.max_body_bytes) {
            Ok(body) => body,
            Err(Error::ResponseBodyTooLarge { .. }) => bytes::Bytes::new(),
            Err(error) => return Err(error),
        };
        let parsed = serde_json::from_slice::<JsonErrorBody>(&body).unwrap_or_default();

        let header_code = response
            .headers()
            .get(ERROR_TYPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(':').next().unwrap_or(value).to_owned());
        let code = parsed
            .code
            .map(|code| code.rsplit('#').next().unwrap_or(&code).to_owned())
            .or(header_code);
        let message = parsed.message.unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_owned()
            } else {
                truncate_body(&body)
            }
        });

        let mut error = ServiceError::new(status, message).with_headers(response.headers().clone());
        if let Some(code) = code {
            error = error.with_error_code(code);
        }
        let request_id = REQUEST_ID_HEADERS.iter().find_map(|name| {
            response
                .headers()
                .get(*name)
                .and_then(|value| value.to_str().ok())
        });
        if let Some(request_id) = request_id {
            error = error.with_request_id(request_id);
        }
        Ok(error)
    }
}
