use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::body::ReplayableBody;
use crate::error::Error;
use crate::timer::AbortSignal;

const DRAIN_LIMIT: u64 = 64 * 1024;

/// One attempt handed to a [`Transport`].
///
/// `abort` fires when the call deadline or the attempt timeout expires; transports should hook
/// it to close the connection so a blocked send returns promptly. `timeout` is the time left
/// for this attempt, if any.
pub struct TransportRequest<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub body: Option<&'a mut ReplayableBody>,
    pub abort: &'a AbortSignal,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for TransportRequest<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransportRequest")
            .field("method", self.method)
            .field("uri", self.uri)
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub trait Transport: Send + Sync {
    /// Sends one attempt and returns the response head with an unread body.
    ///
    /// Any status, including errors, is a successful send.
    fn send(&self, request: TransportRequest<'_>) -> io::Result<HttpResponse>;
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn send(&self, request: TransportRequest<'_>) -> io::Result<HttpResponse> {
        (**self).send(request)
    }
}

/// Status and headers of the response that ended a call.
#[derive(Clone, Debug)]
pub struct ResponseMetadata {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseMetadata {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Box<dyn Read + Send>>,
}

impl HttpResponse {
    pub fn new<R>(status: StatusCode, headers: HeaderMap, body: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            status,
            headers,
            body: Some(Box::new(body)),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, io::Cursor::new(body.into()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata::new(self.status, self.headers.clone())
    }

    pub fn body_mut(&mut self) -> Option<&mut (dyn Read + Send + 'static)> {
        self.body.as_deref_mut()
    }

    /// Moves the body out, typically by a handler that streams it past the call.
    pub fn take_body(&mut self) -> Option<Box<dyn Read + Send>> {
        self.body.take()
    }

    pub fn replace_body<R>(&mut self, body: R)
    where
        R: Read + Send + 'static,
    {
        self.body = Some(Box::new(body));
    }

    /// Reads the remaining body, failing once it grows past `limit_bytes`.
    pub fn read_body_limited(&mut self, limit_bytes: usize) -> crate::Result<Bytes> {
        let Some(body) = self.body.as_mut() else {
            return Ok(Bytes::new());
        };
        let mut collected = Vec::new();
        let limit = u64::try_from(limit_bytes).unwrap_or(u64::MAX).saturating_add(1);
        body.take(limit)
            .read_to_end(&mut collected)
            .map_err(|source| Error::ReadBody { source })?;
        if collected.len() > limit_bytes {
            return Err(Error::ResponseBodyTooLarge { limit_bytes });
        }
        Ok(Bytes::from(collected))
    }

    /// Drains a bounded amount of the unread body so the connection can be reused, then drops it.
    pub fn close(&mut self) {
        if let Some(mut body) = self.body.take()
            && let Err(error) = io::copy(&mut (&mut body).take(DRAIN_LIMIT), &mut io::sink())
        {
            tracing::debug!(error = %error, "failed to drain response body before close");
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
