use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::transport::{HttpResponse, ResponseMetadata};

/// Hooks around one logical call. Every method defaults to a no-op.
pub trait Interceptor: Send + Sync {
    /// Runs once per call, before the request is snapshotted for retries.
    fn before_request(&self, _request: &mut Request) {}

    /// May replace the successful response before it is decoded.
    fn before_unmarshalling(&self, _request: &Request, response: HttpResponse) -> HttpResponse {
        response
    }

    fn after_response(&self, _request: &Request, _response: &ResponseMetadata) {}

    fn after_error(&self, _request: &Request, _response: Option<&ResponseMetadata>, _error: &Error) {}
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.push(Arc::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// A chain running `first` ahead of this chain's interceptors.
    pub(crate) fn prepended(&self, first: &InterceptorChain) -> InterceptorChain {
        let mut interceptors = first.interceptors.clone();
        interceptors.extend(self.interceptors.iter().cloned());
        InterceptorChain { interceptors }
    }

    pub(crate) fn before_request<C>(&self, request: &mut Request, checkpoint: C) -> crate::Result<()>
    where
        C: Fn() -> crate::Result<()>,
    {
        for interceptor in &self.interceptors {
            interceptor.before_request(request);
            checkpoint()?;
        }
        Ok(())
    }

    pub(crate) fn before_unmarshalling<C>(
        &self,
        request: &Request,
        mut response: HttpResponse,
        checkpoint: C,
    ) -> crate::Result<HttpResponse>
    where
        C: Fn() -> crate::Result<()>,
    {
        for interceptor in &self.interceptors {
            response = interceptor.before_unmarshalling(request, response);
            checkpoint()?;
        }
        Ok(response)
    }

    pub(crate) fn after_response<C>(
        &self,
        request: &Request,
        response: &ResponseMetadata,
        checkpoint: C,
    ) -> crate::Result<()>
    where
        C: Fn() -> crate::Result<()>,
    {
        for interceptor in &self.interceptors {
            interceptor.after_response(request, response);
            checkpoint()?;
        }
        Ok(())
    }

    pub(crate) fn after_error<C>(
        &self,
        request: &Request,
        response: Option<&ResponseMetadata>,
        error: &Error,
        checkpoint: C,
    ) -> crate::Result<()>
    where
        C: Fn() -> crate::Result<()>,
    {
        for interceptor in &self.interceptors {
            interceptor.after_error(request, response, error);
            checkpoint()?;
        }
        Ok(())
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
