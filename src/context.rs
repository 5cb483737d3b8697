use std::fmt;
use std::sync::Arc;

use crate::auth::{Credentials, CredentialsProvider, FixedSignerProvider, Signer, SignerProvider};
use crate::error::Error;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::observe::ProgressListener;
use crate::request::Request;
use crate::timer::CancellationToken;

/// Collaborators and mutable state of one logical call.
#[derive(Default)]
pub struct ExecutionContext {
    interceptors: InterceptorChain,
    credentials_provider: Option<Arc<dyn CredentialsProvider>>,
    signer_provider: Option<Arc<dyn SignerProvider>>,
    signer: Option<CachedSigner>,
    time_offset: Option<i64>,
    retry_capacity_held: bool,
    cancellation: CancellationToken,
    progress_listener: Option<Arc<dyn ProgressListener>>,
}

struct CachedSigner {
    signer: Arc<dyn Signer>,
    time_offset: i64,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn with_credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials_provider = Some(provider);
        self
    }

    pub fn with_signer_provider(mut self, provider: Arc<dyn SignerProvider>) -> Self {
        self.signer_provider = Some(provider);
        self.signer = None;
        self
    }

    pub fn with_signer(self, signer: Arc<dyn Signer>) -> Self {
        self.with_signer_provider(Arc::new(FixedSignerProvider::new(signer)))
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn progress_listener(&self) -> Option<&Arc<dyn ProgressListener>> {
        self.progress_listener.as_ref()
    }

    /// Clock offset this call signs with, once the call has started.
    pub fn time_offset(&self) -> Option<i64> {
        self.time_offset
    }

    pub(crate) fn set_time_offset(&mut self, time_offset: i64) {
        self.time_offset = Some(time_offset);
    }

    /// Whether this call currently holds capacity taken from the retry budget.
    pub fn retry_capacity_held(&self) -> bool {
        self.retry_capacity_held
    }

    pub(crate) fn set_retry_capacity_held(&mut self, held: bool) {
        self.retry_capacity_held = held;
    }

    pub(crate) fn resolve_credentials(&self) -> crate::Result<Option<Credentials>> {
        let Some(provider) = &self.credentials_provider else {
            return Ok(None);
        };
        provider
            .credentials()
            .map_err(|source| Error::Credentials { source })
    }

    /// The call's signer, created on first use and recreated only when the clock offset moved.
    pub(crate) fn signer(&mut self, request: &Request) -> Option<Arc<dyn Signer>> {
        let time_offset = request.time_offset();
        if let Some(cached) = &self.signer
            && cached.time_offset == time_offset
        {
            return Some(Arc::clone(&cached.signer));
        }

        let signer = self.signer_provider.as_ref()?.signer(request)?;
        self.signer = Some(CachedSigner {
            signer: Arc::clone(&signer),
            time_offset,
        });
        Some(signer)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExecutionContext")
            .field("interceptors", &self.interceptors)
            .field("has_credentials_provider", &self.credentials_provider.is_some())
            .field("has_signer_provider", &self.signer_provider.is_some())
            .field("time_offset", &self.time_offset)
            .field("retry_capacity_held", &self.retry_capacity_held)
            .field("cancellation", &self.cancellation)
            .finish()
    }
}
