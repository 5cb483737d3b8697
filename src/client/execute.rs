use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http::header::{CONTENT_LENGTH, HeaderName, HeaderValue, USER_AGENT};
use http::{Method, Uri};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Credentials;
use crate::clock_skew::ClockSkewCorrector;
use crate::context::ExecutionContext;
use crate::error::{Error, ErrorKind};
use crate::handler::{ErrorHandler, ResponseHandler};
use crate::interceptor::InterceptorChain;
use crate::metrics::ClientMetricsSnapshot;
use crate::observe::{ProgressEvent, publish};
use crate::request::Request;
use crate::retry::{RetryDecision, RetryPolicy, RetryPolicyContext};
use crate::timer::{AbortSignal, CancellationToken, ExecutionTask};
use crate::transport::{HttpResponse, ResponseMetadata, TransportRequest};
use crate::util::{duration_millis, parse_header_value, redact_uri_for_logs};
use crate::{INVOCATION_ID_HEADER, RETRY_INFO_HEADER};

use super::{Client, ClientBuilder, Response};

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &crate::ClientConfig {
        &self.config
    }

    pub fn retry_budget(&self) -> &Arc<crate::RetryBudget> {
        &self.retry_budget
    }

    /// Offset applied to signing time by every call of this client.
    pub fn clock_offset(&self) -> &Arc<crate::ClockOffset> {
        &self.clock_offset
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drives `request` through as many attempts as `retry_policy` and the retry budget allow.
    ///
    /// On return the request's headers and parameters are back to what the caller passed in and
    /// the body is rewound whenever possible, so the same request can be executed again.
    /// Per-call state on `context` is reset on entry.
    pub fn execute<T, R, E, P>(
        &self,
        request: &mut Request,
        context: &mut ExecutionContext,
        response_handler: &R,
        error_handler: &E,
        retry_policy: &P,
    ) -> crate::Result<Response<T>>
    where
        R: ResponseHandler<T> + ?Sized,
        E: ErrorHandler + ?Sized,
        P: RetryPolicy + ?Sized,
    {
        let _in_flight = self.metrics.enter_call();
        let started_at = Instant::now();
        let execution = Execution::new(
            self,
            request,
            context,
            response_handler,
            error_handler,
            retry_policy,
        );
        let result = execution.run();
        self.metrics.record_call_completed(&result, started_at.elapsed());
        result
    }
}

/// Per-call deadline and cancellation checks, shared by every hook and attempt.
struct CallGuard {
    task: ExecutionTask,
    cancellation: CancellationToken,
    timeout: Duration,
    method: Method,
    uri: String,
}

impl CallGuard {
    fn check(&self) -> crate::Result<()> {
        if self.task.has_expired() || self.cancellation.is_cancelled() {
            return Err(self.interrupted());
        }
        Ok(())
    }

    /// The deadline wins over a caller cancellation when both happened.
    fn interrupted(&self) -> Error {
        if self.task.has_expired() {
            self.cancellation.clear();
            return Error::DeadlineExceeded {
                timeout_ms: self.timeout.as_millis(),
                method: self.method.clone(),
                uri: self.uri.clone(),
            };
        }
        Error::Cancelled {
            method: self.method.clone(),
            uri: self.uri.clone(),
        }
    }
}

#[derive(Default)]
struct AttemptState {
    request_count: usize,
    last_backoff: Duration,
    retried_error: Option<Error>,
    leave_connection_open: bool,
    response: Option<HttpResponse>,
}

impl AttemptState {
    fn begin_attempt(&mut self) {
        self.close_response();
        self.request_count += 1;
    }

    fn is_retry(&self) -> bool {
        self.request_count > 1
    }

    fn close_response(&mut self) {
        if let Some(mut response) = self.response.take()
            && !self.leave_connection_open
        {
            response.close();
        }
        self.leave_connection_open = false;
    }
}

struct Execution<'a, T, R: ?Sized, E: ?Sized, P: ?Sized> {
    client: &'a Client,
    request: &'a mut Request,
    context: &'a mut ExecutionContext,
    response_handler: &'a R,
    error_handler: &'a E,
    retry_policy: &'a P,
    interceptors: InterceptorChain,
    guard: CallGuard,
    attempt_timeout: Option<Duration>,
    read_limit: usize,
    last_response: Option<ResponseMetadata>,
    marker: PhantomData<fn() -> T>,
}

impl<'a, T, R, E, P> Execution<'a, T, R, E, P>
where
    R: ResponseHandler<T> + ?Sized,
    E: ErrorHandler + ?Sized,
    P: RetryPolicy + ?Sized,
{
    fn new(
        client: &'a Client,
        request: &'a mut Request,
        context: &'a mut ExecutionContext,
        response_handler: &'a R,
        error_handler: &'a E,
        retry_policy: &'a P,
    ) -> Self {
        let options = request.options();
        let timeout = options
            .execution_timeout_value()
            .or(client.config.execution_timeout)
            .unwrap_or(Duration::ZERO);
        let attempt_timeout = options
            .attempt_timeout_value()
            .or(client.config.attempt_timeout)
            .filter(|timeout| !timeout.is_zero());
        let read_limit = options
            .read_limit_value()
            .unwrap_or(client.config.read_limit);
        let uri = match request.uri() {
            Ok((uri_text, _)) => redact_uri_for_logs(&uri_text),
            Err(_) => redact_uri_for_logs(request.endpoint()),
        };

        let guard = CallGuard {
            task: client.timer.start(timeout, context.cancellation()),
            cancellation: context.cancellation().clone(),
            timeout,
            method: request.method().clone(),
            uri,
        };
        let interceptors = context.interceptors().prepended(&client.interceptors);

        Self {
            client,
            request,
            context,
            response_handler,
            error_handler,
            retry_policy,
            interceptors,
            guard,
            attempt_timeout,
            read_limit,
            last_response: None,
            marker: PhantomData,
        }
    }

    fn run(mut self) -> crate::Result<Response<T>> {
        publish(
            self.context.progress_listener(),
            ProgressEvent::ClientRequestStarted,
        );

        self.context.set_retry_capacity_held(false);
        let original = self.request.snapshot();
        let mut state = AttemptState::default();
        let result = match self.execute_attempts(&mut state) {
            Ok(response) => self.complete(response),
            Err(error) => Err(self.fail(error)),
        };

        state.close_response();
        self.request.restore(&original);
        self.rewind_body();
        self.context.set_retry_capacity_held(false);
        self.guard.task.cancel();
        if self.guard.task.has_expired() {
            self.guard.cancellation.clear();
        }

        let event = if result.is_ok() {
            ProgressEvent::ClientRequestSucceeded
        } else {
            ProgressEvent::ClientRequestFailed
        };
        publish(self.context.progress_listener(), event);
        result
    }

    fn complete(&mut self, response: Response<T>) -> crate::Result<Response<T>> {
        let guard = &self.guard;
        self.interceptors
            .after_response(&*self.request, response.metadata(), || guard.check())?;
        Ok(response)
    }

    /// Runs the error hooks. A deadline or cancellation observed by a hook replaces `error`.
    fn fail(&mut self, error: Error) -> Error {
        let guard = &self.guard;
        let recheck = !error.kind().is_interruption();
        let hooks = self.interceptors.after_error(
            &*self.request,
            self.last_response.as_ref(),
            &error,
            || if recheck { guard.check() } else { Ok(()) },
        );
        match hooks {
            Ok(()) => {
                debug!(
                    method = %self.guard.method,
                    uri = %self.guard.uri,
                    code = error.code().as_str(),
                    kind = error.kind().as_str(),
                    "request failed"
                );
                error
            }
            Err(interrupted) => interrupted,
        }
    }

    fn execute_attempts(&mut self, state: &mut AttemptState) -> crate::Result<Response<T>> {
        self.guard.check()?;
        self.prepare_request()?;
        let snapshot = self.request.snapshot();
        let read_limit = self.read_limit;
        if let Some(body) = self.request.body_mut() {
            body.mark(read_limit);
        }

        loop {
            state.begin_attempt();
            if state.is_retry() {
                self.request.restore(&snapshot);
                self.reset_body()?;
                self.pause_before_retry(state)?;
            }
            self.guard.check()?;

            self.set_retry_info_header(state)?;
            let credentials = self.context.resolve_credentials()?;
            self.sign(credentials.as_ref())?;
            self.guard.check()?;

            let (_, uri) = self.request.uri()?;
            let error = match self.send(&uri, state) {
                Ok(response) if response.status().is_success() => {
                    return self.handle_success(response, state);
                }
                Ok(response) => self.handle_error_response(response, state),
                Err(error) if error.kind().is_interruption() => return Err(error),
                Err(error) => error,
            };
            self.decide_retry(error, state)?;
        }
    }

    fn prepare_request(&mut self) -> crate::Result<()> {
        let guard = &self.guard;
        self.interceptors
            .before_request(self.request, || guard.check())?;

        let config = &self.client.config;
        let options = self.request.options().clone();
        let invocation_id = Uuid::new_v4().to_string();
        let headers = self.request.headers_mut();
        headers.insert(
            HeaderName::from_static(INVOCATION_ID_HEADER),
            parse_header_value(INVOCATION_ID_HEADER, &invocation_id)?,
        );
        if !headers.contains_key(USER_AGENT) {
            headers.insert(
                USER_AGENT,
                parse_header_value(USER_AGENT.as_str(), &config.user_agent)?,
            );
        }
        for (name, value) in &config.default_headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in options.headers() {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in options.parameters() {
            self.request.add_parameter(name.clone(), value.clone());
        }

        let content_length = self.request.body_mut().and_then(|body| body.content_length());
        if let Some(content_length) = content_length {
            self.request
                .headers_mut()
                .entry(CONTENT_LENGTH)
                .or_insert_with(|| HeaderValue::from(content_length));
            publish(
                self.context.progress_listener(),
                ProgressEvent::RequestContentLength(content_length),
            );
        }
        if let Some(listener) = self.context.progress_listener().cloned()
            && let Some(body) = self.request.body_mut()
        {
            body.set_progress_listener(listener);
        }

        let shared_offset = self.client.clock_offset.get();
        let time_offset = if shared_offset != 0 {
            shared_offset
        } else {
            self.request.time_offset()
        };
        self.context.set_time_offset(time_offset);
        self.request.set_time_offset(time_offset);
        Ok(())
    }

    fn reset_body(&mut self) -> crate::Result<()> {
        let Some(body) = self.request.body_mut() else {
            return Ok(());
        };
        body.reset().map_err(|source| {
            warn!(
                method = %self.guard.method,
                uri = %self.guard.uri,
                error = %source,
                "request body cannot be replayed; giving up"
            );
            Error::BodyNotResettable {
                method: self.guard.method.clone(),
                uri: self.guard.uri.clone(),
                source,
            }
        })
    }

    fn pause_before_retry(&mut self, state: &mut AttemptState) -> crate::Result<()> {
        let Some(retried_error) = state.retried_error.as_ref() else {
            return Ok(());
        };
        let retries_attempted = state.request_count.saturating_sub(2);
        let policy_context = RetryPolicyContext::new(&*self.request, retried_error, retries_attempted);
        let delay = self
            .retry_policy
            .compute_delay_before_next_retry(&policy_context);
        state.last_backoff = delay;

        self.client.metrics.record_retry();
        publish(
            self.context.progress_listener(),
            ProgressEvent::ClientRequestRetry {
                attempt: state.request_count,
                delay,
            },
        );
        debug!(
            method = %self.guard.method,
            uri = %self.guard.uri,
            attempt = state.request_count,
            delay_ms = duration_millis(delay),
            error = %retried_error,
            "retrying request"
        );

        if !delay.is_zero() && !self.guard.cancellation.sleep(delay) {
            return Err(self.guard.interrupted());
        }
        Ok(())
    }

    fn set_retry_info_header(&mut self, state: &AttemptState) -> crate::Result<()> {
        let available = self
            .client
            .retry_budget
            .available_capacity()
            .map(|capacity| capacity.to_string())
            .unwrap_or_default();
        let value = format!(
            "{}/{}/{}",
            state.request_count - 1,
            duration_millis(state.last_backoff),
            available
        );
        self.request.headers_mut().insert(
            HeaderName::from_static(RETRY_INFO_HEADER),
            parse_header_value(RETRY_INFO_HEADER, &value)?,
        );
        Ok(())
    }

    fn sign(&mut self, credentials: Option<&Credentials>) -> crate::Result<()> {
        let Some(signer) = self.context.signer(&*self.request) else {
            return Ok(());
        };
        if credentials.is_none() && !signer.signs_anonymously() {
            return Ok(());
        }
        signer
            .sign(self.request, credentials)
            .map_err(|source| Error::Signing { source })
    }

    fn send(&mut self, uri: &Uri, state: &AttemptState) -> crate::Result<HttpResponse> {
        let attempt = state.request_count;
        let abort = AbortSignal::new();
        let attempt_timeout = self.attempt_timeout.unwrap_or(Duration::ZERO);
        let attempt_task = self.client.timer.start_attempt(attempt_timeout, &abort);
        let timeout = match (self.guard.task.remaining(), self.attempt_timeout) {
            (Some(remaining), Some(attempt_timeout)) => Some(remaining.min(attempt_timeout)),
            (remaining, attempt_timeout) => remaining.or(attempt_timeout),
        };

        self.client.metrics.record_attempt();
        publish(
            self.context.progress_listener(),
            ProgressEvent::HttpRequestStarted { attempt },
        );
        debug!(
            method = %self.guard.method,
            uri = %self.guard.uri,
            attempt,
            "sending http request"
        );

        let result = {
            let _registration = self.guard.task.register_current_attempt(abort.clone());
            let (headers, body) = self.request.split_body_mut();
            self.client.transport.send(TransportRequest {
                method: &self.guard.method,
                uri,
                headers,
                body,
                abort: &abort,
                timeout,
            })
        };
        let attempt_expired = attempt_task.has_expired();
        attempt_task.cancel();
        publish(
            self.context.progress_listener(),
            ProgressEvent::HttpRequestCompleted { attempt },
        );

        match result {
            Ok(response) => {
                let status = response.status();
                self.client.metrics.record_status(status.as_u16());
                publish(
                    self.context.progress_listener(),
                    ProgressEvent::HttpResponseReceived { status },
                );
                if let Some(content_length) = response.content_length() {
                    publish(
                        self.context.progress_listener(),
                        ProgressEvent::ResponseContentLength(content_length),
                    );
                }
                debug!(
                    method = %self.guard.method,
                    uri = %self.guard.uri,
                    attempt,
                    status = status.as_u16(),
                    "received http response"
                );
                Ok(response)
            }
            Err(source) => {
                if self.guard.task.has_expired() || self.guard.cancellation.is_cancelled() {
                    return Err(self.guard.interrupted());
                }
                if attempt_expired {
                    return Err(Error::AttemptTimeout {
                        timeout_ms: attempt_timeout.as_millis(),
                        method: self.guard.method.clone(),
                        uri: self.guard.uri.clone(),
                    });
                }
                Err(Error::Transport {
                    method: self.guard.method.clone(),
                    uri: self.guard.uri.clone(),
                    source,
                })
            }
        }
    }

    fn handle_success(
        &mut self,
        response: HttpResponse,
        state: &mut AttemptState,
    ) -> crate::Result<Response<T>> {
        let guard = &self.guard;
        let response =
            self.interceptors
                .before_unmarshalling(&*self.request, response, || guard.check())?;
        let metadata = response.metadata();
        self.last_response = Some(metadata.clone());

        state.leave_connection_open = self.response_handler.needs_connection_left_open();
        let response = state.response.insert(response);
        let value = self.response_handler.handle(response)?;

        let budget = &self.client.retry_budget;
        if self.context.retry_capacity_held() {
            budget.release_cost(self.client.config.retry_cost);
            self.context.set_retry_capacity_held(false);
        } else {
            budget.release();
        }
        Ok(Response::new(value, metadata, state.request_count))
    }

    /// Decodes a non-2xx response. A failing error handler becomes the attempt's error.
    fn handle_error_response(&mut self, response: HttpResponse, state: &mut AttemptState) -> Error {
        self.last_response = Some(response.metadata());
        state.leave_connection_open = self.error_handler.needs_connection_left_open();
        let response = state.response.insert(response);
        match self.error_handler.handle(response) {
            Ok(service_error) => Error::from(service_error),
            Err(error) => error,
        }
    }

    /// Returns the error when the call must stop; otherwise keeps it as the cause of the next retry.
    fn decide_retry(&mut self, error: Error, state: &mut AttemptState) -> crate::Result<()> {
        let decision = self.should_retry(&error, state);
        if !decision.retry {
            return Err(error);
        }
        if decision.kind == ErrorKind::ClockSkew {
            self.correct_clock_skew(&error);
        }
        state.retried_error = Some(error);
        Ok(())
    }

    fn should_retry(&mut self, error: &Error, state: &AttemptState) -> RetryDecision {
        let kind = error.kind();
        if kind.is_interruption() || kind == ErrorKind::BodyNotResettable {
            return RetryDecision::stop(kind);
        }

        let budget = &self.client.retry_budget;
        let cost = self.client.config.retry_cost;
        let mut capacity_acquired = false;
        if kind.consumes_retry_capacity() && !self.context.retry_capacity_held() {
            if !budget.acquire(cost) {
                self.client.metrics.record_retry_capacity_denied();
                debug!(
                    method = %self.guard.method,
                    uri = %self.guard.uri,
                    attempt = state.request_count,
                    available = budget.available_capacity().unwrap_or_default(),
                    "retry capacity exhausted; not retrying"
                );
                return RetryDecision::stop(kind);
            }
            self.context.set_retry_capacity_held(true);
            capacity_acquired = true;
        }

        let retries_attempted = state.request_count.saturating_sub(1);
        let policy_context = RetryPolicyContext::new(&*self.request, error, retries_attempted);
        if !self.retry_policy.should_retry(&policy_context) {
            if capacity_acquired {
                budget.release_cost(cost);
                self.context.set_retry_capacity_held(false);
            }
            return RetryDecision::stop(kind);
        }

        RetryDecision {
            retry: true,
            kind,
            capacity_acquired,
        }
    }

    fn correct_clock_skew(&mut self, error: &Error) {
        let Some(service_error) = error.service_error() else {
            return;
        };
        let Some(offset) = ClockSkewCorrector::try_offset_seconds(
            service_error.headers(),
            service_error.message(),
            SystemTime::now(),
        ) else {
            warn!(
                method = %self.guard.method,
                uri = %self.guard.uri,
                error_code = service_error.error_code().unwrap_or_default(),
                "clock skew reported without a usable server time; keeping current offset"
            );
            return;
        };

        ClockSkewCorrector::new(Arc::clone(&self.client.clock_offset)).apply(offset);
        self.context.set_time_offset(offset);
        self.request.set_time_offset(offset);
        self.client.metrics.record_clock_skew_correction();
        debug!(
            method = %self.guard.method,
            uri = %self.guard.uri,
            offset_seconds = offset,
            "corrected clock offset"
        );
    }

    /// Leaves the body rewound so the caller can send the same request again.
    fn rewind_body(&mut self) {
        let Some(body) = self.request.body_mut() else {
            return;
        };
        if body.bytes_transferred() == 0 {
            return;
        }
        if let Err(error) = body.reset_silently() {
            warn!(
                method = %self.guard.method,
                uri = %self.guard.uri,
                error = %error,
                "failed to rewind request body after the call"
            );
        }
    }
}
