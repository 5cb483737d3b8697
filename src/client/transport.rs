use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

use ureq::Agent;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::transport::{HttpResponse, Transport, TransportRequest};

/// [`Transport`] backed by a blocking `ureq` agent.
///
/// The attempt's remaining time is applied as ureq's global timeout, which is how an expired
/// deadline ends a blocked send. Non-2xx statuses are returned as responses, not errors.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_USER_AGENT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Uses a caller-configured agent. It must not turn http statuses into errors.
    pub fn from_agent(agent: Agent) -> Self {
        Self { agent }
    }

    pub(crate) fn with_settings(user_agent: &str, connect_timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(user_agent)
            .timeout_connect(Some(connect_timeout))
            .build();
        Self {
            agent: config.new_agent(),
        }
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        request: ureq::http::Request<S>,
        timeout: Option<Duration>,
    ) -> io::Result<HttpResponse> {
        let configured_request = self
            .agent
            .configure_request(request)
            .timeout_global(timeout)
            .build();
        let response = self
            .agent
            .run(configured_request)
            .map_err(into_io_error)?;
        let (parts, body) = response.into_parts();
        Ok(HttpResponse::new(
            parts.status,
            parts.headers,
            body.into_reader(),
        ))
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: TransportRequest<'_>) -> io::Result<HttpResponse> {
        if request.abort.is_aborted() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "attempt aborted before send",
            ));
        }

        let mut builder = ureq::http::Request::builder()
            .method(request.method.clone())
            .uri(request.uri.clone());
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        match request.body {
            Some(body) => {
                let reader: &mut dyn Read = body;
                let http_request = builder
                    .body(ureq::SendBody::from_reader(reader))
                    .map_err(io::Error::other)?;
                self.run(http_request, request.timeout)
            }
            None => {
                let http_request = builder.body(()).map_err(io::Error::other)?;
                self.run(http_request, request.timeout)
            }
        }
    }
}

fn into_io_error(error: ureq::Error) -> io::Error {
    match error {
        ureq::Error::Io(source) => source,
        ureq::Error::Timeout(timeout) => {
            io::Error::new(io::ErrorKind::TimedOut, format!("timed out: {timeout}"))
        }
        other => io::Error::other(other),
    }
}
