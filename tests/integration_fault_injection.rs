use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};
use reqexec::prelude::*;
use reqexec::{FaultInjection, TransportRequest};
use serde_json::Value;

#[derive(Debug)]
enum Outcome {
    Received(Vec<u8>),
    ReadFailed(String),
}

/// Drains the request body like a socket writer would and answers from a queue of statuses.
#[derive(Default)]
struct RecordingTransport {
    statuses: Mutex<VecDeque<StatusCode>>,
    outcomes: Mutex<Vec<Outcome>>,
}

impl RecordingTransport {
    fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            outcomes: Mutex::new(Vec::new()),
        })
    }

    fn outcomes(&self) -> Vec<String> {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .iter()
            .map(|outcome| match outcome {
                Outcome::Received(body) => String::from_utf8_lossy(body).into_owned(),
                Outcome::ReadFailed(message) => format!("failed: {message}"),
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: TransportRequest<'_>) -> io::Result<HttpResponse> {
        let mut body = Vec::new();
        if let Some(reader) = request.body
            && let Err(error) = reader.read_to_end(&mut body)
        {
            self.outcomes
                .lock()
                .expect("outcomes lock")
                .push(Outcome::ReadFailed(error.to_string()));
            return Err(error);
        }
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .push(Outcome::Received(body));

        let status = self
            .statuses
            .lock()
            .expect("statuses lock")
            .pop_front()
            .unwrap_or(StatusCode::OK);
        Ok(HttpResponse::from_bytes(
            status,
            HeaderMap::new(),
            r#"{"ok":true}"#,
        ))
    }
}

fn client(transport: &Arc<RecordingTransport>) -> Client {
    let transport: Arc<dyn Transport> = transport.clone();
    Client::builder()
        .transport_arc(transport)
        .try_build()
        .expect("client should build")
}

fn fast_policy(max_retries: usize) -> StandardRetryPolicy {
    StandardRetryPolicy::standard()
        .max_retries(max_retries)
        .base_backoff(Duration::ZERO)
        .throttled_base_backoff(Duration::ZERO)
        .jitter_ratio(0.0)
}

fn execute(
    client: &Client,
    request: &mut Request,
    policy: &dyn RetryPolicy,
) -> reqexec::Result<Response<Value>> {
    let mut context = ExecutionContext::new();
    client.execute(
        request,
        &mut context,
        &JsonResponseHandler::<Value>::new(),
        &StandardErrorHandler::new(),
        policy,
    )
}

#[test]
fn injected_read_failure_is_retried_with_identical_body() {
    let transport = RecordingTransport::new([]);
    let client = client(&transport);
    let mut request = Request::new(Method::PUT, "https://storage.example.com")
        .with_resource_path("/bucket/object")
        .with_body(
            ReplayableBody::from_bytes("0123456789abcdef")
                .with_fault_injection(FaultInjection::after_bytes(4)),
        );

    let response =
        execute(&client, &mut request, &fast_policy(2)).expect("retry should replay the body");

    assert_eq!(response.attempts(), 2);
    let outcomes = transport.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].starts_with("failed: injected io error 1"));
    assert_eq!(outcomes[1], "0123456789abcdef");
    assert_eq!(client.retry_budget().available_capacity(), Some(500));
}

#[test]
fn persistent_read_failure_surfaces_as_transport_error() {
    let transport = RecordingTransport::new([]);
    let client = client(&transport);
    let mut request = Request::new(Method::POST, "https://storage.example.com")
        .with_resource_path("/upload")
        .with_body(
            ReplayableBody::from_bytes("payload-bytes")
                .with_fault_injection(FaultInjection::after_bytes(0).max_errors(usize::MAX)),
        );

    let error = execute(&client, &mut request, &fast_policy(2))
        .expect_err("every attempt should fail to read the body");

    assert_eq!(error.kind(), ErrorKind::TransportIo);
    match error {
        Error::Transport { source, .. } => {
            assert!(source.to_string().starts_with("injected io error 3"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.outcomes().len(), 3);
    assert_eq!(client.retry_budget().available_capacity(), Some(495));
}

#[test]
fn reset_interval_limits_faults_to_selected_passes() {
    let transport = RecordingTransport::new([StatusCode::SERVICE_UNAVAILABLE]);
    let client = client(&transport);
    let mut request = Request::new(Method::PUT, "https://storage.example.com")
        .with_resource_path("/bucket/object")
        .with_body(
            ReplayableBody::from_bytes("stable body")
                .with_fault_injection(FaultInjection::after_bytes(2).reset_interval(2)),
        );

    let response = execute(&client, &mut request, &fast_policy(3))
        .expect("third pass over the body should succeed");

    assert_eq!(response.attempts(), 3);
    let outcomes = transport.outcomes();
    assert_eq!(outcomes[0], "stable body");
    assert!(outcomes[1].starts_with("failed: injected io error 1"));
    assert_eq!(outcomes[2], "stable body");
}
