use std::hint::black_box;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use http::{HeaderMap, Method, StatusCode};
use reqexec::prelude::*;
use reqexec::TransportRequest;
use serde_json::Value;

/// Answers from memory; every `fail_every`-th attempt gets a 503.
struct InMemoryTransport {
    body: Bytes,
    fail_every: usize,
    calls: AtomicUsize,
}

impl InMemoryTransport {
    fn new(body: Bytes, fail_every: usize) -> Self {
        Self {
            body,
            fail_every,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, request: TransportRequest<'_>) -> io::Result<HttpResponse> {
        if let Some(reader) = request.body {
            io::copy(reader, &mut io::sink())?;
        }
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let status = if self.fail_every > 0 && call % self.fail_every == 0 {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        };
        Ok(HttpResponse::from_bytes(
            status,
            HeaderMap::new(),
            self.body.clone(),
        ))
    }
}

fn build_client(fail_every: usize) -> Client {
    Client::builder()
        .transport(InMemoryTransport::new(
            Bytes::from_static(br#"{"id":"bench","items":[1,2,3,4,5,6,7,8]}"#),
            fail_every,
        ))
        .unbounded_retry_capacity()
        .try_build()
        .expect("build benchmark client")
}

fn policy() -> StandardRetryPolicy {
    StandardRetryPolicy::standard()
        .max_retries(3)
        .base_backoff(Duration::ZERO)
        .throttled_base_backoff(Duration::ZERO)
        .jitter_ratio(0.0)
}

fn bench_execute(criterion: &mut Criterion) {
    let handler = JsonResponseHandler::<Value>::new();
    let error_handler = StandardErrorHandler::new();
    let policy = policy();

    let mut group = criterion.benchmark_group("execute");
    for payload_size in [0_usize, 1024, 64 * 1024] {
        let client = build_client(0);
        let payload = Bytes::from(vec![b'x'; payload_size]);
        group.throughput(Throughput::Bytes(payload_size as u64));
        group.bench_with_input(
            BenchmarkId::new("success", payload_size),
            &payload,
            |bench, payload| {
                bench.iter(|| {
                    let mut request = Request::new(Method::PUT, "https://bench.example.com")
                        .with_resource_path("/objects/1")
                        .with_body(ReplayableBody::from_bytes(payload.clone()));
                    let mut context = ExecutionContext::new();
                    let response = client
                        .execute(&mut request, &mut context, &handler, &error_handler, &policy)
                        .expect("benchmark call should succeed");
                    black_box(response.attempts())
                });
            },
        );
    }

    let client = build_client(2);
    group.throughput(Throughput::Elements(1));
    group.bench_function("retry_after_unavailable", |bench| {
        bench.iter(|| {
            let mut request = Request::new(Method::POST, "https://bench.example.com")
                .with_resource_path("/objects")
                .with_body(ReplayableBody::from_bytes(r#"{"name":"bench"}"#));
            let mut context = ExecutionContext::new();
            let response = client
                .execute(&mut request, &mut context, &handler, &error_handler, &policy)
                .expect("benchmark call should recover");
            black_box(response.attempts())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_execute);
criterion_main!(benches);
