use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientMetricsSnapshot {
    pub calls_started: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub retry_capacity_denied: u64,
    pub deadline_exceeded: u64,
    pub cancelled: u64,
    pub body_not_resettable: u64,
    pub clock_skew_corrections: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Option<Arc<ClientMetricsInner>>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    retry_capacity_denied: AtomicU64,
    deadline_exceeded: AtomicU64,
    cancelled: AtomicU64,
    body_not_resettable: AtomicU64,
    clock_skew_corrections: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    inner: Option<Arc<ClientMetricsInner>>,
}

impl ClientMetrics {
    pub(crate) fn enabled() -> Self {
        Self {
            inner: Some(Arc::new(ClientMetricsInner::default())),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn enter_call(&self) -> InFlightGuard {
        match &self.inner {
            Some(inner) => {
                inner.calls_started.fetch_add(1, Ordering::Relaxed);
                inner.in_flight.fetch_add(1, Ordering::Relaxed);
                InFlightGuard {
                    inner: Some(Arc::clone(inner)),
                }
            }
            None => InFlightGuard { inner: None },
        }
    }

    pub(crate) fn record_attempt(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_capacity_denied(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.retry_capacity_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_clock_skew_correction(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.clock_skew_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_status(&self, status: u16) {
        self.add_status_count(status);
    }

    pub(crate) fn record_call_completed<T>(&self, result: &Result<T, Error>, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        self.record_latency(latency);

        let error = match result {
            Ok(_) => {
                inner.calls_succeeded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(error) => error,
        };

        inner.calls_failed.fetch_add(1, Ordering::Relaxed);
        match error {
            Error::DeadlineExceeded { .. } => {
                inner.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
            }
            Error::Cancelled { .. } => {
                inner.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Error::BodyNotResettable { .. } => {
                inner.body_not_resettable.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        let key = match error.service_error().and_then(|service| service.error_code()) {
            Some(service_code) => format!("{}:{service_code}", error.code().as_str()),
            None => error.code().as_str().to_owned(),
        };
        self.add_error_count(key);
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let Some(inner) = &self.inner else {
            return ClientMetricsSnapshot::default();
        };

        let latency_samples = inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ClientMetricsSnapshot {
            calls_started: inner.calls_started.load(Ordering::Relaxed),
            calls_succeeded: inner.calls_succeeded.load(Ordering::Relaxed),
            calls_failed: inner.calls_failed.load(Ordering::Relaxed),
            attempts: inner.attempts.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            retry_capacity_denied: inner.retry_capacity_denied.load(Ordering::Relaxed),
            deadline_exceeded: inner.deadline_exceeded.load(Ordering::Relaxed),
            cancelled: inner.cancelled.load(Ordering::Relaxed),
            body_not_resettable: inner.body_not_resettable.load(Ordering::Relaxed),
            clock_skew_corrections: inner.clock_skew_corrections.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut status_counts = lock_unpoisoned(&inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: String) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut error_counts = lock_unpoisoned(&inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
