//! Request, error, latency and resource-cost accounting.
//!
//! # Metrics
//! - `ledger_requests_total` (counter): node calls by endpoint, outcome
//! - `ledger_errors_total` (counter): failures by endpoint, kind
//! - `ledger_request_duration_seconds` (histogram): latency per endpoint
//! - `ledger_resource_cost` (histogram): gas or similar cost per operation
//! - `ledger_cache_entries` (gauge): entries per cache category
//! - `ledger_node_health` (gauge): 1=healthy, 0=unhealthy
//! - `ledger_monitor_outcomes_total` (counter): terminal monitor states
//! - `ledger_events_dispatched_total` (counter): live logs by event kind
//!
//! # Design Decisions
//! - `MetricsCollector` keeps its own counters so snapshots and health can
//!   be computed in-process; every recording is also mirrored to the
//!   `metrics` facade for the Prometheus exporter
//! - Counters live behind an `ArcSwap`, so `reset` is a single pointer swap
//!   and no counter can go negative

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::{system_clock, SharedClock};

/// Error rate (percent) below which the node counts as healthy.
pub const HEALTHY_ERROR_RATE: f64 = 10.0;
/// Error rate (percent) below which the node counts as degraded.
pub const WARNING_ERROR_RATE: f64 = 30.0;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_size(category: &'static str, entries: usize) {
    metrics::gauge!("ledger_cache_entries", "category" => category).set(entries as f64);
}

pub fn record_node_health(url: &str, healthy: bool) {
    metrics::gauge!("ledger_node_health", "url" => url.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_monitor_outcome(status: &'static str) {
    metrics::counter!("ledger_monitor_outcomes_total", "status" => status).increment(1);
}

pub fn record_event_dispatched(kind: &'static str) {
    metrics::counter!("ledger_events_dispatched_total", "kind" => kind).increment(1);
}

/// Coarse health derived from the error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_error_rate(percent: f64) -> Self {
        if percent < HEALTHY_ERROR_RATE {
            HealthStatus::Healthy
        } else if percent < WARNING_ERROR_RATE {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub error_rate_percent: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate_percent: f64,
    pub health_status: HealthStatus,
    pub endpoint_requests: BTreeMap<String, u64>,
    pub endpoint_errors: BTreeMap<String, u64>,
    /// Keyed `endpoint:kind`.
    pub error_kinds: BTreeMap<String, u64>,
    pub average_latency_ms: BTreeMap<String, f64>,
    pub average_resource_cost: BTreeMap<String, f64>,
    pub timestamp_millis: i64,
}

#[derive(Debug, Default)]
struct Mean {
    total: AtomicU64,
    samples: AtomicU64,
}

impl Mean {
    fn add(&self, value: u64) {
        self.total.fetch_add(value, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn value(&self) -> Option<f64> {
        let samples = self.samples.load(Ordering::Relaxed);
        (samples > 0).then(|| self.total.load(Ordering::Relaxed) as f64 / samples as f64)
    }
}

#[derive(Debug, Default)]
struct EndpointStats {
    requests: AtomicU64,
    errors: AtomicU64,
    latency: Mean,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    endpoints: DashMap<String, EndpointStats>,
    error_kinds: DashMap<String, AtomicU64>,
    costs: DashMap<String, Mean>,
}

impl Counters {
    fn endpoint<R>(&self, endpoint: &str, f: impl FnOnce(&EndpointStats) -> R) -> R {
        if let Some(stats) = self.endpoints.get(endpoint) {
            return f(stats.value());
        }
        let stats = self.endpoints.entry(endpoint.to_string()).or_default();
        f(stats.value())
    }
}

/// Thread-safe collector of node-call outcomes.
pub struct MetricsCollector {
    counters: ArcSwap<Counters>,
    clock: SharedClock,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            counters: ArcSwap::from_pointee(Counters::default()),
            clock,
        }
    }

    /// Count one call against `endpoint`. A failed call also counts as an error.
    pub fn record_request(&self, endpoint: &str, success: bool) {
        self.count_request(endpoint, success);
        if !success {
            self.count_error(endpoint);
        }
        tracing::trace!(endpoint, success, "Recorded request");
    }

    /// Count one error on `endpoint`, attributed to `kind`.
    ///
    /// Moves the totals as well as the per-kind breakdown, so a caller that
    /// records the request as successful and then reports the error still
    /// shows up in `health`.
    pub fn record_error(&self, endpoint: &str, kind: &str) {
        self.count_error(endpoint);
        let key = format!("{}:{}", endpoint, kind);
        self.counters
            .load()
            .error_kinds
            .entry(key)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);

        metrics::counter!(
            "ledger_errors_total",
            "endpoint" => endpoint.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
        tracing::trace!(endpoint, kind, "Recorded error");
    }

    /// One failed call: a request plus a single error of `kind`.
    pub fn record_failure(&self, endpoint: &str, kind: &str) {
        self.count_request(endpoint, false);
        self.record_error(endpoint, kind);
    }

    fn count_request(&self, endpoint: &str, success: bool) {
        let counters = self.counters.load();
        counters.total_requests.fetch_add(1, Ordering::Relaxed);
        counters.endpoint(endpoint, |stats| {
            stats.requests.fetch_add(1, Ordering::Relaxed);
        });

        let outcome = if success { "success" } else { "failure" };
        metrics::counter!(
            "ledger_requests_total",
            "endpoint" => endpoint.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    fn count_error(&self, endpoint: &str) {
        let counters = self.counters.load();
        counters.total_errors.fetch_add(1, Ordering::Relaxed);
        counters.endpoint(endpoint, |stats| {
            stats.errors.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_latency(&self, endpoint: &str, millis: u64) {
        self.counters
            .load()
            .endpoint(endpoint, |stats| stats.latency.add(millis));

        metrics::histogram!("ledger_request_duration_seconds", "endpoint" => endpoint.to_string())
            .record(millis as f64 / 1000.0);
    }

    pub fn record_resource_cost(&self, operation: &str, amount: u64) {
        let counters = self.counters.load();
        if let Some(mean) = counters.costs.get(operation) {
            mean.add(amount);
        } else {
            counters.costs.entry(operation.to_string()).or_default().add(amount);
        }

        metrics::histogram!("ledger_resource_cost", "operation" => operation.to_string())
            .record(amount as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.load();
        let total_requests = counters.total_requests.load(Ordering::Relaxed);
        let total_errors = counters.total_errors.load(Ordering::Relaxed);
        let error_rate_percent = error_rate(total_requests, total_errors);

        let mut endpoint_requests = BTreeMap::new();
        let mut endpoint_errors = BTreeMap::new();
        let mut average_latency_ms = BTreeMap::new();
        for entry in counters.endpoints.iter() {
            let stats = entry.value();
            endpoint_requests.insert(entry.key().clone(), stats.requests.load(Ordering::Relaxed));
            endpoint_errors.insert(entry.key().clone(), stats.errors.load(Ordering::Relaxed));
            if let Some(mean) = stats.latency.value() {
                average_latency_ms.insert(entry.key().clone(), mean);
            }
        }

        let error_kinds = counters
            .error_kinds
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        let average_resource_cost = counters
            .costs
            .iter()
            .filter_map(|e| e.value().value().map(|mean| (e.key().clone(), mean)))
            .collect();

        MetricsSnapshot {
            total_requests,
            total_errors,
            error_rate_percent,
            health_status: HealthStatus::from_error_rate(error_rate_percent),
            endpoint_requests,
            endpoint_errors,
            error_kinds,
            average_latency_ms,
            average_resource_cost,
            timestamp_millis: self.clock.now_millis(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let counters = self.counters.load();
        let total_requests = counters.total_requests.load(Ordering::Relaxed);
        let total_errors = counters.total_errors.load(Ordering::Relaxed);
        let error_rate_percent = error_rate(total_requests, total_errors);

        HealthReport {
            status: HealthStatus::from_error_rate(error_rate_percent),
            error_rate_percent,
            total_requests,
            total_errors,
            timestamp_millis: self.clock.now_millis(),
        }
    }

    /// Start every counter again from zero.
    pub fn reset(&self) {
        self.counters.store(Arc::new(Counters::default()));
        tracing::info!("Metrics reset");
    }
}

fn error_rate(requests: u64, errors: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        errors as f64 / requests as f64 * 100.0
    }
}
