//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, route template, status class
//! - `http_request_duration_seconds` (histogram): latency by method, route template
//! - `domain_operations_total` (counter): business operations by operation, outcome
//! - `downstream_calls_total` (counter): outbound hops by service, outcome
//! - `notifications_sent_total` (counter): deliveries by kind, status
//! - `spans_dropped_total` (counter): spans lost to a full export queue
//! - `span_exports_total` (counter): export batches by outcome
//!
//! # Design Decisions
//! - The recorder is owned by [`MetricsRegistry`] rather than installed
//!   globally, so several services (or tests) can share one process
//! - Every label value is a `&'static str` from [`crate::observability::labels`]
//! - Updates are atomic; rendering takes a snapshot and never blocks writers

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::sync::Arc;
use std::time::Instant;

use crate::observability::labels::{
    CallOutcome, DeliveryStatus, Downstream, ExportOutcome, HttpMethod, NotificationKind,
    Operation, Outcome, Route, StatusClass,
};

/// Metric names.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
    pub const DOMAIN_OPERATIONS_TOTAL: &str = "domain_operations_total";
    pub const DOWNSTREAM_CALLS_TOTAL: &str = "downstream_calls_total";
    pub const NOTIFICATIONS_SENT_TOTAL: &str = "notifications_sent_total";
    pub const SPANS_DROPPED_TOTAL: &str = "spans_dropped_total";
    pub const SPAN_EXPORTS_TOTAL: &str = "span_exports_total";
}

/// Prometheus client default buckets, in seconds.
const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Cloneable handle to the process metric registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(names::HTTP_REQUEST_DURATION.to_string()),
                &DEFAULT_BUCKETS,
            )?
            .build_recorder();
        let handle = recorder.handle();
        let registry = Self {
            recorder: Arc::new(recorder),
            handle,
        };
        registry.describe();
        Ok(registry)
    }

    fn describe(&self) {
        self.with_recorder(|| {
            metrics::describe_counter!(names::HTTP_REQUESTS_TOTAL, "Total number of HTTP requests");
            metrics::describe_histogram!(
                names::HTTP_REQUEST_DURATION,
                metrics::Unit::Seconds,
                "HTTP request latency"
            );
            metrics::describe_counter!(
                names::DOMAIN_OPERATIONS_TOTAL,
                "Business operations by outcome"
            );
            metrics::describe_counter!(names::DOWNSTREAM_CALLS_TOTAL, "Outbound hops by outcome");
            metrics::describe_counter!(
                names::NOTIFICATIONS_SENT_TOTAL,
                "Notification deliveries by kind and status"
            );
            metrics::describe_counter!(
                names::SPANS_DROPPED_TOTAL,
                "Closed spans dropped because the export queue was full"
            );
            metrics::describe_counter!(names::SPAN_EXPORTS_TOTAL, "Span export batches by outcome");
        });
    }

    fn with_recorder<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(self.recorder.as_ref(), f)
    }

    /// Record one completed inbound request.
    pub fn record_request(
        &self,
        method: HttpMethod,
        route: Route,
        status: StatusClass,
        start: Instant,
    ) {
        let elapsed = start.elapsed().as_secs_f64();
        self.with_recorder(|| {
            counter!(
                names::HTTP_REQUESTS_TOTAL,
                "method" => method.as_str(),
                "route" => route.as_str(),
                "status_class" => status.as_str()
            )
            .increment(1);
            histogram!(
                names::HTTP_REQUEST_DURATION,
                "method" => method.as_str(),
                "route" => route.as_str()
            )
            .record(elapsed);
        });
    }

    pub fn record_operation(&self, operation: Operation, outcome: Outcome) {
        self.with_recorder(|| {
            counter!(
                names::DOMAIN_OPERATIONS_TOTAL,
                "operation" => operation.as_str(),
                "outcome" => outcome.as_str()
            )
            .increment(1);
        });
    }

    pub fn record_downstream_call(&self, service: Downstream, outcome: CallOutcome) {
        self.with_recorder(|| {
            counter!(
                names::DOWNSTREAM_CALLS_TOTAL,
                "service" => service.as_str(),
                "outcome" => outcome.as_str()
            )
            .increment(1);
        });
    }

    pub fn record_notification(&self, kind: NotificationKind, status: DeliveryStatus) {
        self.with_recorder(|| {
            counter!(
                names::NOTIFICATIONS_SENT_TOTAL,
                "kind" => kind.as_str(),
                "status" => status.as_str()
            )
            .increment(1);
        });
    }

    pub fn record_span_dropped(&self) {
        self.with_recorder(|| counter!(names::SPANS_DROPPED_TOTAL).increment(1));
    }

    pub fn record_export(&self, outcome: ExportOutcome) {
        self.with_recorder(|| {
            counter!(names::SPAN_EXPORTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
        });
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
