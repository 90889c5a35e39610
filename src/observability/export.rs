//! Span export pipeline.
//!
//! # Data Flow
//! ```text
//! Span::end()
//!     → ExportQueue::enqueue (non-blocking, drops newest when full)
//!     → BatchProcessor (background task: flush by size, by interval, on shutdown)
//!     → SpanExporter::export (HttpExporter posts OTLP JSON to <endpoint>/v1/traces)
//! ```
//!
//! # Design Decisions
//! - Export is best effort and never touches the request path
//! - Failed batches are retried with jittered backoff, then dropped with a warning
//! - The exporter is a trait so tests and embedders can collect spans in memory

use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};

use crate::config::ExporterConfig;
use crate::observability::labels::ExportOutcome;
use crate::observability::metrics::MetricsRegistry;
use crate::observability::span::{AttributeValue, SpanData, SpanStatus};
use crate::observability::ServiceIdentity;
use crate::resilience::backoff::RetryPolicy;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to build exporter client: {0}")]
    Client(String),

    #[error("collector unreachable: {0}")]
    Transport(String),

    #[error("collector rejected batch with status {0}")]
    Status(u16),
}

/// Destination for batches of closed spans.
pub trait SpanExporter: Send + Sync + 'static {
    fn export(&self, batch: &[SpanData]) -> impl Future<Output = Result<(), ExportError>> + Send;
}

/// Producer side of the bounded export buffer.
#[derive(Clone)]
pub struct ExportQueue {
    tx: Option<mpsc::Sender<SpanData>>,
    metrics: Option<MetricsRegistry>,
    dropped: Arc<AtomicU64>,
}

impl ExportQueue {
    /// Bounded queue plus the receiver a [`BatchProcessor`] drains.
    pub fn bounded(capacity: usize, metrics: MetricsRegistry) -> (Self, mpsc::Receiver<SpanData>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx: Some(tx),
            metrics: Some(metrics),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (queue, rx)
    }

    /// Queue that discards everything, for when export is turned off.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            metrics: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand a closed span to the exporter without ever waiting.
    pub fn enqueue(&self, span: SpanData) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(span) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(span)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_span_dropped();
                }
                tracing::debug!(span = %span.name, "Export queue full, dropping span");
            }
            Err(mpsc::error::TrySendError::Closed(span)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_span_dropped();
                }
                tracing::warn!(span = %span.name, "Batch processor stopped, dropping span");
            }
        }
    }

    /// Spans lost since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Background task moving spans from the queue to an exporter.
pub struct BatchProcessor<E> {
    rx: mpsc::Receiver<SpanData>,
    exporter: E,
    batch_size: usize,
    flush_interval: Duration,
    retry: RetryPolicy,
    metrics: MetricsRegistry,
}

impl<E: SpanExporter> BatchProcessor<E> {
    pub fn new(
        rx: mpsc::Receiver<SpanData>,
        exporter: E,
        config: &ExporterConfig,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            rx,
            exporter,
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            retry: RetryPolicy::from(config),
            metrics,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            batch_size = self.batch_size,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Span batch processor starting"
        );

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(span) => {
                        batch.push(span);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Span batch processor received shutdown signal, draining");
                    break;
                }
            }
        }

        while let Ok(span) = self.rx.try_recv() {
            batch.push(span);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
        tracing::info!("Span batch processor stopped");
    }

    async fn flush(&self, batch: &mut Vec<SpanData>) {
        let spans = std::mem::take(batch);
        let mut attempt = 1;
        loop {
            match self.exporter.export(&spans).await {
                Ok(()) => {
                    self.metrics.record_export(ExportOutcome::Success);
                    tracing::debug!(spans = spans.len(), "Exported span batch");
                    return;
                }
                Err(e) => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        tracing::debug!(attempt, delay = ?delay, error = %e, "Retrying span export");
                        time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        self.metrics.record_export(ExportOutcome::Failed);
                        tracing::warn!(
                            spans = spans.len(),
                            attempts = attempt,
                            error = %e,
                            "Dropping span batch after export failure"
                        );
                        return;
                    }
                },
            }
        }
    }
}

/// Posts OTLP-shaped JSON to a collector's HTTP endpoint.
pub struct HttpExporter {
    client: reqwest::Client,
    url: String,
    resource: Value,
}

impl HttpExporter {
    pub fn new(config: &ExporterConfig, identity: &ServiceIdentity) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/v1/traces", config.endpoint.trim_end_matches('/')),
            resource: json!({
                "attributes": [
                    key_value("service.name", &AttributeValue::from(identity.name.as_str())),
                    key_value("service.version", &AttributeValue::from(identity.version.as_str())),
                    key_value("environment", &AttributeValue::from(identity.environment.as_str())),
                ]
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(&self, batch: &[SpanData]) -> Value {
        json!({
            "resourceSpans": [{
                "resource": self.resource,
                "scopeSpans": [{
                    "scope": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
                    "spans": batch.iter().map(span_json).collect::<Vec<_>>(),
                }]
            }]
        })
    }
}

impl SpanExporter for HttpExporter {
    async fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(batch))
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

fn span_json(span: &SpanData) -> Value {
    let (code, message) = match &span.status {
        SpanStatus::Unset => (0, ""),
        SpanStatus::Ok => (1, ""),
        SpanStatus::Error(message) => (2, message.as_str()),
    };
    json!({
        "traceId": span.trace_id,
        "spanId": span.span_id,
        "parentSpanId": span.parent_span_id.map(|id| id.to_string()).unwrap_or_default(),
        "name": span.name,
        "kind": span.kind.otlp_code(),
        "startTimeUnixNano": unix_nanos(span.start_time),
        "endTimeUnixNano": span.end_time.map(unix_nanos).unwrap_or_default(),
        "attributes": span.attributes.iter().map(|(k, v)| key_value(k, v)).collect::<Vec<_>>(),
        "status": { "code": code, "message": message },
    })
}

fn key_value(key: &str, value: &AttributeValue) -> Value {
    let value = match value {
        AttributeValue::String(s) => json!({ "stringValue": s }),
        AttributeValue::Int(i) => json!({ "intValue": i.to_string() }),
        AttributeValue::Float(f) => json!({ "doubleValue": f }),
        AttributeValue::Bool(b) => json!({ "boolValue": b }),
    };
    json!({ "key": key, "value": value })
}

fn unix_nanos(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .to_string()
}

/// Keeps every exported batch in memory.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    batches: Arc<Mutex<Vec<Vec<SpanData>>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<SpanData>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.batches().into_iter().flatten().collect()
    }
}

impl SpanExporter for InMemoryExporter {
    async fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::span::{SpanKind, Tracer};
    use std::sync::atomic::AtomicU32;

    fn exporter_config(batch_size: usize, flush_interval_ms: u64) -> ExporterConfig {
        ExporterConfig {
            batch_size,
            flush_interval_ms,
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..ExporterConfig::default()
        }
    }

    fn finished_spans(tracer: &Tracer, count: usize) {
        for i in 0..count {
            let span = tracer.start(format!("span-{}", i), None);
            span.end(SpanStatus::Ok).unwrap();
        }
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let metrics = MetricsRegistry::new().unwrap();
        let (queue, mut rx) = ExportQueue::bounded(2, metrics.clone());
        let tracer = Tracer::new("svc", queue.clone());

        finished_spans(&tracer, 5);

        assert_eq!(queue.dropped(), 3);
        assert_eq!(rx.try_recv().unwrap().name, "span-0");
        assert_eq!(rx.try_recv().unwrap().name, "span-1");
        assert!(rx.try_recv().is_err());
        assert!(metrics.render().contains("spans_dropped_total 3"));
    }

    #[test]
    fn test_closed_queue_counts_drops() {
        let metrics = MetricsRegistry::new().unwrap();
        let (queue, rx) = ExportQueue::bounded(8, metrics.clone());
        let tracer = Tracer::new("svc", queue.clone());
        drop(rx);

        finished_spans(&tracer, 2);

        assert_eq!(queue.dropped(), 2);
        assert!(metrics.render().contains("spans_dropped_total 2"));
    }

    #[test]
    fn test_disabled_queue_discards() {
        let queue = ExportQueue::disabled();
        let tracer = Tracer::new("svc", queue.clone());
        finished_spans(&tracer, 3);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_flush_by_size() {
        let metrics = MetricsRegistry::new().unwrap();
        let (queue, rx) = ExportQueue::bounded(64, metrics.clone());
        let tracer = Tracer::new("svc", queue);
        let exporter = InMemoryExporter::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let processor =
            BatchProcessor::new(rx, exporter.clone(), &exporter_config(4, 60_000), metrics);
        let handle = tokio::spawn(processor.run(shutdown_rx));

        finished_spans(&tracer, 8);
        for _ in 0..50 {
            if exporter.batches().len() == 2 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exporter.batches().len(), 2);
        assert!(exporter.batches().iter().all(|b| b.len() == 4));

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_by_interval() {
        let metrics = MetricsRegistry::new().unwrap();
        let (queue, rx) = ExportQueue::bounded(64, metrics.clone());
        let tracer = Tracer::new("svc", queue);
        let exporter = InMemoryExporter::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let processor =
            BatchProcessor::new(rx, exporter.clone(), &exporter_config(100, 20), metrics);
        let handle = tokio::spawn(processor.run(shutdown_rx));

        finished_spans(&tracer, 3);
        for _ in 0..50 {
            if !exporter.spans().is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exporter.spans().len(), 3);

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let metrics = MetricsRegistry::new().unwrap();
        let (queue, rx) = ExportQueue::bounded(64, metrics.clone());
        let tracer = Tracer::new("svc", queue);
        let exporter = InMemoryExporter::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        finished_spans(&tracer, 5);
        let _ = shutdown_tx.send(());

        BatchProcessor::new(rx, exporter.clone(), &exporter_config(100, 60_000), metrics)
            .run(shutdown_rx)
            .await;

        assert_eq!(exporter.spans().len(), 5);
    }

    struct FlakyExporter {
        failures_left: AtomicU32,
        inner: InMemoryExporter,
    }

    impl SpanExporter for FlakyExporter {
        async fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ExportError::Status(503));
            }
            self.inner.export(batch).await
        }
    }

    #[tokio::test]
    async fn test_export_retries_then_gives_up() {
        let metrics = MetricsRegistry::new().unwrap();

        for (failures, expected_spans, outcome) in
            [(2, 1, "success"), (5, 0, "failed")]
        {
            let (queue, rx) = ExportQueue::bounded(8, metrics.clone());
            let tracer = Tracer::new("svc", queue);
            let inner = InMemoryExporter::new();
            let exporter = FlakyExporter {
                failures_left: AtomicU32::new(failures),
                inner: inner.clone(),
            };
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

            finished_spans(&tracer, 1);
            let _ = shutdown_tx.send(());
            BatchProcessor::new(rx, exporter, &exporter_config(10, 60_000), metrics.clone())
                .run(shutdown_rx)
                .await;

            assert_eq!(inner.spans().len(), expected_spans);
            assert!(metrics
                .render()
                .contains(&format!(r#"span_exports_total{{outcome="{}"}} 1"#, outcome)));
        }
    }

    #[test]
    fn test_otlp_payload_shape() {
        let identity = ServiceIdentity::new("api-gateway", "1.0.0", "test");
        let exporter = HttpExporter::new(
            &ExporterConfig {
                endpoint: "http://collector:4318/".to_string(),
                ..ExporterConfig::default()
            },
            &identity,
        )
        .unwrap();
        assert_eq!(exporter.url(), "http://collector:4318/v1/traces");

        let metrics = MetricsRegistry::new().unwrap();
        let (queue, mut rx) = ExportQueue::bounded(8, metrics);
        let tracer = Tracer::new("api-gateway", queue);
        let root = tracer.start("GET /health", None);
        let child = tracer
            .span_builder("user-check")
            .parent(Some(&root.context()))
            .attribute("hop.required", true)
            .start();
        child.end(SpanStatus::error("connection refused")).unwrap();

        let payload = exporter.payload(&[rx.try_recv().unwrap()]);
        let span = &payload["resourceSpans"][0]["scopeSpans"][0]["spans"][0];
        assert_eq!(span["traceId"], root.context().trace_id().to_string());
        assert_eq!(span["parentSpanId"], root.context().span_id().to_string());
        assert_eq!(span["status"]["code"], 2);
        assert_eq!(span["status"]["message"], "connection refused");
        assert_eq!(span["attributes"][0]["key"], "hop.required");
        assert_eq!(span["kind"], 1);
        assert_eq!(
            payload["resourceSpans"][0]["resource"]["attributes"][0]["value"]["stringValue"],
            "api-gateway"
        );
    }

    #[test]
    fn test_joined_root_exports_as_server() {
        let identity = ServiceIdentity::new("user-service", "1.0.0", "test");
        let exporter = HttpExporter::new(&ExporterConfig::default(), &identity).unwrap();
        let metrics = MetricsRegistry::new().unwrap();
        let (queue, mut rx) = ExportQueue::bounded(8, metrics);
        let tracer = Tracer::new("user-service", queue);

        let remote = crate::observability::propagation::decode(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .unwrap();
        let root = tracer
            .span_builder("GET /users/{id}")
            .kind(SpanKind::Server)
            .parent(Some(&remote))
            .start();
        let hop = tracer
            .span_builder("user-validation")
            .kind(SpanKind::Client)
            .parent(Some(&root.context()))
            .start();
        hop.end(SpanStatus::Ok).unwrap();
        root.end(SpanStatus::Ok).unwrap();

        let batch = [rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        let payload = exporter.payload(&batch);
        let spans = &payload["resourceSpans"][0]["scopeSpans"][0]["spans"];
        assert_eq!(spans[0]["name"], "user-validation");
        assert_eq!(spans[0]["kind"], 3);
        assert_eq!(spans[1]["name"], "GET /users/{id}");
        assert_eq!(spans[1]["parentSpanId"], "00f067aa0ba902b7");
        assert_eq!(spans[1]["kind"], 2);
    }
}
