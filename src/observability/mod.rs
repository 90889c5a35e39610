//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → propagation.rs (read traceparent, or start a new trace)
//!     → span.rs (root span, child spans per hop and sub-operation)
//!     → logging.rs (LogScope: trace id on every record)
//!     → metrics.rs (request, operation and hop counters)
//!
//! Closed spans:
//!     → export.rs (bounded queue → batch processor → collector)
//! ```
//!
//! # Design Decisions
//! - Process-wide state lives in one [`Telemetry`] bundle created at startup
//!   and passed by handle into router state; nothing is a global except the
//!   base logger
//! - Label values are closed enums (labels.rs), never request data

pub mod context;
pub mod export;
pub mod labels;
pub mod logging;
pub mod metrics;
pub mod propagation;
pub mod span;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{MeshConfig, ServiceConfig};
use export::{BatchProcessor, ExportError, ExportQueue, HttpExporter};
use metrics::MetricsRegistry;
use span::{SpanData, Tracer};

/// Name, version and environment of the running service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub environment: String,
}

impl ServiceIdentity {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            environment: environment.into(),
        }
    }
}

impl From<&ServiceConfig> for ServiceIdentity {
    fn from(config: &ServiceConfig) -> Self {
        Self::new(config.name(), &config.version, &config.environment)
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Exporter(#[from] ExportError),
}

/// Tracer, metric registry and identity of one service.
#[derive(Clone)]
pub struct Telemetry {
    identity: Arc<ServiceIdentity>,
    tracer: Tracer,
    metrics: MetricsRegistry,
}

impl Telemetry {
    pub fn new(identity: ServiceIdentity, tracer: Tracer, metrics: MetricsRegistry) -> Self {
        Self {
            identity: Arc::new(identity),
            tracer,
            metrics,
        }
    }

    /// Build the service's telemetry from config.
    ///
    /// Returns the batch processor to spawn when export is enabled.
    pub fn init(
        config: &MeshConfig,
    ) -> Result<(Self, Option<BatchProcessor<HttpExporter>>), TelemetryError> {
        let identity = ServiceIdentity::from(&config.service);
        let metrics = MetricsRegistry::new()?;

        if !config.exporter.enabled {
            let tracer = Tracer::new(identity.name.as_str(), ExportQueue::disabled());
            return Ok((Self::new(identity, tracer, metrics), None));
        }

        let (queue, rx) = ExportQueue::bounded(config.exporter.queue_capacity, metrics.clone());
        let exporter = HttpExporter::new(&config.exporter, &identity)?;
        let processor = BatchProcessor::new(rx, exporter, &config.exporter, metrics.clone());
        let tracer = Tracer::new(identity.name.as_str(), queue);

        Ok((Self::new(identity, tracer, metrics), Some(processor)))
    }

    /// Telemetry whose closed spans land on the returned receiver.
    pub fn in_memory(
        identity: ServiceIdentity,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<SpanData>), TelemetryError> {
        let metrics = MetricsRegistry::new()?;
        let (queue, rx) = ExportQueue::bounded(capacity, metrics.clone());
        let tracer = Tracer::new(identity.name.as_str(), queue);
        Ok((Self::new(identity, tracer, metrics), rx))
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }
}
