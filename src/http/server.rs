//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the role's Axum router
//! - Wrap it in the interceptor stack
//! - Bind to a listener and serve until shutdown
//! - Stop the span batch processor only once in-flight requests are done

use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::MeshConfig;
use crate::http::middleware;
use crate::lifecycle::Shutdown;
use crate::observability::export::{BatchProcessor, SpanExporter};
use crate::observability::Telemetry;
use crate::services;

/// HTTP server for one service of the mesh.
pub struct MeshServer {
    router: Router,
    service: String,
}

impl MeshServer {
    /// Create a server for the role named in `config`.
    pub fn new(config: &MeshConfig, telemetry: &Telemetry) -> Self {
        let router = Self::build_router(config, telemetry);
        Self {
            router,
            service: telemetry.identity().name.clone(),
        }
    }

    fn build_router(config: &MeshConfig, telemetry: &Telemetry) -> Router {
        let routes = services::router(config, telemetry);
        middleware::apply(
            routes,
            telemetry.clone(),
            Duration::from_secs(config.timeouts.request_secs),
        )
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until a shutdown signal arrives.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.service,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve until `shutdown` fires, then flush the span exporter.
    ///
    /// The processor gets its own shutdown signal, sent after the server has
    /// drained, so spans closed by in-flight requests are still exported.
    pub async fn run_with_exporter<E: SpanExporter>(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
        processor: Option<BatchProcessor<E>>,
    ) -> Result<(), std::io::Error> {
        let export_shutdown = Shutdown::new();
        let exporter_task =
            processor.map(|processor| tokio::spawn(processor.run(export_shutdown.subscribe())));

        let served = self.run(listener, shutdown).await;

        export_shutdown.trigger();
        if let Some(task) = exporter_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Span exporter task failed");
            }
        }
        served
    }
}
