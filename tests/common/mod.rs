//! Shared utilities for the mesh integration tests.
#![allow(dead_code)]

use axum::{
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use serde_json::Value;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;

use mesh_telemetry::config::{MeshConfig, ServiceRole};
use mesh_telemetry::observability::logging::record_layer;
use mesh_telemetry::observability::span::SpanData;
use mesh_telemetry::observability::{ServiceIdentity, Telemetry};
use mesh_telemetry::MeshServer;

pub const INBOUND_TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
pub const INBOUND_TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
pub const INBOUND_SPAN_ID: &str = "00f067aa0ba902b7";

/// Serve `router` on an ephemeral local port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// One request seen by a [`MockDownstream`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub headers: HeaderMap,
}

/// Canned downstream service: answers every request with the same status
/// and body, optionally after a delay, and records what it received.
#[derive(Clone)]
pub struct MockDownstream {
    pub addr: SocketAddr,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockDownstream {
    pub async fn start(status: u16, body: Value) -> Self {
        Self::start_delayed(status, body, Duration::ZERO).await
    }

    pub async fn start_delayed(status: u16, body: Value, delay: Duration) -> Self {
        let calls: Arc<Mutex<Vec<RecordedCall>>> = Arc::default();
        let recorded = calls.clone();
        let status = StatusCode::from_u16(status).unwrap();

        let router = Router::new().fallback(move |uri: Uri, headers: HeaderMap| {
            let recorded = recorded.clone();
            let body = body.clone();
            async move {
                recorded.lock().unwrap().push(RecordedCall {
                    path: uri.path().to_string(),
                    headers,
                });
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (status, Json(body)).into_response()
            }
        });

        let addr = spawn(router).await;
        Self { addr, calls }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The `traceparent` header of every recorded call.
    pub fn traceparents(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.headers.get("traceparent"))
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }
}

/// Config for `role` with export disabled and every downstream unreachable.
pub fn config(role: ServiceRole) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.service.role = role;
    config.service.version = "test".to_string();
    config.service.environment = "test".to_string();
    config.exporter.enabled = false;
    config.notification.failure_rate = 0.0;
    config.timeouts.connect_ms = 500;
    config.timeouts.hop_ms = 2_000;
    config
}

/// A running service whose closed spans are captured in memory.
pub struct TestService {
    pub addr: SocketAddr,
    pub telemetry: Telemetry,
    spans: mpsc::Receiver<SpanData>,
}

impl TestService {
    pub async fn start(config: &MeshConfig) -> Self {
        let identity = ServiceIdentity::from(&config.service);
        let (telemetry, spans) = Telemetry::in_memory(identity, 1024).unwrap();
        let server = MeshServer::new(config, &telemetry);
        let addr = spawn(server.router()).await;
        Self {
            addr,
            telemetry,
            spans,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every span closed since the last drain.
    pub fn drain_spans(&mut self) -> Vec<SpanData> {
        let mut spans = Vec::new();
        while let Ok(span) = self.spans.try_recv() {
            spans.push(span);
        }
        spans
    }
}

pub fn find_span<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no span named {name} in {:?}", names(spans)))
}

pub fn names(spans: &[SpanData]) -> Vec<&str> {
    spans.iter().map(|s| s.name.as_str()).collect()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// In-memory sink for JSON log records.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Route this thread's log records into the capture until the guard drops.
    ///
    /// Only sound on a current-thread runtime, where every server task runs
    /// on the test thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::registry().with(record_layer(move || writer.clone()));
        tracing::subscriber::set_default(subscriber)
    }

    pub fn records(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

/// Parse Prometheus text into `(metric name, labels)` pairs.
pub fn parse_series(text: &str) -> Vec<(String, Vec<(String, String)>)> {
    text.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| {
            let series = line.rsplit_once(' ').map(|(s, _)| s).unwrap_or(line);
            match series.split_once('{') {
                Some((name, rest)) => {
                    let labels = rest
                        .trim_end_matches('}')
                        .split("\",")
                        .filter(|pair| !pair.is_empty())
                        .map(|pair| {
                            let (key, value) = pair.split_once('=').unwrap();
                            (key.to_string(), value.trim_matches('"').to_string())
                        })
                        .collect();
                    (name.to_string(), labels)
                }
                None => (series.to_string(), Vec::new()),
            }
        })
        .collect()
}
