//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process-wide subscriber once at startup
//! - Derive a per-request [`LogScope`] carrying the active trace identity
//!
//! # Design Decisions
//! - Uses the tracing crate; the scope is a `tracing` span, so every event
//!   emitted inside an instrumented request inherits its fields
//! - Records are JSON lines on stdout (or pretty, for development) and in an
//!   append-only file behind a mutex so lines never interleave
//! - The minimum level is read once at startup; there is no runtime reload

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ObservabilityConfig};
use crate::observability::context::TraceId;
use crate::observability::ServiceIdentity;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("logger already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// The JSON record layer shared by the file sink and stdout.
pub type RecordLayer<S, W> = fmt::Layer<S, JsonFields, Format<Json, SystemTime>, W>;

/// Build the layer producing production log records on `make_writer`.
///
/// Each line holds `timestamp`, `level`, `message`, the source location
/// (`filename`, `line_number`), the event's fields, and a `span` object with
/// the fields of the enclosing [`LogScope`].
pub fn record_layer<S, W>(make_writer: W) -> RecordLayer<S, W>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
}

/// Install the base logger. Call once, before serving.
pub fn init_logging(config: &ObservabilityConfig, log_file: &Path) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(&config.log_level)?;

    let (file_layer, file_error) = match open_log_file(log_file) {
        Ok(file) => (Some(record_layer(Mutex::new(file))), None),
        Err(e) => (None, Some(e)),
    };
    let (json_console, pretty_console) = match config.log_format {
        LogFormat::Json => (Some(record_layer(io::stdout)), None),
        LogFormat::Pretty => (None, Some(fmt::layer().pretty().with_target(false))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(pretty_console)
        .with(file_layer)
        .try_init()?;

    if let Some(e) = file_error {
        tracing::warn!(
            path = %log_file.display(),
            error = %e,
            "Failed to open log file, logging to stdout only"
        );
    }
    Ok(())
}

/// Open `path` for appending, creating parent directories as needed.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Per-request logging context.
///
/// Events emitted while the scope's span is entered (directly, or through an
/// instrumented future) carry `trace_id`, `request_id`, `service` and
/// `service_version`.
#[derive(Debug, Clone)]
pub struct LogScope {
    trace_id: TraceId,
    request_id: String,
    span: tracing::Span,
}

impl LogScope {
    pub fn new(identity: &ServiceIdentity, trace_id: TraceId, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        // Created at ERROR so the scope exists under any level filter.
        let span = tracing::error_span!(
            "request",
            trace_id = %trace_id,
            request_id = %request_id,
            service = %identity.name,
            service_version = %identity.version,
        );
        Self {
            trace_id,
            request_id,
            span,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }
}
