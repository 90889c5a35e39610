//! Span tracking.
//!
//! # Responsibilities
//! - Open timed spans as roots or as children of a known context
//! - Record attributes and status while the span is open
//! - Close spans exactly once and hand a snapshot to the export queue
//!
//! # Design Decisions
//! - [`Span`] is a cheap cloneable handle so handlers and interceptors can
//!   annotate the same span; [`SpanGuard`] is the single owner that closes it
//! - A closed span rejects every mutation with [`SpanError::Closed`]; the
//!   exported copy is taken at close time and never changes afterwards
//! - Dropping a guard closes the span, so early returns, panics and
//!   cancelled futures cannot leak an open span

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use thiserror::Error;

use crate::observability::context::{SpanId, TraceContext, TraceId};
use crate::observability::export::ExportQueue;

/// Attribute value attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

/// Ids above `i64::MAX` are kept as decimal strings rather than wrapped.
impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(AttributeValue::Int)
            .unwrap_or_else(|_| AttributeValue::String(value.to_string()))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(v) => f.write_str(v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Final or in-progress status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        SpanStatus::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// Role of a span in the call it measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    #[default]
    Internal,
    /// Handling an inbound request.
    Server,
    /// Calling a downstream service.
    Client,
}

impl SpanKind {
    /// OTLP wire value.
    pub fn otlp_code(self) -> u8 {
        match self {
            SpanKind::Internal => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanError {
    #[error("span '{name}' ({span_id}) is already closed")]
    Closed { name: String, span_id: SpanId },
}

/// Immutable snapshot of a span, as handed to the exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub service: Arc<str>,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: SpanStatus,
}

impl SpanData {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

struct SpanState {
    data: SpanData,
    closed: bool,
}

struct SpanInner {
    context: TraceContext,
    state: Mutex<SpanState>,
    export: ExportQueue,
}

/// Shared handle to an open (or closed) span.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    fn open(
        name: String,
        kind: SpanKind,
        service: Arc<str>,
        context: TraceContext,
        attributes: BTreeMap<String, AttributeValue>,
        export: ExportQueue,
    ) -> Self {
        let data = SpanData {
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            parent_span_id: context.parent_span_id(),
            name,
            kind,
            service,
            start_time: SystemTime::now(),
            end_time: None,
            attributes,
            status: SpanStatus::Unset,
        };
        Self {
            inner: Arc::new(SpanInner {
                context,
                state: Mutex::new(SpanState { data, closed: false }),
                export,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SpanState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity of this span, for children and outbound injection.
    pub fn context(&self) -> TraceContext {
        self.inner.context
    }

    pub fn name(&self) -> String {
        self.state().data.name.clone()
    }

    pub fn status(&self) -> SpanStatus {
        self.state().data.status.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.state().closed
    }

    /// Current contents of the span, open or not.
    pub fn snapshot(&self) -> SpanData {
        self.state().data.clone()
    }

    pub fn set_attribute(
        &self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<(), SpanError> {
        let mut state = self.state();
        ensure_open(&state)?;
        state.data.attributes.insert(key.into(), value.into());
        Ok(())
    }

    pub fn set_status(&self, status: SpanStatus) -> Result<(), SpanError> {
        let mut state = self.state();
        ensure_open(&state)?;
        state.data.status = status;
        Ok(())
    }

    /// Close the span and hand it to the exporter.
    ///
    /// `SpanStatus::Unset` keeps whatever status was recorded while open.
    pub fn end(&self, status: SpanStatus) -> Result<(), SpanError> {
        let data = {
            let mut state = self.state();
            ensure_open(&state)?;
            state.closed = true;
            state.data.end_time = Some(SystemTime::now());
            if status != SpanStatus::Unset {
                state.data.status = status;
            }
            state.data.clone()
        };

        if self.inner.context.is_sampled() {
            self.inner.export.enqueue(data);
        }
        Ok(())
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("context", &self.inner.context)
            .field("ended", &self.is_ended())
            .finish()
    }
}

fn ensure_open(state: &SpanState) -> Result<(), SpanError> {
    if state.closed {
        return Err(SpanError::Closed {
            name: state.data.name.clone(),
            span_id: state.data.span_id,
        });
    }
    Ok(())
}

/// Owner of a span for the scope that created it. Closes the span on drop.
#[derive(Debug)]
pub struct SpanGuard {
    span: Span,
}

impl SpanGuard {
    /// Shared handle to the guarded span.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Deref for SpanGuard {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.span
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.span.is_ended() {
            return;
        }
        let status = if std::thread::panicking() {
            SpanStatus::error("span dropped while panicking")
        } else {
            SpanStatus::Unset
        };
        // Another handle may have closed it in the meantime; that is fine.
        let _ = self.span.end(status);
    }
}

/// Factory for spans belonging to one service.
#[derive(Clone)]
pub struct Tracer {
    service: Arc<str>,
    export: ExportQueue,
}

impl Tracer {
    pub fn new(service: impl Into<Arc<str>>, export: ExportQueue) -> Self {
        Self {
            service: service.into(),
            export,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Open a span as a child of `parent`, or as the root of a new trace.
    pub fn start(&self, name: impl Into<String>, parent: Option<&TraceContext>) -> SpanGuard {
        self.span_builder(name).parent(parent).start()
    }

    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            name: name.into(),
            kind: SpanKind::Internal,
            parent: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Collects a span's name, parent and initial attributes before opening it.
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    name: String,
    kind: SpanKind,
    parent: Option<TraceContext>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl SpanBuilder<'_> {
    pub fn parent(mut self, parent: Option<&TraceContext>) -> Self {
        self.parent = parent.copied();
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn start(self) -> SpanGuard {
        let context = match self.parent {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(),
        };
        let span = Span::open(
            self.name,
            self.kind,
            self.tracer.service.clone(),
            context,
            self.attributes,
            self.tracer.export.clone(),
        );
        SpanGuard { span }
    }
}
