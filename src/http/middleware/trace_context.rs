//! Trace Context Middleware.
//! Binds every inbound request to a root span and a log scope.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::http::request::{request_id, X_TRACE_ID};
use crate::observability::labels::Route;
use crate::observability::logging::LogScope;
use crate::observability::propagation;
use crate::observability::span::{SpanKind, SpanStatus};
use crate::observability::Telemetry;

/// Extract (or start) the trace, open the root span, run the request inside
/// its log scope, then close the span.
///
/// Handlers receive the root [`crate::observability::span::Span`] and the
/// [`LogScope`] as request extensions.
pub async fn bind_trace_context(
    State(telemetry): State<Telemetry>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let inbound = propagation::extract(req.headers());
    let parent = inbound.as_ref().ok().copied();
    let route = Route::of(&req);

    let root = telemetry
        .tracer()
        .span_builder(format!("{} {}", req.method(), route.template()))
        .kind(SpanKind::Server)
        .parent(parent.as_ref())
        .attribute("http.method", req.method().as_str())
        .attribute("http.route", route.template())
        .attribute("http.target", req.uri().path())
        .start();
    let trace_id = root.context().trace_id();
    let scope = LogScope::new(telemetry.identity(), trace_id, request_id(req.headers()));

    scope.in_scope(|| match &inbound {
        Ok(remote) => tracing::debug!(parent_span_id = %remote.span_id(), "Joined inbound trace"),
        Err(reason) => tracing::debug!(reason = %reason, "Starting new trace"),
    });

    req.extensions_mut().insert(root.span().clone());
    req.extensions_mut().insert(scope.clone());

    let mut response = next.run(req).instrument(scope.span().clone()).await;

    let status = response.status();
    let _ = root.set_attribute("http.status_code", status.as_u16());
    let final_status = if root.status() != SpanStatus::Unset {
        SpanStatus::Unset
    } else if status.is_server_error() {
        SpanStatus::error(format!("HTTP {}", status.as_u16()))
    } else {
        SpanStatus::Ok
    };
    let _ = root.end(final_status);

    if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
        response.headers_mut().insert(X_TRACE_ID, value);
    }
    response
}
