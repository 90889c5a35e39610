//! Access Log Middleware.
//! Emits one completion record per request, inside the request's log scope.

use axum::{
    body::Body,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::observability::labels::Route;

pub async fn log_completion(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = Route::of(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    if response.status().is_server_error() {
        tracing::warn!(
            method = %method,
            route = route.template(),
            path = %path,
            status,
            latency_ms,
            user_agent = %user_agent,
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            route = route.template(),
            path = %path,
            status,
            latency_ms,
            user_agent = %user_agent,
            "Request completed"
        );
    }
    response
}
