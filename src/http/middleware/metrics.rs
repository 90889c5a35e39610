//! Request metrics middleware.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::labels::{HttpMethod, Route, StatusClass};
use crate::observability::Telemetry;

/// Time the request and count it by method, route template and status class.
pub async fn record_request_metrics(
    State(telemetry): State<Telemetry>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = HttpMethod::from(req.method());
    let route = Route::of(&req);

    let response = next.run(req).await;

    telemetry
        .metrics()
        .record_request(method, route, StatusClass::from(response.status()), start);
    response
}
