//! Inbound interceptor stack.
//!
//! # Order (outermost first)
//! ```text
//! request id (generate if absent) → propagate request id to response
//!     → trace_context.rs (root span + log scope, x-trace-id on response)
//!     → metrics.rs (timer, request counters)
//!     → access_log.rs (completion record)
//!     → panic recovery (panic becomes a 500 seen by every layer above)
//!     → request timeout (408)
//!     → handler
//! ```

pub mod access_log;
pub mod metrics;
pub mod trace_context;

use axum::{middleware, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use crate::observability::Telemetry;

pub use access_log::log_completion;
pub use metrics::record_request_metrics;
pub use trace_context::bind_trace_context;

/// Wrap every route of `router` in the interceptor stack.
#[allow(deprecated)]
pub fn apply(router: Router, telemetry: Telemetry, request_timeout: Duration) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(middleware::from_fn_with_state(telemetry.clone(), bind_trace_context))
            .layer(middleware::from_fn_with_state(telemetry, record_request_metrics))
            .layer(middleware::from_fn(log_completion))
            .layer(CatchPanicLayer::new())
            .layer(TimeoutLayer::new(request_timeout)),
    )
}
