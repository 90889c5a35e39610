//! The four service roles of the mesh.
//!
//! Every role serves `/health` and `/metrics` next to its own routes; which
//! role a process plays is chosen by `service.role` in config.

pub mod gateway;
pub mod notifications;
pub mod orders;
pub mod users;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{MeshConfig, ServiceRole};
use crate::http::client::DownstreamClient;
use crate::observability::labels::Route;
use crate::observability::Telemetry;

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Routes for the configured role, plus the shared health and metrics routes.
pub fn router(config: &MeshConfig, telemetry: &Telemetry) -> Router {
    let hop_timeout = Duration::from_millis(config.timeouts.hop_ms);
    let client = || DownstreamClient::new(Duration::from_millis(config.timeouts.connect_ms));

    let role_routes = match config.service.role {
        ServiceRole::Gateway => gateway::router(gateway::GatewayState {
            telemetry: telemetry.clone(),
            client: client(),
            downstream: config.downstream.clone(),
            hop_timeout,
        }),
        ServiceRole::User => users::router(users::UserState {
            telemetry: telemetry.clone(),
            store: Arc::new(users::UserStore::seeded()),
        }),
        ServiceRole::Order => orders::router(orders::OrderState {
            telemetry: telemetry.clone(),
            client: client(),
            user_service_url: config.downstream.user_service_url.clone(),
            hop_timeout,
            store: Arc::new(orders::OrderStore::seeded()),
        }),
        ServiceRole::Notification => notifications::router(notifications::NotificationState::new(
            telemetry.clone(),
            config.notification.failure_rate,
        )),
    };

    role_routes.merge(base_routes(telemetry.clone()))
}

fn base_routes(telemetry: Telemetry) -> Router {
    Router::new()
        .route(Route::Health.template(), get(health))
        .route(Route::Metrics.template(), get(metrics))
        .with_state(telemetry)
}

async fn health(State(telemetry): State<Telemetry>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": telemetry.identity().name,
    }))
}

async fn metrics(State(telemetry): State<Telemetry>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry.metrics().render(),
    )
}
