//! Notification service with a configurable simulated failure rate.

use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::http::response::ApiError;
use crate::observability::labels::{DeliveryStatus, NotificationKind, Operation, Outcome, Route};
use crate::observability::span::{Span, SpanStatus};
use crate::observability::Telemetry;
use crate::services::unix_now;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub status: String,
    pub sent_at: u64,
}

#[derive(Clone)]
pub struct NotificationState {
    pub telemetry: Telemetry,
    pub failure_rate: f64,
    pub next_id: Arc<AtomicU64>,
}

impl NotificationState {
    pub fn new(telemetry: Telemetry, failure_rate: f64) -> Self {
        Self {
            telemetry,
            failure_rate,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub fn router(state: NotificationState) -> Router {
    Router::new()
        .route(Route::Notify.template(), get(send_notification))
        .route(Route::Email.template(), post(send_email))
        .route(Route::Sms.template(), post(send_sms))
        .with_state(state)
}

async fn send_notification(
    State(state): State<NotificationState>,
    Extension(root): Extension<Span>,
) -> Result<Json<Notification>, ApiError> {
    let kind = match fastrand::u8(0..3) {
        0 => NotificationKind::Email,
        1 => NotificationKind::Sms,
        _ => NotificationKind::Push,
    };
    deliver(
        &state,
        &root,
        kind,
        Operation::SendNotification,
        "Your order has been created",
    )
}

async fn send_email(
    State(state): State<NotificationState>,
    Extension(root): Extension<Span>,
) -> Result<Json<Notification>, ApiError> {
    deliver(
        &state,
        &root,
        NotificationKind::Email,
        Operation::SendEmail,
        "Email notification sent",
    )
}

async fn send_sms(
    State(state): State<NotificationState>,
    Extension(root): Extension<Span>,
) -> Result<Json<Notification>, ApiError> {
    deliver(
        &state,
        &root,
        NotificationKind::Sms,
        Operation::SendSms,
        "SMS notification sent",
    )
}

fn deliver(
    state: &NotificationState,
    root: &Span,
    kind: NotificationKind,
    operation: Operation,
    message: &str,
) -> Result<Json<Notification>, ApiError> {
    let metrics = state.telemetry.metrics();
    let send = state
        .telemetry
        .tracer()
        .span_builder(format!("send-{}-notification", kind))
        .parent(Some(&root.context()))
        .attribute("notification.type", kind.as_str())
        .start();
    let _ = root.set_attribute("notification.type", kind.as_str());

    if fastrand::f64() < state.failure_rate {
        let _ = send.end(SpanStatus::error("delivery failed"));
        metrics.record_notification(kind, DeliveryStatus::Failed);
        metrics.record_operation(operation, Outcome::Error);
        tracing::error!(kind = kind.as_str(), "Notification delivery failed");
        return Err(ApiError::Unavailable(format!("{} delivery failed", kind)));
    }

    let notification = Notification {
        id: state.next_id.fetch_add(1, Ordering::Relaxed),
        kind: kind.as_str().to_string(),
        message: message.to_string(),
        status: DeliveryStatus::Sent.as_str().to_string(),
        sent_at: unix_now(),
    };
    let _ = send.set_attribute("notification.id", notification.id);
    let _ = send.end(SpanStatus::Ok);
    metrics.record_notification(kind, DeliveryStatus::Sent);
    metrics.record_operation(operation, Outcome::Success);
    tracing::info!(
        kind = kind.as_str(),
        notification_id = notification.id,
        "Notification sent"
    );
    Ok(Json(notification))
}
