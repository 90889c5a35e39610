//! API gateway: the ingress that fans out to the downstream services.
//!
//! # Call Chains
//! ```text
//! GET  /api/v1/users/{id}  user-lookup (required)
//! POST /api/v1/orders      user-check (required) → order-creation (required)
//!                          → notification (optional)
//! GET  /api/v1/orders      order-list (required)
//! ```

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::chain::{CallChain, ChainBinding, ChainError, HopFailure, HopSpec};
use crate::config::DownstreamConfig;
use crate::http::client::DownstreamClient;
use crate::http::response::ApiError;
use crate::observability::labels::{Downstream, Operation, Outcome, Route};
use crate::observability::logging::LogScope;
use crate::observability::span::Span;
use crate::observability::Telemetry;
use crate::services::orders::NewOrder;

const GET_USER_PLAN: [HopSpec; 1] = [HopSpec::required("user-lookup", Downstream::UserService)];

const PLACE_ORDER_PLAN: [HopSpec; 3] = [
    HopSpec::required("user-check", Downstream::UserService),
    HopSpec::required("order-creation", Downstream::OrderService),
    HopSpec::optional("notification", Downstream::NotificationService),
];

const LIST_ORDERS_PLAN: [HopSpec; 1] =
    [HopSpec::required("order-list", Downstream::OrderService)];

#[derive(Clone)]
pub struct GatewayState {
    pub telemetry: Telemetry,
    pub client: DownstreamClient,
    pub downstream: DownstreamConfig,
    pub hop_timeout: Duration,
}

impl GatewayState {
    fn chain(&self, name: &'static str, plan: &[HopSpec], root: &Span, scope: &LogScope) -> CallChain {
        let mut chain = CallChain::new(name, plan);
        chain.bind(ChainBinding::new(&self.telemetry, root, scope, self.hop_timeout));
        chain
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: u64,
    pub product: String,
    pub amount: f64,
}

/// Result of `POST /api/v1/orders`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacedOrder {
    pub order: String,
    pub order_status: String,
    /// `"sent"` or `"failed"`.
    pub notification: String,
    /// True when an optional hop failed and its part of the result is missing.
    pub degraded: bool,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(Route::GatewayUser.template(), get(get_user))
        .route(Route::GatewayOrders.template(), get(list_orders).post(place_order))
        .with_state(state)
}

async fn get_user(
    State(state): State<GatewayState>,
    Extension(root): Extension<Span>,
    Extension(scope): Extension<LogScope>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let metrics = state.telemetry.metrics();
    let Ok(id) = id.parse::<u64>() else {
        metrics.record_operation(Operation::GatewayGetUser, Outcome::Error);
        return Err(ApiError::BadRequest("invalid user id".to_string()));
    };

    let mut chain = state.chain("get-user", &GET_USER_PLAN, &root, &scope);
    let url = format!("{}/users/{}", state.downstream.user_service_url, id);
    let client = &state.client;
    let result = chain
        .required("user-lookup", |hop| client.get_json(&url, hop))
        .await;
    chain.finish();

    match result {
        Ok(user) => {
            metrics.record_operation(Operation::GatewayGetUser, Outcome::Success);
            Ok(Json(user))
        }
        Err(e) => {
            metrics.record_operation(Operation::GatewayGetUser, outcome_of(&e));
            Err(e.into())
        }
    }
}

async fn list_orders(
    State(state): State<GatewayState>,
    Extension(root): Extension<Span>,
    Extension(scope): Extension<LogScope>,
) -> Result<Json<Value>, ApiError> {
    let metrics = state.telemetry.metrics();
    let mut chain = state.chain("list-orders", &LIST_ORDERS_PLAN, &root, &scope);
    let url = format!("{}/orders", state.downstream.order_service_url);
    let client = &state.client;
    let result = chain
        .required("order-list", |hop| client.get_json(&url, hop))
        .await;
    chain.finish();

    match result {
        Ok(orders) => {
            metrics.record_operation(Operation::GatewayListOrders, Outcome::Success);
            Ok(Json(orders))
        }
        Err(e) => {
            metrics.record_operation(Operation::GatewayListOrders, Outcome::Error);
            Err(e.into())
        }
    }
}

async fn place_order(
    State(state): State<GatewayState>,
    Extension(root): Extension<Span>,
    Extension(scope): Extension<LogScope>,
    payload: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<Json<PlacedOrder>, ApiError> {
    let metrics = state.telemetry.metrics();
    let Json(request) = payload.map_err(|e| {
        metrics.record_operation(Operation::GatewayPlaceOrder, Outcome::Error);
        ApiError::BadRequest(e.body_text())
    })?;

    let mut chain = state.chain("place-order", &PLACE_ORDER_PLAN, &root, &scope);
    match run_place_order(&state, &mut chain, request).await {
        Ok(placed) => {
            let report = chain.finish();
            metrics.record_operation(Operation::GatewayPlaceOrder, Outcome::Success);
            tracing::info!(
                order_id = %placed.order,
                outcome = %report.outcome,
                "Order placed"
            );
            Ok(Json(placed))
        }
        Err(e) => {
            chain.finish();
            metrics.record_operation(Operation::GatewayPlaceOrder, Outcome::Error);
            Err(e.into())
        }
    }
}

async fn run_place_order(
    state: &GatewayState,
    chain: &mut CallChain,
    request: PlaceOrder,
) -> Result<PlacedOrder, ChainError> {
    let client = &state.client;
    let downstream = &state.downstream;

    let user_url = format!("{}/users/{}", downstream.user_service_url, request.user_id);
    chain
        .required("user-check", |hop| client.get_json(&user_url, hop))
        .await?;

    let order_url = format!("{}/orders", downstream.order_service_url);
    let new_order = NewOrder {
        user_id: request.user_id,
        product: request.product,
        amount: request.amount,
    };
    let (order, order_status) = chain
        .required("order-creation", |hop| async move {
            let created = client.post_json(&order_url, &new_order, hop).await?;
            order_summary(&created)
        })
        .await?;

    let notify_url = format!("{}/notify", downstream.notification_service_url);
    let notification = chain
        .optional("notification", |hop| client.get_json(&notify_url, hop))
        .await?;

    Ok(PlacedOrder {
        order,
        order_status,
        notification: if notification.is_some() { "sent" } else { "failed" }.to_string(),
        degraded: notification.is_none(),
    })
}

/// Pull the order id and status out of the order service's create response.
fn order_summary(created: &Value) -> Result<(String, String), HopFailure> {
    let order = &created["order"];
    let id = order["id"]
        .as_str()
        .ok_or_else(|| HopFailure::Decode("order id missing".to_string()))?;
    let status = order["status"].as_str().unwrap_or("processing");
    Ok((id.to_string(), status.to_string()))
}

fn outcome_of(error: &ChainError) -> Outcome {
    match error {
        ChainError::RequiredHopFailure {
            failure: HopFailure::Status(404),
            ..
        } => Outcome::NotFound,
        _ => Outcome::Error,
    }
}
