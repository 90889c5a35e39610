//! Order service: order storage plus user validation against the user service.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{CallChain, ChainBinding, HopSpec};
use crate::http::client::DownstreamClient;
use crate::http::response::ApiError;
use crate::observability::labels::{Downstream, Operation, Outcome, Route};
use crate::observability::logging::LogScope;
use crate::observability::span::{Span, SpanStatus};
use crate::observability::Telemetry;
use crate::services::unix_now;

const CREATE_ORDER_PLAN: [HopSpec; 1] =
    [HopSpec::required("user-validation", Downstream::UserService)];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub user_id: u64,
    pub product: String,
    pub amount: f64,
    pub status: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: u64,
    pub product: String,
    pub amount: f64,
}

/// Concurrent order store; ids are `O<seq>`.
pub struct OrderStore {
    orders: DashMap<String, Order>,
    next_seq: AtomicU64,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn seeded() -> Self {
        let store = Self::new();
        for (user_id, product, amount, status) in [
            (1, "Laptop", 5999.99, "completed"),
            (2, "Smartphone", 2999.99, "processing"),
        ] {
            let order = store.insert(NewOrder {
                user_id,
                product: product.to_string(),
                amount,
            });
            if let Some(mut stored) = store.orders.get_mut(&order.id) {
                stored.status = status.to_string();
            }
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<Order> {
        self.orders.get(id).map(|o| o.clone())
    }

    pub fn list(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.value().clone()).collect();
        orders.sort_by_key(|o| order_seq(&o.id));
        orders
    }

    pub fn insert(&self, new: NewOrder) -> Order {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let order = Order {
            id: format!("O{}", seq),
            user_id: new.user_id,
            product: new.product,
            amount: new.amount,
            status: "processing".to_string(),
            created_at: unix_now(),
        };
        self.orders.insert(order.id.clone(), order.clone());
        order
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

fn order_seq(id: &str) -> u64 {
    id.strip_prefix('O')
        .and_then(|seq| seq.parse().ok())
        .unwrap_or(u64::MAX)
}

#[derive(Clone)]
pub struct OrderState {
    pub telemetry: Telemetry,
    pub client: DownstreamClient,
    pub user_service_url: String,
    pub hop_timeout: Duration,
    pub store: Arc<OrderStore>,
}

pub fn router(state: OrderState) -> Router {
    Router::new()
        .route(Route::Orders.template(), get(list_orders).post(create_order))
        .route(Route::Order.template(), get(get_order))
        .with_state(state)
}

async fn list_orders(State(state): State<OrderState>) -> Json<Value> {
    let orders = state.store.list();
    state
        .telemetry
        .metrics()
        .record_operation(Operation::ListOrders, Outcome::Success);
    tracing::info!(count = orders.len(), "Orders listed");
    Json(json!({ "orders": orders, "total": orders.len() }))
}

async fn create_order(
    State(state): State<OrderState>,
    Extension(root): Extension<Span>,
    Extension(scope): Extension<LogScope>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let metrics = state.telemetry.metrics();
    let Json(new) = payload.map_err(|e| {
        metrics.record_operation(Operation::CreateOrder, Outcome::Error);
        ApiError::BadRequest(e.body_text())
    })?;
    let _ = root.set_attribute("user.id", new.user_id);
    let _ = root.set_attribute("product", new.product.as_str());

    let mut chain = CallChain::new("create-order", &CREATE_ORDER_PLAN);
    chain.bind(ChainBinding::new(&state.telemetry, &root, &scope, state.hop_timeout));

    let url = format!("{}/users/{}", state.user_service_url, new.user_id);
    let client = &state.client;
    let user = match chain
        .required("user-validation", |hop| client.get_json(&url, hop))
        .await
    {
        Ok(user) => user,
        Err(e) => {
            metrics.record_operation(Operation::CreateOrder, Outcome::Error);
            return Err(e.into());
        }
    };

    let persist = state
        .telemetry
        .tracer()
        .start("persist-order", Some(&root.context()));
    let order = state.store.insert(new);
    let _ = persist.set_attribute("order.id", order.id.as_str());
    let _ = persist.end(SpanStatus::Ok);
    chain.finish();

    metrics.record_operation(Operation::CreateOrder, Outcome::Success);
    let _ = root.set_attribute("order.id", order.id.as_str());
    tracing::info!(order_id = %order.id, user_id = order.user_id, "Order created");

    Ok((StatusCode::CREATED, Json(json!({ "order": order, "user": user }))))
}

async fn get_order(
    State(state): State<OrderState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let metrics = state.telemetry.metrics();
    if order_seq(&id) == u64::MAX {
        metrics.record_operation(Operation::GetOrder, Outcome::Error);
        return Err(ApiError::BadRequest("invalid order id".to_string()));
    }
    match state.store.get(&id) {
        Some(order) => {
            metrics.record_operation(Operation::GetOrder, Outcome::Success);
            Ok(Json(order))
        }
        None => {
            metrics.record_operation(Operation::GetOrder, Outcome::NotFound);
            tracing::warn!(order_id = %id, "Order not found");
            Err(ApiError::NotFound("order"))
        }
    }
}
