//! User service: an in-memory user directory.

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

use crate::http::response::ApiError;
use crate::observability::labels::{Operation, Outcome, Route};
use crate::observability::span::{Span, SpanStatus};
use crate::observability::Telemetry;
use crate::services::unix_now;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub age: u32,
    pub status: String,
    pub created_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub age: u32,
}

/// Concurrent user store keyed by id.
pub struct UserStore {
    users: DashMap<u64, User>,
    next_id: AtomicU64,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store pre-populated with three demo users.
    pub fn seeded() -> Self {
        let store = Self::new();
        for (name, email, age, status) in [
            ("Zhang San", "zhangsan@example.com", 25, "active"),
            ("Li Si", "lisi@example.com", 30, "active"),
            ("Wang Wu", "wangwu@example.com", 28, "inactive"),
        ] {
            let user = store.insert(NewUser {
                name: name.to_string(),
                email: email.to_string(),
                age,
            });
            if status != "active" {
                if let Some(mut stored) = store.users.get_mut(&user.id) {
                    stored.status = status.to_string();
                }
            }
        }
        store
    }

    pub fn get(&self, id: u64) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn insert(&self, new: NewUser) -> User {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let user = User {
            id,
            name: new.name,
            email: new.email,
            age: new.age,
            status: "active".to_string(),
            created_at: unix_now(),
        };
        self.users.insert(id, user.clone());
        user
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct UserState {
    pub telemetry: Telemetry,
    pub store: Arc<UserStore>,
}

pub fn router(state: UserState) -> Router {
    Router::new()
        .route(Route::Users.template(), get(list_users).post(create_user))
        .route(Route::User.template(), get(get_user))
        .with_state(state)
}

async fn get_user(
    State(state): State<UserState>,
    Extension(root): Extension<Span>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let metrics = state.telemetry.metrics();
    let Ok(id) = id.parse::<u64>() else {
        metrics.record_operation(Operation::GetUser, Outcome::Error);
        return Err(ApiError::BadRequest("invalid user id".to_string()));
    };
    let _ = root.set_attribute("user.id", id);

    let lookup = state
        .telemetry
        .tracer()
        .span_builder("lookup-user")
        .parent(Some(&root.context()))
        .attribute("user.id", id)
        .start();
    let found = state.store.get(id);

    match found {
        Some(user) => {
            let _ = lookup.end(SpanStatus::Ok);
            metrics.record_operation(Operation::GetUser, Outcome::Success);
            tracing::info!(user_id = id, "User fetched");
            Ok(Json(user))
        }
        None => {
            let _ = lookup.end(SpanStatus::error("user not found"));
            metrics.record_operation(Operation::GetUser, Outcome::NotFound);
            tracing::warn!(user_id = id, "User not found");
            Err(ApiError::NotFound("user"))
        }
    }
}

async fn list_users(State(state): State<UserState>) -> Json<Value> {
    let users = state.store.list();
    state
        .telemetry
        .metrics()
        .record_operation(Operation::ListUsers, Outcome::Success);
    tracing::info!(count = users.len(), "Users listed");
    Json(json!({ "users": users, "total": users.len() }))
}

async fn create_user(
    State(state): State<UserState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let metrics = state.telemetry.metrics();
    let Json(new) = payload.map_err(|e| {
        metrics.record_operation(Operation::CreateUser, Outcome::Error);
        ApiError::BadRequest(e.body_text())
    })?;

    let user = state.store.insert(new);
    metrics.record_operation(Operation::CreateUser, Outcome::Success);
    tracing::info!(user_id = user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}
