//! Outbound HTTP client for downstream hops.
//!
//! # Responsibilities
//! - Send JSON requests to downstream services
//! - Inject the hop's trace context and forward the request id
//! - Classify failures as transport, status or decode errors

use axum::body::Body;
use axum::http::{header, Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::chain::{HopContext, HopFailure};
use crate::http::request::X_REQUEST_ID;
use crate::observability::propagation;

/// Largest downstream response body accepted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct DownstreamClient {
    client: Client<HttpConnector, Body>,
}

impl DownstreamClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }

    pub async fn get_json(&self, url: &str, hop: HopContext) -> Result<Value, HopFailure> {
        self.send(Method::GET, url, Body::empty(), hop).await
    }

    pub async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        hop: HopContext,
    ) -> Result<Value, HopFailure> {
        let bytes = serde_json::to_vec(body).map_err(|e| HopFailure::Decode(e.to_string()))?;
        self.send(Method::POST, url, Body::from(bytes), hop).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Body,
        hop: HopContext,
    ) -> Result<Value, HopFailure> {
        let mut request = Request::builder()
            .method(method)
            .uri(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, concat!("mesh-telemetry/", env!("CARGO_PKG_VERSION")))
            .body(body)
            .map_err(|e| HopFailure::Transport(e.to_string()))?;

        propagation::inject(&hop.trace, request.headers_mut());
        if let Some(request_id) = hop.request_id.as_deref() {
            if let Ok(value) = request_id.parse() {
                request.headers_mut().insert(X_REQUEST_ID, value);
            }
        }

        let response: hyper::Response<hyper::body::Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| HopFailure::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_BODY_BYTES)
            .await
            .map_err(|e| HopFailure::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(HopFailure::Status(status.as_u16()));
        }
        serde_json::from_slice(&bytes).map_err(|e| HopFailure::Decode(e.to_string()))
    }
}
