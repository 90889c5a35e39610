//! Trace propagation and correlation across gateway call chains.

use serde_json::{json, Value};

use mesh_telemetry::config::ServiceRole;
use mesh_telemetry::observability::propagation;
use mesh_telemetry::observability::span::{AttributeValue, SpanKind, SpanStatus};

mod common;
use common::{
    config, find_span, http_client, MockDownstream, TestService, INBOUND_SPAN_ID,
    INBOUND_TRACEPARENT, INBOUND_TRACE_ID,
};

async fn gateway_with(
    users: &MockDownstream,
    orders: &MockDownstream,
    notifications: &MockDownstream,
) -> TestService {
    let mut config = config(ServiceRole::Gateway);
    config.downstream.user_service_url = users.url();
    config.downstream.order_service_url = orders.url();
    config.downstream.notification_service_url = notifications.url();
    TestService::start(&config).await
}

fn order_body() -> Value {
    json!({ "user_id": 1, "product": "Laptop", "amount": 5999.99 })
}

#[tokio::test]
async fn test_degraded_order_keeps_inbound_trace() {
    let users = MockDownstream::start(200, json!({ "id": 1, "name": "Zhang San" })).await;
    let orders = MockDownstream::start(
        201,
        json!({ "order": { "id": "O123", "status": "processing" }, "user": { "id": 1 } }),
    )
    .await;
    let notifications =
        MockDownstream::start(503, json!({ "error": { "code": "UNAVAILABLE" } })).await;
    let mut gateway = gateway_with(&users, &orders, &notifications).await;

    let res = http_client()
        .post(format!("{}/api/v1/orders", gateway.url()))
        .header("traceparent", INBOUND_TRACEPARENT)
        .json(&order_body())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-trace-id"], INBOUND_TRACE_ID);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["order"], "O123");
    assert_eq!(body["order_status"], "processing");
    assert_eq!(body["notification"], "failed");
    assert_eq!(body["degraded"], true);

    let spans = gateway.drain_spans();
    let root = find_span(&spans, "POST /api/v1/orders");
    assert_eq!(root.trace_id.to_string(), INBOUND_TRACE_ID);
    assert_eq!(root.parent_span_id.unwrap().to_string(), INBOUND_SPAN_ID);
    assert_eq!(root.kind, SpanKind::Server);
    assert!(!root.status.is_error());
    assert_eq!(
        root.attribute("chain.outcome"),
        Some(&AttributeValue::from("degraded"))
    );

    for (hop, mock) in [
        ("user-check", &users),
        ("order-creation", &orders),
        ("notification", &notifications),
    ] {
        let span = find_span(&spans, hop);
        assert_eq!(span.trace_id, root.trace_id, "{hop} left the trace");
        assert_eq!(span.parent_span_id, Some(root.span_id));
        assert_eq!(span.kind, SpanKind::Client);

        // The downstream sees the hop span as its parent.
        let sent = mock.traceparents();
        assert_eq!(sent.len(), 1, "{hop} called {} times", sent.len());
        let ctx = propagation::decode(&sent[0]).unwrap();
        assert_eq!(ctx.trace_id(), root.trace_id);
        assert_eq!(ctx.span_id(), span.span_id);
    }
    assert!(find_span(&spans, "notification").status.is_error());
    assert_eq!(find_span(&spans, "order-creation").status, SpanStatus::Ok);
    assert_eq!(orders.calls()[0].path, "/orders");
    assert_eq!(users.calls()[0].path, "/users/1");
}

#[tokio::test]
async fn test_new_trace_without_inbound_header() {
    let users = MockDownstream::start(200, json!({ "id": 2, "name": "Li Si" })).await;
    let orders = MockDownstream::start(200, json!({ "orders": [] })).await;
    let notifications = MockDownstream::start(200, json!({})).await;
    let mut gateway = gateway_with(&users, &orders, &notifications).await;

    let res = http_client()
        .get(format!("{}/api/v1/users/2", gateway.url()))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-request-id"], "req-42");
    let trace_id = res.headers()["x-trace-id"].to_str().unwrap().to_string();
    assert_ne!(trace_id, INBOUND_TRACE_ID);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["name"], "Li Si");

    let spans = gateway.drain_spans();
    let root = find_span(&spans, "GET /api/v1/users/{id}");
    assert!(root.parent_span_id.is_none());
    assert!(spans.iter().all(|s| s.trace_id.to_string() == trace_id));
    assert_eq!(
        root.attribute("chain.outcome"),
        Some(&AttributeValue::from("success"))
    );

    let call = &users.calls()[0];
    assert_eq!(call.headers["x-request-id"], "req-42");
    let ctx = propagation::decode(call.headers["traceparent"].to_str().unwrap()).unwrap();
    assert_eq!(ctx.trace_id().to_string(), trace_id);
    assert_eq!(ctx.span_id(), find_span(&spans, "user-lookup").span_id);
    assert!(orders.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_traceparent_starts_new_trace() {
    let users = MockDownstream::start(200, json!({ "id": 1 })).await;
    let orders = MockDownstream::start(200, json!({ "orders": [], "total": 0 })).await;
    let notifications = MockDownstream::start(200, json!({})).await;
    let mut gateway = gateway_with(&users, &orders, &notifications).await;

    let res = http_client()
        .get(format!("{}/api/v1/orders", gateway.url()))
        .header("traceparent", "00-not-a-trace-01")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let spans = gateway.drain_spans();
    let root = find_span(&spans, "GET /api/v1/orders");
    assert!(root.parent_span_id.is_none());
    assert_eq!(root.trace_id.to_string(), res.headers()["x-trace-id"]);
    assert_eq!(find_span(&spans, "order-list").parent_span_id, Some(root.span_id));
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_traces() {
    let users = MockDownstream::start(200, json!({ "id": 1 })).await;
    let orders = MockDownstream::start(200, json!({})).await;
    let notifications = MockDownstream::start(200, json!({})).await;
    let mut gateway = gateway_with(&users, &orders, &notifications).await;

    let client = http_client();
    let requests = (0..8).map(|_| {
        let client = client.clone();
        let url = format!("{}/api/v1/users/1", gateway.url());
        async move {
            let res = client.get(url).send().await.unwrap();
            assert_eq!(res.status(), 200);
            res.headers()["x-trace-id"].to_str().unwrap().to_string()
        }
    });
    let mut trace_ids = futures_util::future::join_all(requests).await;
    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 8);

    // Every hop span sits in the trace of its own root.
    let spans = gateway.drain_spans();
    let roots: Vec<_> = spans.iter().filter(|s| s.name.starts_with("GET ")).collect();
    assert_eq!(roots.len(), 8);
    for hop in spans.iter().filter(|s| s.name == "user-lookup") {
        let root = roots
            .iter()
            .find(|r| Some(r.span_id) == hop.parent_span_id)
            .unwrap();
        assert_eq!(root.trace_id, hop.trace_id);
    }
}
