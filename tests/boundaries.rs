mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn payload_over_max_length_fails_the_exchange() {
    let h = common::harness().await;
    let router = common::router_for(&h);

    let payload = "a".repeat(50_001);
    let create_req = Request::builder()
        .method("POST")
        .uri("/api/exchanges")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "routeId": "demo-echo", "payload": payload }).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(create_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let exchange_id = body["exchangeId"].as_str().unwrap().to_string();

    let state = common::wait_for(&h.exchanges, &exchange_id, |s| {
        s.status == waygate::exchange::ExchangeStatus::Failed
    })
    .await;
    assert_eq!(state.status, waygate::exchange::ExchangeStatus::Failed);
    assert!(state.context.contains("exceeds maximum length"));
}

#[tokio::test]
async fn unknown_status_filter_is_rejected() {
    let h = common::harness().await;
    let router = common::router_for(&h);

    let req = Request::builder()
        .uri("/api/exchanges?status=NOT_A_REAL_STATUS")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn double_approve_is_rejected() {
    let h = common::harness_with(
        std::sync::Arc::new(common::FakeLlm::default()),
        Duration::from_secs(30),
    )
    .await;
    let router = common::router_for(&h);

    let exchange = h
        .exchanges
        .create_exchange(
            waygate::route::CHAT_DURABLE_ROUTE,
            "what's the weather",
            "{}",
        )
        .await
        .expect("create exchange");
    h.engine.submit(exchange.exchange_id.clone());
    common::wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == waygate::exchange::ExchangeStatus::WaitingApproval
    })
    .await;

    let approval = h
        .store
        .get_approval_by_exchange(&exchange.exchange_id)
        .await
        .unwrap()
        .expect("approval request exists");

    let approve_req = Request::builder()
        .method("POST")
        .uri(format!("/api/approvals/{}/approve", approval.id))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "response": "ok" }).to_string()))
        .unwrap();
    let response = router.clone().oneshot(approve_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let second_req = Request::builder()
        .method("POST")
        .uri(format!("/api/approvals/{}/approve", approval.id))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "response": "ok again" }).to_string()))
        .unwrap();
    let response = router.oneshot(second_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_on_a_completed_exchange_is_rejected() {
    let h = common::harness().await;
    let router = common::router_for(&h);

    let create_req = Request::builder()
        .method("POST")
        .uri("/api/exchanges")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "routeId": "demo-echo", "payload": "hello" }).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(create_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let exchange_id = body["exchangeId"].as_str().unwrap().to_string();

    common::wait_for(&h.exchanges, &exchange_id, |s| {
        s.status == waygate::exchange::ExchangeStatus::Completed
    })
    .await;

    let cancel_req = Request::builder()
        .method("POST")
        .uri(format!("/api/exchanges/{exchange_id}/cancel"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(cancel_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
