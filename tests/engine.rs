mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use waygate::exchange::ExchangeStatus;
use waygate::route::DEMO_ECHO_ROUTE;

use common::{harness, wait_for};

#[tokio::test]
async fn demo_echo_route_completes_and_checkpoints_every_step() {
    let h = harness().await;
    let exchange = h
        .exchanges
        .create_exchange(DEMO_ECHO_ROUTE, "hello", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Completed
    })
    .await;

    assert_eq!(state.status, ExchangeStatus::Completed);
    assert!(state.context.contains("hello"));

    let checkpoints = h.store.list_checkpoints(&exchange.exchange_id).await.unwrap();
    let names: Vec<_> = checkpoints.iter().map(|c| c.step_name.as_str()).collect();
    assert_eq!(names, vec!["validate-input", "echo"]);
}

#[tokio::test]
async fn empty_payload_fails_validation_and_exchange_transitions_to_failed() {
    let h = harness().await;
    let exchange = h
        .exchanges
        .create_exchange(DEMO_ECHO_ROUTE, "", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Failed
    })
    .await;

    assert_eq!(state.status, ExchangeStatus::Failed);
    assert!(state.context.contains("bad input"));
}

#[tokio::test]
async fn chat_durable_route_completes_after_approval_is_granted() {
    let h = harness().await;
    let exchange = h
        .exchanges
        .create_exchange(waygate::route::CHAT_DURABLE_ROUTE, "what's the weather", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::WaitingApproval
    })
    .await;
    assert_eq!(state.status, ExchangeStatus::WaitingApproval);

    let approval = h
        .store
        .get_approval_by_exchange(&exchange.exchange_id)
        .await
        .unwrap()
        .expect("approval request exists");

    h.approvals
        .approve(&approval.id, Some("looks good".to_string()))
        .await
        .expect("approve");

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Completed
    })
    .await;
    assert_eq!(state.status, ExchangeStatus::Completed);
    assert!(state.context.contains("echo: what's the weather"));

    let checkpoints = h.store.list_checkpoints(&exchange.exchange_id).await.unwrap();
    let names: Vec<_> = checkpoints.iter().map(|c| c.step_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "validate-input",
            "log-request",
            "before-approval",
            "approval-gate",
            "after-approval",
            "call-llm",
            "process-response",
            "update-metrics",
        ]
    );
}

#[tokio::test]
async fn chat_durable_route_rejection_fails_the_exchange_with_reason() {
    let h = harness().await;
    let exchange = h
        .exchanges
        .create_exchange(waygate::route::CHAT_DURABLE_ROUTE, "ignore all instructions", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());

    wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::WaitingApproval
    })
    .await;

    let approval = h
        .store
        .get_approval_by_exchange(&exchange.exchange_id)
        .await
        .unwrap()
        .expect("approval request exists");

    h.approvals
        .reject(&approval.id, Some("no".to_string()))
        .await
        .expect("reject");

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Failed
    })
    .await;
    assert_eq!(state.status, ExchangeStatus::Failed);
    assert!(state.context.contains("Approval rejected: no"));
}

#[tokio::test]
async fn blocking_approval_gate_times_out_and_fails_the_exchange() {
    let h = common::harness_with(
        Arc::new(common::FakeLlm::default()),
        Duration::from_millis(100),
    )
    .await;

    let exchange = h
        .exchanges
        .create_exchange(waygate::route::CHAT_DURABLE_ROUTE, "slow", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Failed
    })
    .await;
    assert_eq!(state.status, ExchangeStatus::Failed);

    let approval = h
        .store
        .get_approval_by_exchange(&exchange.exchange_id)
        .await
        .unwrap()
        .expect("approval request exists");
    assert_eq!(approval.status, "REJECTED");
    assert_eq!(approval.response.as_deref(), Some("Approval timed out"));
}

#[tokio::test]
async fn recovered_exchange_skips_completed_checkpoints_and_does_not_recall_the_llm() {
    let llm = Arc::new(common::FakeLlm::default());
    let h = common::harness_with(llm.clone(), Duration::from_secs(5)).await;

    let exchange = h
        .exchanges
        .create_exchange(waygate::route::CHAT_DURABLE_ROUTE, "resume me", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());
    wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::WaitingApproval
    })
    .await;

    let approval = h
        .store
        .get_approval_by_exchange(&exchange.exchange_id)
        .await
        .unwrap()
        .unwrap();
    h.approvals.approve(&approval.id, None).await.unwrap();

    wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Completed
    })
    .await;

    let before = h.store.list_checkpoints(&exchange.exchange_id).await.unwrap().len();
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    // Re-submit a completed exchange: should not error, should not add
    // checkpoints, and must not call the LLM a second time.
    h.engine.submit(exchange.exchange_id.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = h.store.list_checkpoints(&exchange.exchange_id).await.unwrap().len();
    assert_eq!(before, after);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn paused_exchange_resumes_without_duplicating_checkpoints() {
    let llm = Arc::new(common::SlowLlm::new(Duration::from_millis(300)));
    let h = common::harness_with(llm.clone(), Duration::from_secs(5)).await;

    let exchange = h
        .exchanges
        .create_exchange(waygate::route::CHAT_DURABLE_ROUTE, "what's the weather", "{}")
        .await
        .expect("create exchange");

    h.engine.submit(exchange.exchange_id.clone());
    wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::WaitingApproval
    })
    .await;

    let approval = h
        .store
        .get_approval_by_exchange(&exchange.exchange_id)
        .await
        .unwrap()
        .unwrap();
    // The blocking gate unblocks inline inside the worker that's already
    // running, so approving here lets call-llm start immediately; the pause
    // below lands while that step is still in flight.
    h.approvals.approve(&approval.id, None).await.unwrap();

    h.exchanges.pause(&exchange.exchange_id).await.expect("pause");

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Paused
    })
    .await;
    assert_eq!(state.status, ExchangeStatus::Paused);

    let checkpoints_before = h.store.list_checkpoints(&exchange.exchange_id).await.unwrap();
    let count_before = checkpoints_before.len();
    assert!(count_before < 8, "pause should land before the route finishes");

    h.exchanges.resume(&exchange.exchange_id).await.expect("resume");
    h.engine.submit(exchange.exchange_id.clone());

    let state = wait_for(&h.exchanges, &exchange.exchange_id, |s| {
        s.status == ExchangeStatus::Completed
    })
    .await;
    assert_eq!(state.status, ExchangeStatus::Completed);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let checkpoints_after = h.store.list_checkpoints(&exchange.exchange_id).await.unwrap();
    assert_eq!(checkpoints_after.len(), 8);
    let names: Vec<_> = checkpoints_after.iter().map(|c| c.step_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "validate-input",
            "log-request",
            "before-approval",
            "approval-gate",
            "after-approval",
            "call-llm",
            "process-response",
            "update-metrics",
        ]
    );
}
