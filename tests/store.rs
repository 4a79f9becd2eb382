mod common;

use waygate::store::models::ApprovalStatus;

#[tokio::test]
async fn checkpoint_insert_is_idempotent_per_exchange_and_step_name() {
    let h = common::harness().await;
    h.store
        .insert_exchange("exch-1", "demo-echo", "hi", "{}")
        .await
        .unwrap();

    let first = h
        .store
        .checkpoint_insert("exch-1", 0, "validate-input", None)
        .await
        .unwrap();
    assert!(first);

    let second = h
        .store
        .checkpoint_insert("exch-1", 0, "validate-input", Some("ignored"))
        .await
        .unwrap();
    assert!(!second);

    let checkpoints = h.store.list_checkpoints("exch-1").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    // The second attempt's step_data must never overwrite the first's.
    assert_eq!(checkpoints[0].step_data, None);

    let exchange = h.store.get_exchange("exch-1").await.unwrap().unwrap();
    assert_eq!(exchange.current_step, 0);
    assert_eq!(exchange.current_step_name.as_deref(), Some("validate-input"));
}

#[tokio::test]
async fn complete_approval_is_a_no_op_once_already_decided() {
    let h = common::harness().await;
    h.store
        .insert_exchange("exch-2", "demo-echo", "hi", "{}")
        .await
        .unwrap();
    let id = h.store.insert_approval("exch-2", "demo-echo", "{}").await.unwrap();

    let first = h
        .store
        .complete_approval(&id, ApprovalStatus::Approved, Some("ok"))
        .await
        .unwrap();
    assert!(first);

    let second = h
        .store
        .complete_approval(&id, ApprovalStatus::Rejected, Some("too late"))
        .await
        .unwrap();
    assert!(!second);

    let row = h.store.get_approval(&id).await.unwrap().unwrap();
    assert_eq!(row.status, "APPROVED");
    assert_eq!(row.response.as_deref(), Some("ok"));
}

#[tokio::test]
async fn record_route_outcome_accumulates_totals() {
    let h = common::harness().await;
    h.store.record_route_outcome("demo-echo", true).await.unwrap();
    h.store.record_route_outcome("demo-echo", true).await.unwrap();
    h.store.record_route_outcome("demo-echo", false).await.unwrap();

    let metric = h.store.get_route_metric("demo-echo").await.unwrap().unwrap();
    assert_eq!(metric.total_count, 3);
    assert_eq!(metric.success_count, 2);
    assert_eq!(metric.failure_count, 1);
}

#[tokio::test]
async fn list_exchanges_filters_by_status_and_paginates() {
    let h = common::harness().await;
    for i in 0..3 {
        h.store
            .insert_exchange(&format!("exch-{i}"), "demo-echo", "hi", "{}")
            .await
            .unwrap();
    }
    h.store
        .update_exchange_status("exch-1", "RUNNING", true, false)
        .await
        .unwrap();

    let (running, total_running) = h
        .store
        .list_exchanges(Some("RUNNING"), None, 100, 0)
        .await
        .unwrap();
    assert_eq!(total_running, 1);
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].exchange_id, "exch-1");

    let (page, total_all) = h.store.list_exchanges(None, None, 2, 0).await.unwrap();
    assert_eq!(total_all, 3);
    assert_eq!(page.len(), 2);
}
