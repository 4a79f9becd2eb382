//! Human-in-the-loop approval gates: one-shot completion signals keyed by
//! approval id, backing both a blocking wait and a fire-and-forget request.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, oneshot};
use tracing::instrument;

use crate::error::{EngineError, Result};
use crate::event_bus::{Event, EventBus, EventType};
use crate::exchange::ExchangeStateManager;
use crate::route::RouteEngine;
use crate::store::models::{ApprovalRow, ApprovalStatus};
use crate::store::Store;

#[derive(Clone, Debug)]
pub enum ApprovalOutcome {
    Approved(Option<String>),
    Rejected(Option<String>),
}

/// Creates approval requests, blocks the executing step until the operator
/// decides, unblocks on decision or timeout.
pub struct ApprovalService {
    store: Store,
    events: Arc<EventBus>,
    exchanges: Arc<ExchangeStateManager>,
    waiters: Mutex<FxHashMap<String, oneshot::Sender<ApprovalOutcome>>>,
    engine: OnceLock<Weak<RouteEngine>>,
}

impl ApprovalService {
    pub fn new(store: Store, events: Arc<EventBus>, exchanges: Arc<ExchangeStateManager>) -> Self {
        Self {
            store,
            events,
            exchanges,
            waiters: Mutex::new(FxHashMap::default()),
            engine: OnceLock::new(),
        }
    }

    /// Set once, after `RouteEngine` is constructed, so a decision that
    /// lands on an approval with no live in-process waiter (a non-blocking
    /// gate, or a blocking gate recovered after a crash) can resubmit the
    /// worker itself instead of depending on a periodic tick to notice.
    pub fn set_engine(&self, engine: &Arc<RouteEngine>) {
        let _ = self.engine.set(Arc::downgrade(engine));
    }

    fn resubmit(&self, exchange_id: &str) {
        match self.engine.get().and_then(Weak::upgrade) {
            Some(engine) => engine.submit(exchange_id.to_string()),
            None => tracing::warn!(exchange_id, "no route engine attached, cannot resubmit"),
        }
    }

    /// Blocking variant: suspends the caller until the operator approves,
    /// rejects, or `timeout` elapses. A recovered exchange re-entering an
    /// already-pending gate attaches to the existing row instead of creating
    /// a duplicate, honoring "at most one PENDING approval per exchange". If
    /// the gate was already decided before this call (the decision landed
    /// while no worker was attached), the prior decision is returned
    /// immediately instead of opening a second gate.
    #[instrument(skip(self, payload), err)]
    pub async fn request_approval(
        &self,
        exchange_id: &str,
        route_id: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let row = self.open_gate(exchange_id, route_id, payload).await?;
        if let Some(outcome) = decided_outcome(&row) {
            return match outcome {
                ApprovalOutcome::Approved(response) => Ok(response),
                ApprovalOutcome::Rejected(reason) => Err(EngineError::ApprovalRejected {
                    reason: reason.unwrap_or_default(),
                }),
            };
        }
        let approval_id = row.id;

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(approval_id.clone(), tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ApprovalOutcome::Approved(response))) => Ok(response),
            Ok(Ok(ApprovalOutcome::Rejected(reason))) => Err(EngineError::ApprovalRejected {
                reason: reason.unwrap_or_default(),
            }),
            Ok(Err(_)) | Err(_) => {
                self.waiters.lock().await.remove(&approval_id);
                self.store
                    .complete_approval(
                        &approval_id,
                        ApprovalStatus::Rejected,
                        Some("Approval timed out"),
                    )
                    .await?;
                self.events.publish(
                    Event::new(EventType::ApprovalRejected, route_id)
                        .with_exchange(exchange_id)
                        .with_data("approvalId", &approval_id)
                        .with_data("reason", "Approval timed out"),
                );
                Err(EngineError::ApprovalTimeout)
            }
        }
    }

    /// Non-blocking variant: opens the gate and returns immediately unless
    /// the gate was already decided (a recovered worker re-entering it after
    /// the operator's call landed), in which case the decision is returned
    /// directly so the caller can resume instead of suspending again.
    #[instrument(skip(self, payload), err)]
    pub async fn create_approval_request(
        &self,
        exchange_id: &str,
        route_id: &str,
        payload: &str,
    ) -> Result<Option<ApprovalOutcome>> {
        let row = self.open_gate(exchange_id, route_id, payload).await?;
        Ok(decided_outcome(&row))
    }

    /// Reuses the exchange's one approval row across re-entry instead of
    /// opening a second gate, honoring "at most one approval per exchange"
    /// whether the existing row is still pending or was already decided.
    async fn open_gate(&self, exchange_id: &str, route_id: &str, payload: &str) -> Result<ApprovalRow> {
        let row = match self.store.get_approval_by_exchange(exchange_id).await? {
            Some(row) => row,
            None => {
                let id = self
                    .store
                    .insert_approval(exchange_id, route_id, payload)
                    .await?;
                self.exchanges.enter_waiting_approval(exchange_id).await?;
                self.store
                    .get_approval(&id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(format!("approval {id}")))?
            }
        };
        if row.status == ApprovalStatus::Pending.as_str() {
            self.events.publish(
                Event::new(EventType::ApprovalRequested, route_id)
                    .with_exchange(exchange_id)
                    .with_data("approvalId", &row.id),
            );
        }
        Ok(row)
    }

    #[instrument(skip(self, response), err)]
    pub async fn approve(&self, approval_id: &str, response: Option<String>) -> Result<()> {
        let row = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("approval {approval_id}")))?;
        if row.status != ApprovalStatus::Pending.as_str() {
            return Err(EngineError::invalid_state("approval is not pending"));
        }

        let committed = self
            .store
            .complete_approval(approval_id, ApprovalStatus::Approved, response.as_deref())
            .await?;
        if !committed {
            return Err(EngineError::invalid_state("approval is not pending"));
        }
        self.exchanges.resume_after_approval(&row.exchange_id).await?;

        // Signaling only after both commits above is what lets the executor
        // safely re-read RUNNING the moment it wakes. If nothing was
        // listening (a non-blocking gate, or a blocking gate whose worker
        // never made it back after a crash), resubmit the worker directly
        // instead of waiting on a periodic tick to notice.
        let delivered = match self.waiters.lock().await.remove(approval_id) {
            Some(tx) => tx.send(ApprovalOutcome::Approved(response)).is_ok(),
            None => false,
        };
        if !delivered {
            self.resubmit(&row.exchange_id);
        }
        self.events.publish(
            Event::new(EventType::ApprovalGranted, &row.route_id)
                .with_exchange(&row.exchange_id)
                .with_data("approvalId", approval_id),
        );
        Ok(())
    }

    #[instrument(skip(self, reason), err)]
    pub async fn reject(&self, approval_id: &str, reason: Option<String>) -> Result<()> {
        let row = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("approval {approval_id}")))?;
        if row.status != ApprovalStatus::Pending.as_str() {
            return Err(EngineError::invalid_state("approval is not pending"));
        }

        let committed = self
            .store
            .complete_approval(approval_id, ApprovalStatus::Rejected, reason.as_deref())
            .await?;
        if !committed {
            return Err(EngineError::invalid_state("approval is not pending"));
        }
        // Unlike approve(), rejection never needs to resubmit a worker: the
        // exchange goes straight to FAILED, a terminal state with no further
        // steps to run.
        let reason_text = reason.clone().unwrap_or_default();
        self.exchanges
            .fail(
                &row.exchange_id,
                &format!("Approval rejected: {reason_text}"),
            )
            .await?;

        if let Some(tx) = self.waiters.lock().await.remove(approval_id) {
            let _ = tx.send(ApprovalOutcome::Rejected(reason));
        }
        self.events.publish(
            Event::new(EventType::ApprovalRejected, &row.route_id)
                .with_exchange(&row.exchange_id)
                .with_data("approvalId", approval_id),
        );
        Ok(())
    }

    /// On startup, reinstall a waiter slot for every still-PENDING approval
    /// so a later `approve`/`reject` always finds a sender to complete, even
    /// before any executor has re-attached to it. `request_approval`
    /// replaces this placeholder with its own receiver when a recovered
    /// exchange re-enters the gate.
    #[instrument(skip(self), err)]
    pub async fn restore_pending_approvals(&self) -> Result<()> {
        let pending = self.store.list_pending_approvals().await?;
        let mut waiters = self.waiters.lock().await;
        for row in pending {
            waiters.entry(row.id).or_insert_with(|| {
                let (tx, _rx) = oneshot::channel();
                tx
            });
        }
        Ok(())
    }
}

/// `None` while `row` is still pending; otherwise the decision already
/// recorded against it, for a caller re-entering an already-decided gate.
fn decided_outcome(row: &ApprovalRow) -> Option<ApprovalOutcome> {
    if row.status == ApprovalStatus::Approved.as_str() {
        Some(ApprovalOutcome::Approved(row.response.clone()))
    } else if row.status == ApprovalStatus::Rejected.as_str() {
        Some(ApprovalOutcome::Rejected(row.response.clone()))
    } else {
        None
    }
}
