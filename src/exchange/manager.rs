//! Owns the exchange lifecycle state machine and the idempotent checkpoint
//! log.
//!
//! Many persisted exchanges run concurrently, each guarded by its own lock
//! rather than one process-wide mutex.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::event_bus::{Event, EventBus, EventType};
use crate::exchange::state::{ExchangeState, ExchangeStatus};
use crate::store::Store;

/// Per-exchange execution guard, acquired for the duration of one
/// `run_to_completion` call so unrelated exchanges proceed concurrently
/// while a given exchange is processed by at most one worker at a time.
pub struct ExchangeStateManager {
    store: Store,
    events: Arc<EventBus>,
    guards: parking_lot::Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ExchangeStateManager {
    pub fn new(store: Store, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            guards: parking_lot::Mutex::new(FxHashMap::default()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the execution guard for `exchange_id`, creating it if this is
    /// the exchange's first worker.
    pub fn guard_for(&self, exchange_id: &str) -> Arc<AsyncMutex<()>> {
        self.guards
            .lock()
            .entry(exchange_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[instrument(skip(self, payload, context), err)]
    pub async fn create_exchange(
        &self,
        route_id: &str,
        payload: &str,
        context: &str,
    ) -> Result<ExchangeState> {
        let exchange_id = Uuid::new_v4().to_string();
        self.store
            .insert_exchange(&exchange_id, route_id, payload, context)
            .await?;
        self.events.publish(
            Event::new(EventType::ExchangeCreated, route_id).with_exchange(&exchange_id),
        );
        self.get(&exchange_id).await
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, exchange_id: &str) -> Result<ExchangeState> {
        self.store
            .get_exchange(exchange_id)
            .await?
            .map(ExchangeState::from)
            .ok_or_else(|| EngineError::not_found(format!("exchange {exchange_id}")))
    }

    pub async fn list(
        &self,
        status: Option<&str>,
        route_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExchangeState>, i64)> {
        let (rows, total) = self
            .store
            .list_exchanges(status, route_id, limit, offset)
            .await?;
        Ok((rows.into_iter().map(ExchangeState::from).collect(), total))
    }

    /// True iff the exchange's current status is RUNNING or WAITING_APPROVAL.
    /// The engine consults this before every step.
    #[instrument(skip(self), err)]
    pub async fn should_continue(&self, exchange_id: &str) -> Result<bool> {
        let state = self.get(exchange_id).await?;
        Ok(matches!(
            state.status,
            ExchangeStatus::Running | ExchangeStatus::WaitingApproval
        ))
    }

    async fn transition(
        &self,
        exchange_id: &str,
        allowed_from: &[ExchangeStatus],
        to: ExchangeStatus,
        set_started: bool,
        set_completed: bool,
        event: EventType,
    ) -> Result<()> {
        let state = self.get(exchange_id).await?;
        if !allowed_from.contains(&state.status) {
            return Err(EngineError::invalid_state(format!(
                "cannot transition exchange {exchange_id} from {:?} to {:?}",
                state.status, to
            )));
        }
        self.store
            .update_exchange_status(exchange_id, to.as_str(), set_started, set_completed)
            .await?;
        self.events
            .publish(Event::new(event, &state.route_id).with_exchange(exchange_id));
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn start(&self, exchange_id: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[ExchangeStatus::Pending],
            ExchangeStatus::Running,
            true,
            false,
            EventType::ExchangeStarted,
        )
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn pause(&self, exchange_id: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[ExchangeStatus::Running],
            ExchangeStatus::Paused,
            false,
            false,
            EventType::ExchangePaused,
        )
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn resume(&self, exchange_id: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[ExchangeStatus::Paused],
            ExchangeStatus::Running,
            false,
            false,
            EventType::ExchangeResumed,
        )
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn cancel(&self, exchange_id: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[
                ExchangeStatus::Running,
                ExchangeStatus::Paused,
                ExchangeStatus::WaitingApproval,
            ],
            ExchangeStatus::Cancelled,
            false,
            true,
            EventType::ExchangeCancelled,
        )
        .await
    }

    #[instrument(skip(self, context), err)]
    pub async fn complete(&self, exchange_id: &str, context: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[ExchangeStatus::Running],
            ExchangeStatus::Completed,
            false,
            true,
            EventType::ExchangeCompleted,
        )
        .await?;
        self.store.set_exchange_context(exchange_id, context).await?;
        Ok(())
    }

    /// Fails a non-terminal exchange. Unlike the other transitions, any
    /// non-terminal status is a legal source.
    #[instrument(skip(self, reason), err)]
    pub async fn fail(&self, exchange_id: &str, reason: &str) -> Result<()> {
        let state = self.get(exchange_id).await?;
        if state.status.is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "exchange {exchange_id} is already terminal ({:?})",
                state.status
            )));
        }
        self.store
            .update_exchange_status(exchange_id, ExchangeStatus::Failed.as_str(), false, true)
            .await?;
        self.store.set_exchange_context(exchange_id, reason).await?;
        self.events.publish(
            Event::new(EventType::ExchangeFailed, &state.route_id)
                .with_exchange(exchange_id)
                .with_data("reason", reason),
        );
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn enter_waiting_approval(&self, exchange_id: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[ExchangeStatus::Running],
            ExchangeStatus::WaitingApproval,
            false,
            false,
            EventType::WaitingApproval,
        )
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn resume_after_approval(&self, exchange_id: &str) -> Result<()> {
        self.transition(
            exchange_id,
            &[ExchangeStatus::WaitingApproval],
            ExchangeStatus::Running,
            false,
            false,
            EventType::ExchangeResumed,
        )
        .await
    }

    pub fn mark_recovering(&self, route_id: &str, exchange_id: &str) {
        self.events.publish(
            Event::new(EventType::ExchangeRecovering, route_id).with_exchange(exchange_id),
        );
    }

    pub fn mark_stalled(&self, route_id: &str, exchange_id: &str) {
        self.events
            .publish(Event::new(EventType::ExchangeStalled, route_id).with_exchange(exchange_id));
    }

    /// `checkpoint(exchangeId, stepIndex, stepName, stepData?) → created`.
    /// Returns `false` without mutating `currentStep`/`lastCheckpoint` if the
    /// step was already recorded; bounded busy-retry happens inside the
    /// store.
    #[instrument(skip(self, step_data), err)]
    pub async fn checkpoint(
        &self,
        exchange_id: &str,
        route_id: &str,
        step_index: i64,
        step_name: &str,
        step_data: Option<&str>,
    ) -> Result<bool> {
        let created = self
            .store
            .checkpoint_insert(exchange_id, step_index, step_name, step_data)
            .await?;
        if created {
            self.events.publish(
                Event::new(EventType::Checkpoint, route_id)
                    .with_exchange(exchange_id)
                    .with_data("stepName", step_name)
                    .with_data("stepIndex", step_index.to_string()),
            );
        }
        Ok(created)
    }
}
