//! Executes routes step-by-step, calling the state manager before/after
//! each step, honoring pause/cancel, invoking the approval gate, invoking
//! the LLM.
//!
//! Walks a fixed `Vec<Step>` rather than a graph frontier, since routes are
//! declared sequences, not DAGs.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::approval::{ApprovalOutcome, ApprovalService};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::exchange::ExchangeStateManager;
use crate::llm::{ChatClient, ChatMessage};
use crate::store::Store;

use super::step::{RouteDefinition, Step, StepAction, StepContext};

const STEP_RETRIES: u32 = 3;
const STEP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What running one step produced.
enum StepOutcome {
    /// The step finished; checkpoint it with the given summary, if any.
    Done(Option<String>),
    /// A non-blocking approval gate opened; stop the worker cleanly without
    /// checkpointing or failing — the exchange is already WAITING_APPROVAL.
    Suspended,
}

pub struct RouteEngine {
    routes: FxHashMap<String, RouteDefinition>,
    exchanges: Arc<ExchangeStateManager>,
    approvals: Arc<ApprovalService>,
    llm: Arc<dyn ChatClient>,
    config: EngineConfig,
}

impl RouteEngine {
    pub fn new(
        exchanges: Arc<ExchangeStateManager>,
        approvals: Arc<ApprovalService>,
        llm: Arc<dyn ChatClient>,
        config: EngineConfig,
    ) -> Self {
        let mut routes = FxHashMap::default();
        routes.insert(
            super::chat_route::CHAT_DURABLE_ROUTE.to_string(),
            super::chat_route::chat_durable_route(),
        );
        routes.insert(
            super::chat_route::DEMO_ECHO_ROUTE.to_string(),
            super::chat_route::demo_echo_route(),
        );
        Self {
            routes,
            exchanges,
            approvals,
            llm,
            config,
        }
    }

    pub fn route_ids(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn has_route(&self, route_id: &str) -> bool {
        self.routes.contains_key(route_id)
    }

    fn store(&self) -> &Store {
        self.exchanges.store()
    }

    /// Fire-and-forget submission. Errors inside the route never propagate
    /// to the caller — the exchange transitions to FAILED instead, and the
    /// caller already got its 202 at creation time.
    pub fn submit(self: &Arc<Self>, exchange_id: String) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.run_to_completion(&exchange_id).await {
                tracing::warn!(exchange_id = %exchange_id, error = %err, "route execution ended with error");
            }
        });
    }

    #[instrument(skip(self), err)]
    async fn run_to_completion(&self, exchange_id: &str) -> Result<()> {
        let guard = self.exchanges.guard_for(exchange_id);
        let _permit = guard.lock().await;

        let state = self.exchanges.get(exchange_id).await?;
        let route_id = state.route_id.clone();
        let steps = self
            .routes
            .get(&route_id)
            .ok_or_else(|| EngineError::bad_input(format!("unknown route {route_id}")))?;

        if matches!(state.status, crate::exchange::ExchangeStatus::Pending) {
            self.exchanges.start(exchange_id).await?;
        }

        let mut ctx = StepContext::new(
            exchange_id.to_string(),
            route_id.clone(),
            &state.payload,
            self.config.max_payload_len,
        );

        for (index, step) in steps.iter().enumerate() {
            if !self.exchanges.should_continue(exchange_id).await? {
                return Ok(());
            }

            let existing = self.store().get_checkpoint_by_name(exchange_id, step.name).await?;
            if let Some(checkpoint) = existing {
                // Already done: for side-effectful steps, reuse the prior
                // output instead of re-invoking the external call.
                if matches!(step.action, StepAction::LlmCall) {
                    if let Some(data) = checkpoint.step_data {
                        ctx.set_str("llmResponse", data);
                    }
                }
                continue;
            }

            match self.run_step(step, &mut ctx).await {
                Ok(StepOutcome::Done(step_data)) => {
                    self.exchanges
                        .checkpoint(
                            exchange_id,
                            &route_id,
                            index as i64,
                            step.name,
                            step_data.as_deref(),
                        )
                        .await?;
                }
                Ok(StepOutcome::Suspended) => return Ok(()),
                Err(err) => {
                    self.store().record_route_outcome(&route_id, false).await?;
                    self.exchanges.fail(exchange_id, &err.to_string()).await?;
                    return Err(err);
                }
            }
        }

        self.exchanges.complete(exchange_id, &ctx.to_json_string()).await?;
        Ok(())
    }

    /// Runs one step, retrying up to 3x with a ~1s delay on error — except
    /// approval gates, whose rejection/timeout is control flow, not a
    /// transient fault, and is never retried.
    async fn run_step(&self, step: &Step, ctx: &mut StepContext) -> Result<StepOutcome> {
        if let StepAction::ApprovalGate { blocking } = step.action {
            return self.run_approval_gate(ctx, blocking).await;
        }

        let mut attempt = 0;
        loop {
            match self.run_step_once(step, ctx).await {
                Ok(data) => return Ok(StepOutcome::Done(data)),
                Err(err) if attempt < STEP_RETRIES => {
                    attempt += 1;
                    tracing::warn!(step = step.name, attempt, error = %err, "step failed, retrying");
                    tokio::time::sleep(STEP_RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_step_once(&self, step: &Step, ctx: &mut StepContext) -> Result<Option<String>> {
        match &step.action {
            StepAction::Compute(f) => {
                f(ctx)?;
                Ok(None)
            }
            StepAction::AuditLog(render) => {
                let message = render(ctx);
                self.store()
                    .insert_route_log(&ctx.exchange_id, &ctx.route_id, Some(step.name), "info", &message)
                    .await?;
                Ok(Some(message))
            }
            StepAction::LlmCall => {
                let prompt = ctx.get_str("payload").unwrap_or_default().to_string();
                let reply = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
                ctx.set_str("llmResponse", reply.content.clone());
                Ok(Some(reply.content))
            }
            StepAction::MetricUpdate => {
                self.store().record_route_outcome(&ctx.route_id, true).await?;
                Ok(None)
            }
            StepAction::ApprovalGate { .. } => unreachable!("handled in run_step"),
        }
    }

    async fn run_approval_gate(
        &self,
        ctx: &mut StepContext,
        blocking: bool,
    ) -> Result<StepOutcome> {
        let payload = ctx.to_json_string();
        if blocking {
            let response = self
                .approvals
                .request_approval(
                    &ctx.exchange_id,
                    &ctx.route_id,
                    &payload,
                    self.config.default_approval_timeout,
                )
                .await?;
            if let Some(resp) = &response {
                ctx.set_str("approvalResponse", resp.clone());
            }
            Ok(StepOutcome::Done(response))
        } else {
            match self
                .approvals
                .create_approval_request(&ctx.exchange_id, &ctx.route_id, &payload)
                .await?
            {
                // Gate freshly opened or still pending: suspend cleanly.
                None => Ok(StepOutcome::Suspended),
                // The decision already landed before this re-entry (a
                // recovered worker catching up to an approval the operator
                // decided while it wasn't attached) — resume instead of
                // suspending again.
                Some(ApprovalOutcome::Approved(response)) => {
                    if let Some(resp) = &response {
                        ctx.set_str("approvalResponse", resp.clone());
                    }
                    Ok(StepOutcome::Done(response))
                }
                Some(ApprovalOutcome::Rejected(reason)) => Err(EngineError::ApprovalRejected {
                    reason: reason.unwrap_or_default(),
                }),
            }
        }
    }
}
