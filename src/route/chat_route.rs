//! The two routes the engine ships with: the canonical durable chat route,
//! and a trivial echo route used only to smoke-test the engine without an
//! LLM. The echo route carries no durability guarantees of its own.

use crate::error::EngineError;

use super::step::{Step, StepAction, StepContext};

pub const CHAT_DURABLE_ROUTE: &str = "chat-durable";
pub const DEMO_ECHO_ROUTE: &str = "demo-echo";

pub fn chat_durable_route() -> Vec<Step> {
    vec![
        Step::new("validate-input", StepAction::Compute(validate_input)),
        Step::new("log-request", StepAction::AuditLog(render_log_request)),
        Step::new("before-approval", StepAction::Compute(mark_before_approval)),
        Step::new(
            "approval-gate",
            StepAction::ApprovalGate { blocking: true },
        ),
        Step::new("after-approval", StepAction::Compute(mark_after_approval)),
        Step::new("call-llm", StepAction::LlmCall),
        Step::new("process-response", StepAction::Compute(process_response)),
        Step::new("update-metrics", StepAction::MetricUpdate),
    ]
}

pub fn demo_echo_route() -> Vec<Step> {
    vec![
        Step::new("validate-input", StepAction::Compute(validate_input)),
        Step::new("echo", StepAction::Compute(echo)),
    ]
}

fn validate_input(ctx: &mut StepContext) -> crate::error::Result<()> {
    let payload = ctx.get_str("payload").unwrap_or_default();
    if payload.is_empty() {
        return Err(EngineError::bad_input("payload must not be empty"));
    }
    if payload.chars().count() > ctx.max_payload_len {
        return Err(EngineError::bad_input(format!(
            "payload exceeds maximum length of {} characters",
            ctx.max_payload_len
        )));
    }
    Ok(())
}

fn render_log_request(ctx: &StepContext) -> String {
    format!(
        "exchange {} received on route {}",
        ctx.exchange_id, ctx.route_id
    )
}

fn mark_before_approval(ctx: &mut StepContext) -> crate::error::Result<()> {
    ctx.set_str("approvalStage", "pending");
    Ok(())
}

fn mark_after_approval(ctx: &mut StepContext) -> crate::error::Result<()> {
    ctx.set_str("approvalStage", "resolved");
    Ok(())
}

fn process_response(ctx: &mut StepContext) -> crate::error::Result<()> {
    let reply = ctx.get_str("llmResponse").unwrap_or_default().to_string();
    ctx.set_str("result", reply);
    Ok(())
}

fn echo(ctx: &mut StepContext) -> crate::error::Result<()> {
    let payload = ctx.get_str("payload").unwrap_or_default().to_string();
    ctx.set_str("result", payload);
    Ok(())
}
