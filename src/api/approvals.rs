use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::EngineError;
use crate::store::models::ApprovalRow;

use super::AppState;
use super::error::{ApiError, ApiResult};

pub async fn list_pending(State(state): State<AppState>) -> ApiResult<Json<Vec<ApprovalRow>>> {
    Ok(Json(state.store.list_pending_approvals().await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalRow>> {
    state
        .store
        .get_approval(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(EngineError::not_found(format!("approval {id}"))))
}

pub async fn get_by_exchange(
    State(state): State<AppState>,
    Path(exchange_id): Path<String>,
) -> ApiResult<Json<ApprovalRow>> {
    state
        .store
        .get_approval_by_exchange(&exchange_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError(EngineError::not_found(format!(
                "approval for exchange {exchange_id}"
            )))
        })
}

#[derive(Deserialize, Default)]
pub struct ApproveRequest {
    pub response: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ApproveRequest>>,
) -> ApiResult<StatusCode> {
    let response = body.and_then(|b| b.0.response);
    state.approvals.approve(&id, response).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<StatusCode> {
    let reason = body.and_then(|b| b.0.reason);
    state.approvals.reject(&id, reason).await?;
    Ok(StatusCode::OK)
}
