use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::exchange::ExchangeState;

use super::AppState;
use super::error::{ApiError, ApiResult};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeRequest {
    pub route_id: String,
    pub payload: String,
    #[serde(default)]
    pub headers: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeResponse {
    pub exchange_id: String,
    pub route_id: String,
    pub message: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateExchangeRequest>,
) -> ApiResult<(StatusCode, Json<CreateExchangeResponse>)> {
    if !state.engine.has_route(&body.route_id) {
        return Err(ApiError(EngineError::bad_input(format!(
            "unknown route {}",
            body.route_id
        ))));
    }
    let context = body
        .headers
        .map(|h| h.to_string())
        .unwrap_or_else(|| "{}".to_string());
    let exchange = state
        .exchanges
        .create_exchange(&body.route_id, &body.payload, &context)
        .await?;
    state.engine.submit(exchange.exchange_id.clone());
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateExchangeResponse {
            exchange_id: exchange.exchange_id,
            route_id: exchange.route_id,
            message: "execution started".to_string(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(rename = "routeId")]
    pub route_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExchangesResponse {
    pub exchanges: Vec<ExchangeState>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<ListExchangesResponse>> {
    if let Some(status) = &q.status {
        if crate::store::models::ExchangeStatus::parse(status).is_none() {
            return Err(ApiError(EngineError::bad_input(format!(
                "unknown status filter {status}"
            ))));
        }
    }
    let limit = q.limit.unwrap_or(100);
    let offset = q.offset.unwrap_or(0);
    let (exchanges, total) = state
        .exchanges
        .list(q.status.as_deref(), q.route_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(ListExchangesResponse {
        exchanges,
        total,
        limit,
        offset,
    }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExchangeState>> {
    Ok(Json(state.exchanges.get(&id).await?))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.exchanges.pause(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.exchanges.resume(&id).await?;
    state.engine.submit(id);
    Ok(StatusCode::OK)
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.exchanges.cancel(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<crate::store::models::CheckpointRow>>> {
    Ok(Json(state.store.list_checkpoints(&id).await?))
}
