use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use crate::store::models::{RouteLogRow, RouteMetricRow};

use super::AppState;
use super::error::ApiResult;

#[derive(Serialize)]
pub struct RouteListResponse {
    pub routes: Vec<String>,
}

pub async fn list(State(state): State<AppState>) -> Json<RouteListResponse> {
    Json(RouteListResponse {
        routes: state.engine.route_ids(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatusResponse {
    pub route_id: String,
    pub registered: bool,
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<RouteStatusResponse> {
    Json(RouteStatusResponse {
        registered: state.engine.has_route(&id),
        route_id: id,
    })
}

pub async fn metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Option<RouteMetricRow>>> {
    Ok(Json(state.store.get_route_metric(&id).await?))
}

pub async fn all_metrics(State(state): State<AppState>) -> ApiResult<Json<Vec<RouteMetricRow>>> {
    Ok(Json(state.store.list_route_metrics().await?))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RouteLogRow>>> {
    Ok(Json(state.store.list_logs_for_route(&id).await?))
}

pub async fn logs_for_exchange(
    State(state): State<AppState>,
    Path(exchange_id): Path<String>,
) -> ApiResult<Json<Vec<RouteLogRow>>> {
    Ok(Json(state.store.list_logs_for_exchange(&exchange_id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatsResponse {
    pub running: i64,
    pub waiting_approval: i64,
    pub pending_approvals: i64,
}

pub async fn recovery_stats(State(state): State<AppState>) -> ApiResult<Json<RecoveryStatsResponse>> {
    let (running, _) = state.exchanges.list(Some("RUNNING"), None, i64::MAX, 0).await?;
    let (waiting, _) = state
        .exchanges
        .list(Some("WAITING_APPROVAL"), None, i64::MAX, 0)
        .await?;
    let pending = state.store.list_pending_approvals().await?;
    Ok(Json(RecoveryStatsResponse {
        running: running.len() as i64,
        waiting_approval: waiting.len() as i64,
        pending_approvals: pending.len() as i64,
    }))
}
