//! REST surface: exchange CRUD/control, approval decisions, SSE stream,
//! metrics/log read APIs.

pub mod approvals;
pub mod error;
pub mod events;
pub mod exchanges;
pub mod routes;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::approval::ApprovalService;
use crate::config::EngineConfig;
use crate::event_bus::EventBus;
use crate::exchange::ExchangeStateManager;
use crate::route::RouteEngine;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub exchanges: Arc<ExchangeStateManager>,
    pub approvals: Arc<ApprovalService>,
    pub engine: Arc<RouteEngine>,
    pub events: Arc<EventBus>,
    pub store: Store,
    pub config: EngineConfig,
    pub sse_clients: Arc<AtomicUsize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/exchanges",
            post(exchanges::create).get(exchanges::list),
        )
        .route("/api/exchanges/:id", get(exchanges::get_one))
        .route("/api/exchanges/:id/pause", post(exchanges::pause))
        .route("/api/exchanges/:id/resume", post(exchanges::resume))
        .route("/api/exchanges/:id/cancel", post(exchanges::cancel))
        .route(
            "/api/exchanges/:id/checkpoints",
            get(exchanges::checkpoints),
        )
        .route("/api/approvals", get(approvals::list_pending))
        .route("/api/approvals/:id", get(approvals::get_one))
        .route(
            "/api/approvals/by-exchange/:exchange_id",
            get(approvals::get_by_exchange),
        )
        .route("/api/approvals/:id/approve", post(approvals::approve))
        .route("/api/approvals/:id/reject", post(approvals::reject))
        .route("/api/routes", get(routes::list))
        .route("/api/routes/metrics", get(routes::all_metrics))
        .route("/api/routes/recovery-stats", get(routes::recovery_stats))
        .route(
            "/api/routes/logs/exchange/:exchange_id",
            get(routes::logs_for_exchange),
        )
        .route("/api/routes/:id/status", get(routes::status))
        .route("/api/routes/:id/metrics", get(routes::metrics))
        .route("/api/routes/:id/logs", get(routes::logs))
        .route("/api/events/stream", get(events::stream))
        .route("/api/events/health", get(events::health))
        .route("/api/events/clients/count", get(events::client_count))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    max_payload_len: usize,
    default_approval_timeout_secs: u64,
}

async fn healthz(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    let db_ok = state.store.ping().await;
    let body = HealthResponse {
        status: if db_ok { "ok" } else { "db unreachable" },
        max_payload_len: state.config.max_payload_len,
        default_approval_timeout_secs: state.config.default_approval_timeout.as_secs(),
    };
    let code = if db_ok {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (code, axum::Json(body))
}
