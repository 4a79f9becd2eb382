use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tracing_subscriber::EnvFilter;

use waygate::api::{self, AppState};
use waygate::approval::ApprovalService;
use waygate::config::EngineConfig;
use waygate::event_bus::EventBus;
use waygate::exchange::ExchangeStateManager;
use waygate::llm::{ChatClient, GeminiClient};
use waygate::recovery::CrashRecoveryService;
use waygate::route::RouteEngine;
use waygate::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env();

    let store = Store::connect(&config.sqlite_url()).await?;
    let events = Arc::new(EventBus::new());
    let exchanges = Arc::new(ExchangeStateManager::new(store.clone(), Arc::clone(&events)));
    let approvals = Arc::new(ApprovalService::new(
        store.clone(),
        Arc::clone(&events),
        Arc::clone(&exchanges),
    ));
    let llm: Arc<dyn ChatClient> = Arc::new(GeminiClient::new(&config.llm));
    let engine = Arc::new(RouteEngine::new(
        Arc::clone(&exchanges),
        Arc::clone(&approvals),
        llm,
        config.clone(),
    ));
    approvals.set_engine(&engine);
    let recovery = Arc::new(CrashRecoveryService::new(
        Arc::clone(&exchanges),
        Arc::clone(&approvals),
        Arc::clone(&engine),
        config.recovery.clone(),
    ));

    recovery.on_startup().await?;
    recovery.spawn_tickers();

    let state = AppState {
        exchanges,
        approvals,
        engine,
        events,
        store,
        config: config.clone(),
        sse_clients: Arc::new(AtomicUsize::new(0)),
    };

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "waygate listening");
    axum::serve(listener, router).await?;

    Ok(())
}
