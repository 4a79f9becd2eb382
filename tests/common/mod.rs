#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use waygate::approval::ApprovalService;
use waygate::config::{EngineConfig, LlmConfig, RecoveryTickConfig};
use waygate::error::Result;
use waygate::event_bus::EventBus;
use waygate::exchange::ExchangeStateManager;
use waygate::llm::{ChatClient, ChatMessage, ChatReply};
use waygate::recovery::CrashRecoveryService;
use waygate::route::RouteEngine;
use waygate::store::Store;

pub struct Harness {
    pub store: Store,
    pub events: Arc<EventBus>,
    pub exchanges: Arc<ExchangeStateManager>,
    pub approvals: Arc<ApprovalService>,
    pub engine: Arc<RouteEngine>,
    pub recovery: Arc<CrashRecoveryService>,
    pub url: String,
    pub db_path: std::path::PathBuf,
    _tempdir: tempfile::TempDir,
}

/// One fully-wired set of in-process services pointed at a given sqlite
/// file. Building a second `Stack` against the same file simulates a
/// process restart: a fresh `EventBus`/`ApprovalService`/`RouteEngine` with
/// no in-memory state, but the same durable rows underneath.
pub struct Stack {
    pub store: Store,
    pub events: Arc<EventBus>,
    pub exchanges: Arc<ExchangeStateManager>,
    pub approvals: Arc<ApprovalService>,
    pub engine: Arc<RouteEngine>,
    pub recovery: Arc<CrashRecoveryService>,
}

pub async fn build_stack(url: &str, llm: Arc<dyn ChatClient>, config: EngineConfig) -> Stack {
    let store = Store::connect(url).await.expect("connect store");
    let events = Arc::new(EventBus::new());
    let exchanges = Arc::new(ExchangeStateManager::new(store.clone(), Arc::clone(&events)));
    let approvals = Arc::new(ApprovalService::new(
        store.clone(),
        Arc::clone(&events),
        Arc::clone(&exchanges),
    ));
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

    Stack {
        store,
        events,
        exchanges,
        approvals,
        engine,
        recovery,
    }
}

/// Echoes the last user message back with a fixed prefix, counting calls so
/// tests can assert the LLM was invoked exactly once despite checkpoint
/// replays during recovery.
#[derive(Default)]
pub struct FakeLlm {
    pub calls: AtomicU32,
}

#[async_trait]
impl ChatClient for FakeLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ChatReply {
            content: format!("echo: {last}"),
        })
    }
}

/// Like `FakeLlm`, but sleeps before replying so a test gets a window to
/// observe the exchange mid-step (e.g. to pause it) before it completes.
#[derive(Default)]
pub struct SlowLlm {
    pub calls: AtomicU32,
    pub delay: Duration,
}

impl SlowLlm {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay,
        }
    }
}

#[async_trait]
impl ChatClient for SlowLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ChatReply {
            content: format!("echo: {last}"),
        })
    }
}

pub fn test_config(db_path: &std::path::Path, approval_timeout: Duration) -> EngineConfig {
    EngineConfig {
        sqlite_db_name: db_path.display().to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        max_payload_len: 50_000,
        default_approval_timeout: approval_timeout,
        llm: LlmConfig {
            api_key: "test-key".to_string(),
            model_name: "test-model".to_string(),
            temperature: 0.0,
        },
        recovery: RecoveryTickConfig::default(),
    }
}

pub async fn harness_with(llm: Arc<dyn ChatClient>, approval_timeout: Duration) -> Harness {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let db_path = tempdir.path().join("waygate-test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let config = test_config(&db_path, approval_timeout);

    let stack = build_stack(&url, llm, config).await;

    Harness {
        store: stack.store,
        events: stack.events,
        exchanges: stack.exchanges,
        approvals: stack.approvals,
        engine: stack.engine,
        recovery: stack.recovery,
        url,
        db_path,
        _tempdir: tempdir,
    }
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(FakeLlm::default()), Duration::from_secs(5)).await
}

pub fn app_state(h: &Harness) -> waygate::api::AppState {
    waygate::api::AppState {
        exchanges: h.exchanges.clone(),
        approvals: h.approvals.clone(),
        engine: h.engine.clone(),
        events: h.events.clone(),
        store: h.store.clone(),
        config: test_config(&h.db_path, Duration::from_secs(5)),
        sse_clients: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
    }
}

pub fn router_for(h: &Harness) -> axum::Router {
    waygate::api::router(app_state(h))
}

/// Polls `exchanges.get` until the predicate holds or the deadline passes,
/// returning the last observed state. Async route execution runs on a spawned
/// task, so tests can't just read state synchronously after `submit`.
pub async fn wait_for<F>(
    exchanges: &ExchangeStateManager,
    exchange_id: &str,
    mut pred: F,
) -> waygate::exchange::ExchangeState
where
    F: FnMut(&waygate::exchange::ExchangeState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let state = exchanges.get(exchange_id).await.expect("exchange exists");
        if pred(&state) || tokio::time::Instant::now() >= deadline {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
