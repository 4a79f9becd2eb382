//! Server-Sent Events stream: an `async_stream::stream!` generator
//! forwarding a per-client channel sink into `axum::response::sse::Sse`.

use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::Stream;
use serde_json::json;
use uuid::Uuid;

use crate::event_bus::ChannelSink;

use super::AppState;

pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let client_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state
        .events
        .register(Arc::new(ChannelSink::new(format!("sse:{client_id}"), tx)));
    state.sse_clients.fetch_add(1, Ordering::SeqCst);

    let sse_clients = Arc::clone(&state.sse_clients);
    let stream = async_stream::stream! {
        let connected = SseEvent::default()
            .event("connected")
            .json_data(json!({ "message": "connected", "clientId": client_id }))
            .expect("serialize connected frame");
        yield Ok::<SseEvent, Infallible>(connected);

        while let Some(event) = rx.recv().await {
            let type_name = serde_json::to_value(&event.event_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "EVENT".to_string());
            let sse_event = SseEvent::default()
                .event(type_name)
                .json_data(event.to_json_value())
                .expect("serialize event");
            yield Ok::<SseEvent, Infallible>(sse_event);
        }
        sse_clients.fetch_sub(1, Ordering::SeqCst);
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn client_count(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "clients": state.sse_clients.load(Ordering::SeqCst) }))
}
