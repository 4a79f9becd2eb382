//! Destinations that events are fanned out to: stdout tracing output for
//! operators, and an in-process channel sink that feeds the SSE endpoint.

use tokio::sync::mpsc;

use super::event::Event;

/// A registered consumer of engine events. Implementations must not block;
/// the bus calls `handle` synchronously while holding its sink list locked.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &Event);

    fn name(&self) -> String;

    /// True once this sink's receiving end is known to be gone. The bus
    /// polls this to evict sinks that will never accept another event.
    fn is_dead(&self) -> bool {
        false
    }
}

/// Emits every event as a structured `tracing` line. Always registered.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn handle(&self, event: &Event) {
        tracing::info!(
            event_type = ?event.event_type,
            route_id = %event.route_id,
            exchange_id = ?event.exchange_id,
            "event"
        );
    }

    fn name(&self) -> String {
        "stdout".to_string()
    }
}

/// Forwards events onto an unbounded mpsc channel, the other end of which is
/// polled by an SSE stream. Registered per-subscriber by the `/events` route
/// handler; once the client disconnects and the receiver is dropped, `handle`
/// starts failing and the bus evicts this sink on the next publish.
pub struct ChannelSink {
    name: String,
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }
}

impl EventSink for ChannelSink {
    fn handle(&self, event: &Event) {
        let _ = self.tx.send(event.clone());
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_dead(&self) -> bool {
        self.tx.is_closed()
    }
}
