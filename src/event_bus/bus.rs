//! Central fan-out point for engine events.
//!
//! The engine emits lifecycle events (`ExchangeCreated`, ...) starting at
//! process boot, before the SSE endpoint has any client subscribed, and
//! those events must still reach a client that connects moments later. A
//! plain broadcast channel would drop anything published before the first
//! subscriber attaches, so sinks live behind a lock (`Arc<Mutex<Vec<_>>>`,
//! a `StdoutSink` registered by default) and publishes before the first
//! non-default registration are queued in a bounded pre-init buffer, then
//! drained in order into that sink, exactly once.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::Event;
use super::sink::{EventSink, StdoutSink};

const BUFFER_CAPACITY: usize = 1000;

struct Inner {
    sinks: Vec<Arc<dyn EventSink>>,
    buffer: VecDeque<Event>,
    draining: bool,
}

/// Publishes engine events to every registered sink.
///
/// Before any non-default sink registers, published events accumulate in a
/// bounded buffer (dropping the oldest entry once full, with a warning) and
/// are replayed in order the moment a sink is added. After that point,
/// publishing fans out synchronously and immediately.
pub struct EventBus {
    inner: Mutex<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sinks: vec![Arc::new(StdoutSink)],
                buffer: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Register a sink. If this is the first registration beyond the
    /// default stdout sink, any buffered pre-init events are drained into
    /// every currently-registered sink first.
    pub fn register(&self, sink: Arc<dyn EventSink>) {
        let mut inner = self.inner.lock();
        inner.sinks.push(sink);
        if !inner.draining && !inner.buffer.is_empty() {
            inner.draining = true;
            let buffered: Vec<Event> = inner.buffer.drain(..).collect();
            let sinks = inner.sinks.clone();
            drop(inner);
            for event in &buffered {
                for sink in &sinks {
                    sink.handle(event);
                }
            }
            self.inner.lock().draining = false;
        }
    }

    /// Remove sinks whose receiving end has gone away. `ChannelSink` reports
    /// this via `is_dead`; other sink kinds are never evicted this way.
    pub fn evict_dead(&self) {
        let mut inner = self.inner.lock();
        inner.sinks.retain(|sink| !sink.is_dead());
    }

    pub fn publish(&self, event: Event) {
        let mut inner = self.inner.lock();
        if inner.sinks.len() <= 1 {
            if inner.buffer.len() >= BUFFER_CAPACITY {
                inner.buffer.pop_front();
                tracing::warn!("event bus pre-init buffer full, dropping oldest event");
            }
            inner.buffer.push_back(event.clone());
        }
        for sink in &inner.sinks {
            sink.handle(&event);
        }
        inner.sinks.retain(|sink| !sink.is_dead());
    }
}
