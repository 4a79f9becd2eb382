use std::sync::Arc;

use waygate::event_bus::{ChannelSink, Event, EventBus, EventType};

#[test]
fn events_published_before_any_sink_registers_are_replayed_in_order() {
    let bus = EventBus::new();
    bus.publish(Event::new(EventType::ExchangeCreated, "demo-echo").with_exchange("a"));
    bus.publish(Event::new(EventType::ExchangeStarted, "demo-echo").with_exchange("a"));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bus.register(Arc::new(ChannelSink::new("test", tx)));

    let first = rx.try_recv().expect("first buffered event");
    let second = rx.try_recv().expect("second buffered event");
    assert_eq!(first.event_type, EventType::ExchangeCreated);
    assert_eq!(second.event_type, EventType::ExchangeStarted);
    assert!(rx.try_recv().is_err());
}

#[test]
fn events_published_after_registration_fan_out_immediately() {
    let bus = EventBus::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bus.register(Arc::new(ChannelSink::new("test", tx)));

    bus.publish(Event::new(EventType::Checkpoint, "demo-echo").with_exchange("a"));
    let event = rx.try_recv().expect("event delivered without buffering delay");
    assert_eq!(event.event_type, EventType::Checkpoint);
}

#[test]
fn dead_channel_sinks_are_evicted_on_next_publish() {
    let bus = EventBus::new();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    bus.register(Arc::new(ChannelSink::new("test", tx)));
    drop(rx);

    bus.publish(Event::new(EventType::ExchangeCompleted, "demo-echo"));
    bus.evict_dead();

    // A fresh sink registered now should only see events published after it
    // attaches, confirming the dead sink's own buffered state didn't linger.
    let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
    bus.register(Arc::new(ChannelSink::new("test2", tx2)));
    assert!(rx2.try_recv().is_err());
}
