//! Event bus: the engine's fan-out mechanism for lifecycle, approval, and
//! recovery events, consumed by the stdout sink and by SSE subscribers.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{Event, EventType};
pub use sink::{ChannelSink, EventSink, StdoutSink};
