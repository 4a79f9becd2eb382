//! Route execution: the declared step sequences and the runner that walks
//! them.

pub mod chat_route;
pub mod engine;
pub mod step;

pub use chat_route::{CHAT_DURABLE_ROUTE, DEMO_ECHO_ROUTE};
pub use engine::RouteEngine;
pub use step::{RouteDefinition, Step, StepAction, StepContext};
