//! The five step-action kinds a route step can be, and the body it acts on.
//!
//! Modeled as a tagged variant rather than a trait object — there are
//! exactly five kinds and they don't grow at runtime (routes are registered
//! once, at startup).

use serde_json::{Map, Value};

use crate::error::Result;

/// Mutable working state threaded through one exchange's step sequence.
/// Seeded from the exchange's `payload` and accumulated into as steps run;
/// the final value becomes the exchange's `context` on completion.
pub struct StepContext {
    pub exchange_id: String,
    pub route_id: String,
    pub max_payload_len: usize,
    pub body: Map<String, Value>,
}

impl StepContext {
    pub fn new(exchange_id: String, route_id: String, payload: &str, max_payload_len: usize) -> Self {
        let mut body = Map::new();
        body.insert("payload".to_string(), Value::String(payload.to_string()));
        Self {
            exchange_id,
            route_id,
            max_payload_len,
            body,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.body.insert(key.to_string(), Value::String(value.into()));
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.body.clone()).to_string()
    }
}

pub enum StepAction {
    /// Pure, side-effect-free mapping of the current body.
    Compute(fn(&mut StepContext) -> Result<()>),
    /// Writes a `RouteLog` row; the function renders the message text.
    AuditLog(fn(&StepContext) -> String),
    /// Chat or streaming-chat call against the LLM adapter.
    LlmCall,
    /// Suspends the exchange until an operator approves or rejects it.
    ApprovalGate { blocking: bool },
    /// Records a success/failure count against the route's `RouteMetric`.
    MetricUpdate,
}

pub struct Step {
    pub name: &'static str,
    pub action: StepAction,
}

impl Step {
    pub const fn new(name: &'static str, action: StepAction) -> Self {
        Self { name, action }
    }
}

pub type RouteDefinition = Vec<Step>;
