//! Domain events published by the engine: `{type, routeId, exchangeId?,
//! data}`. A single struct rather than a variant enum, since every engine
//! event carries the same fields.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ExchangeCreated,
    ExchangeStarted,
    Checkpoint,
    ExchangePaused,
    ExchangeResumed,
    WaitingApproval,
    ExchangeCancelled,
    ExchangeCompleted,
    ExchangeFailed,
    ExchangeRecovering,
    ExchangeStalled,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalRejected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub route_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FxHashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, route_id: impl Into<String>) -> Self {
        Self {
            event_type,
            route_id: route_id.into(),
            exchange_id: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange_id: impl Into<String>) -> Self {
        self.exchange_id = Some(exchange_id.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data
            .get_or_insert_with(FxHashMap::default)
            .insert(key.into(), value.into());
        self
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
