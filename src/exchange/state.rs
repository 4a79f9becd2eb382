//! Domain view of an exchange, as returned by the REST surface.
//!
//! Distinct from `store::models::ExchangeRow`: this is the shape services
//! and handlers work with, decoupled from the storage encoding (status as an
//! enum, timestamps as `DateTime<Utc>`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::store::models::ExchangeStatus;
use crate::store::models::ExchangeRow;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeState {
    pub exchange_id: String,
    pub route_id: String,
    pub status: ExchangeStatus,
    pub current_step: i64,
    pub current_step_name: Option<String>,
    pub payload: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_checkpoint: DateTime<Utc>,
}

impl From<ExchangeRow> for ExchangeState {
    fn from(row: ExchangeRow) -> Self {
        Self {
            exchange_id: row.exchange_id,
            route_id: row.route_id,
            status: ExchangeStatus::parse(&row.status).unwrap_or(ExchangeStatus::Failed),
            current_step: row.current_step,
            current_step_name: row.current_step_name,
            payload: row.payload,
            context: row.context,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_checkpoint: row.last_checkpoint,
        }
    }
}
