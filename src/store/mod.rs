//! Relational persistence: one SQLite database, short committing
//! transactions, bounded retry on the checkpoint insert path.
//!
//! Grounded on `runtimes::checkpointer_sqlite::SQLiteCheckpointer::connect`
//! (pool + embedded `sqlx::migrate!` on connect) and its manual
//! `Row::get`/`try_get` mapping style rather than `query_as`/`FromRow`.

pub mod models;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{EngineError, Result, is_busy};

use models::{ApprovalRow, ApprovalStatus, CheckpointRow, ExchangeRow, RouteLogRow, RouteMetricRow};

const BUSY_RETRIES: u32 = 3;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Store {
    pool: Arc<SqlitePool>,
}

impl Store {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::Store {
                message: format!("migration failure: {e}"),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await.is_ok()
    }

    // ---- exchanges ----------------------------------------------------

    #[instrument(skip(self, payload, context), err)]
    pub async fn insert_exchange(
        &self,
        exchange_id: &str,
        route_id: &str,
        payload: &str,
        context: &str,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO exchange_states \
             (exchange_id, route_id, status, current_step, current_step_name, payload, context, created_at, last_checkpoint) \
             VALUES (?, ?, 'PENDING', 0, NULL, ?, ?, ?, ?)",
        )
        .bind(exchange_id)
        .bind(route_id)
        .bind(payload)
        .bind(context)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_exchange(&self, exchange_id: &str) -> Result<Option<ExchangeRow>> {
        let row = sqlx::query("SELECT * FROM exchange_states WHERE exchange_id = ?")
            .bind(exchange_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| exchange_from_row(&r)))
    }

    #[instrument(skip(self), err)]
    pub async fn list_exchanges(
        &self,
        status: Option<&str>,
        route_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExchangeRow>, i64)> {
        let mut where_clauses = Vec::new();
        if status.is_some() {
            where_clauses.push("status = ?");
        }
        if route_id.is_some() {
            where_clauses.push("route_id = ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) AS c FROM exchange_states {where_sql}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(s) = status {
            count_query = count_query.bind(s);
        }
        if let Some(r) = route_id {
            count_query = count_query.bind(r);
        }
        let total: i64 = count_query.fetch_one(self.pool.as_ref()).await?.get("c");

        let list_sql = format!(
            "SELECT * FROM exchange_states {where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(s) = status {
            list_query = list_query.bind(s);
        }
        if let Some(r) = route_id {
            list_query = list_query.bind(r);
        }
        list_query = list_query.bind(limit).bind(offset);
        let rows = list_query.fetch_all(self.pool.as_ref()).await?;
        Ok((rows.iter().map(exchange_from_row).collect(), total))
    }

    /// Every RUNNING exchange, used by recovery's startup sweep.
    #[instrument(skip(self), err)]
    pub async fn list_running_exchanges(&self) -> Result<Vec<ExchangeRow>> {
        let rows = sqlx::query("SELECT * FROM exchange_states WHERE status = 'RUNNING'")
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.iter().map(exchange_from_row).collect())
    }

    /// WAITING_APPROVAL exchanges with an APPROVED row and no PENDING row —
    /// the non-blocking resume set for the 30s recovery tick.
    #[instrument(skip(self), err)]
    pub async fn list_approved_waiting_exchanges(&self) -> Result<Vec<ExchangeRow>> {
        let rows = sqlx::query(
            "SELECT es.* FROM exchange_states es \
             WHERE es.status = 'WAITING_APPROVAL' \
             AND EXISTS (SELECT 1 FROM approval_requests ar WHERE ar.exchange_id = es.exchange_id AND ar.status = 'APPROVED') \
             AND NOT EXISTS (SELECT 1 FROM approval_requests ar WHERE ar.exchange_id = es.exchange_id AND ar.status = 'PENDING')",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(exchange_from_row).collect())
    }

    #[instrument(skip(self), err)]
    pub async fn update_exchange_status(
        &self,
        exchange_id: &str,
        status: &str,
        set_started: bool,
        set_completed: bool,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE exchange_states SET status = ?, \
             started_at = CASE WHEN ? THEN ? ELSE started_at END, \
             completed_at = CASE WHEN ? THEN ? ELSE completed_at END \
             WHERE exchange_id = ?",
        )
        .bind(status)
        .bind(set_started)
        .bind(&now)
        .bind(set_completed)
        .bind(&now)
        .bind(exchange_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Overwrites `context` with the final result on COMPLETED, or an error
    /// message on FAILED.
    #[instrument(skip(self, context), err)]
    pub async fn set_exchange_context(&self, exchange_id: &str, context: &str) -> Result<()> {
        sqlx::query("UPDATE exchange_states SET context = ? WHERE exchange_id = ?")
            .bind(context)
            .bind(exchange_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    // ---- checkpoints ----------------------------------------------------

    /// Inserts a checkpoint and advances `current_step`/`current_step_name`/
    /// `last_checkpoint` atomically, retrying up to 3x on SQLITE_BUSY.
    /// Returns `false` (no mutation) if `(exchange_id, step_name)` already
    /// exists.
    #[instrument(skip(self, step_data), err)]
    pub async fn checkpoint_insert(
        &self,
        exchange_id: &str,
        step_index: i64,
        step_name: &str,
        step_data: Option<&str>,
    ) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self
                .try_checkpoint_insert(exchange_id, step_index, step_name, step_data)
                .await
            {
                Ok(created) => return Ok(created),
                Err(e) if attempt < BUSY_RETRIES && is_busy(&e) => {
                    attempt += 1;
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn try_checkpoint_insert(
        &self,
        exchange_id: &str,
        step_index: i64,
        step_name: &str,
        step_data: Option<&str>,
    ) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM exchange_checkpoints WHERE exchange_id = ? AND step_name = ?",
        )
        .bind(exchange_id)
        .bind(step_name)
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_some() {
            tx.rollback().await?;
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO exchange_checkpoints (exchange_id, step_index, step_name, step_data, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(exchange_id)
        .bind(step_index)
        .bind(step_name)
        .bind(step_data)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE exchange_states SET current_step = ?, current_step_name = ?, last_checkpoint = ? \
             WHERE exchange_id = ?",
        )
        .bind(step_index)
        .bind(step_name)
        .bind(&now)
        .bind(exchange_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    pub async fn list_checkpoints(&self, exchange_id: &str) -> Result<Vec<CheckpointRow>> {
        let rows = sqlx::query(
            "SELECT * FROM exchange_checkpoints WHERE exchange_id = ? ORDER BY step_index ASC",
        )
        .bind(exchange_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(checkpoint_from_row).collect())
    }

    #[instrument(skip(self), err)]
    pub async fn get_checkpoint_by_name(
        &self,
        exchange_id: &str,
        step_name: &str,
    ) -> Result<Option<CheckpointRow>> {
        let row = sqlx::query(
            "SELECT * FROM exchange_checkpoints WHERE exchange_id = ? AND step_name = ?",
        )
        .bind(exchange_id)
        .bind(step_name)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(|r| checkpoint_from_row(&r)))
    }

    // ---- approvals ----------------------------------------------------

    #[instrument(skip(self, payload), err)]
    pub async fn insert_approval(
        &self,
        exchange_id: &str,
        route_id: &str,
        payload: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO approval_requests (id, exchange_id, route_id, payload, status, created_at) \
             VALUES (?, ?, ?, ?, 'PENDING', ?)",
        )
        .bind(&id)
        .bind(exchange_id)
        .bind(route_id)
        .bind(payload)
        .bind(&now)
        .execute(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub async fn get_approval(&self, id: &str) -> Result<Option<ApprovalRow>> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| approval_from_row(&r)))
    }

    #[instrument(skip(self), err)]
    pub async fn get_approval_by_exchange(&self, exchange_id: &str) -> Result<Option<ApprovalRow>> {
        let row = sqlx::query(
            "SELECT * FROM approval_requests WHERE exchange_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(exchange_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(|r| approval_from_row(&r)))
    }

    #[instrument(skip(self), err)]
    pub async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRow>> {
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE status = 'PENDING' ORDER BY created_at ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(approval_from_row).collect())
    }

    #[instrument(skip(self), err)]
    pub async fn list_stale_pending_approvals(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRow>> {
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE status = 'PENDING' AND created_at < ?",
        )
        .bind(older_than.to_rfc3339())
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(approval_from_row).collect())
    }

    /// Transitions a PENDING approval to APPROVED/REJECTED. Returns `false`
    /// if the row was not PENDING (caller maps this to `InvalidState`).
    #[instrument(skip(self, response), err)]
    pub async fn complete_approval(
        &self,
        id: &str,
        status: ApprovalStatus,
        response: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE approval_requests SET status = ?, response = ?, completed_at = ? \
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(status.as_str())
        .bind(response)
        .bind(&now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- route logs & metrics ------------------------------------------

    #[instrument(skip(self, message), err)]
    pub async fn insert_route_log(
        &self,
        exchange_id: &str,
        route_id: &str,
        step_name: Option<&str>,
        level: &str,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO route_logs (exchange_id, route_id, step_name, level, message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(exchange_id)
        .bind(route_id)
        .bind(step_name)
        .bind(level)
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn list_logs_for_route(&self, route_id: &str) -> Result<Vec<RouteLogRow>> {
        let rows = sqlx::query("SELECT * FROM route_logs WHERE route_id = ? ORDER BY created_at ASC")
            .bind(route_id)
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.iter().map(route_log_from_row).collect())
    }

    #[instrument(skip(self), err)]
    pub async fn list_logs_for_exchange(&self, exchange_id: &str) -> Result<Vec<RouteLogRow>> {
        let rows =
            sqlx::query("SELECT * FROM route_logs WHERE exchange_id = ? ORDER BY created_at ASC")
                .bind(exchange_id)
                .fetch_all(self.pool.as_ref())
                .await?;
        Ok(rows.iter().map(route_log_from_row).collect())
    }

    #[instrument(skip(self), err)]
    pub async fn record_route_outcome(&self, route_id: &str, success: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO route_metrics (route_id, total_count, success_count, failure_count, last_updated_at) \
             VALUES (?, 1, ?, ?, ?) \
             ON CONFLICT(route_id) DO UPDATE SET \
               total_count = total_count + 1, \
               success_count = success_count + excluded.success_count, \
               failure_count = failure_count + excluded.failure_count, \
               last_updated_at = excluded.last_updated_at",
        )
        .bind(route_id)
        .bind(if success { 1 } else { 0 })
        .bind(if success { 0 } else { 1 })
        .bind(&now)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_route_metric(&self, route_id: &str) -> Result<Option<RouteMetricRow>> {
        let row = sqlx::query("SELECT * FROM route_metrics WHERE route_id = ?")
            .bind(route_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| route_metric_from_row(&r)))
    }

    #[instrument(skip(self), err)]
    pub async fn list_route_metrics(&self) -> Result<Vec<RouteMetricRow>> {
        let rows = sqlx::query("SELECT * FROM route_metrics ORDER BY route_id ASC")
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.iter().map(route_metric_from_row).collect())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn exchange_from_row(row: &SqliteRow) -> ExchangeRow {
    ExchangeRow {
        exchange_id: row.get("exchange_id"),
        route_id: row.get("route_id"),
        status: row.get("status"),
        current_step: row.get("current_step"),
        current_step_name: row.try_get("current_step_name").ok(),
        payload: row.get("payload"),
        context: row.get("context"),
        created_at: parse_ts(&row.get::<String, _>("created_at")),
        started_at: row
            .try_get::<Option<String>, _>("started_at")
            .ok()
            .flatten()
            .map(|s| parse_ts(&s)),
        completed_at: row
            .try_get::<Option<String>, _>("completed_at")
            .ok()
            .flatten()
            .map(|s| parse_ts(&s)),
        last_checkpoint: parse_ts(&row.get::<String, _>("last_checkpoint")),
    }
}

fn checkpoint_from_row(row: &SqliteRow) -> CheckpointRow {
    CheckpointRow {
        id: row.get("id"),
        exchange_id: row.get("exchange_id"),
        step_index: row.get("step_index"),
        step_name: row.get("step_name"),
        step_data: row.try_get("step_data").ok(),
        created_at: parse_ts(&row.get::<String, _>("created_at")),
    }
}

fn approval_from_row(row: &SqliteRow) -> ApprovalRow {
    ApprovalRow {
        id: row.get("id"),
        exchange_id: row.get("exchange_id"),
        route_id: row.get("route_id"),
        payload: row.get("payload"),
        status: row.get("status"),
        response: row.try_get("response").ok(),
        created_at: parse_ts(&row.get::<String, _>("created_at")),
        completed_at: row
            .try_get::<Option<String>, _>("completed_at")
            .ok()
            .flatten()
            .map(|s| parse_ts(&s)),
    }
}

fn route_log_from_row(row: &SqliteRow) -> RouteLogRow {
    RouteLogRow {
        id: row.get("id"),
        exchange_id: row.get("exchange_id"),
        route_id: row.get("route_id"),
        step_name: row.try_get("step_name").ok(),
        level: row.get("level"),
        message: row.get("message"),
        created_at: parse_ts(&row.get::<String, _>("created_at")),
    }
}

fn route_metric_from_row(row: &SqliteRow) -> RouteMetricRow {
    RouteMetricRow {
        route_id: row.get("route_id"),
        total_count: row.get("total_count"),
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        last_updated_at: parse_ts(&row.get::<String, _>("last_updated_at")),
    }
}
