//! On startup and on periodic ticks: finds abandoned RUNNING exchanges and
//! resubmits them; restores approval waiters; fails stalled runs;
//! auto-rejects timed-out approvals.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::approval::ApprovalService;
use crate::config::RecoveryTickConfig;
use crate::error::Result;
use crate::exchange::ExchangeStateManager;
use crate::route::RouteEngine;

pub struct CrashRecoveryService {
    exchanges: Arc<ExchangeStateManager>,
    approvals: Arc<ApprovalService>,
    engine: Arc<RouteEngine>,
    config: RecoveryTickConfig,
}

impl CrashRecoveryService {
    pub fn new(
        exchanges: Arc<ExchangeStateManager>,
        approvals: Arc<ApprovalService>,
        engine: Arc<RouteEngine>,
        config: RecoveryTickConfig,
    ) -> Self {
        Self {
            exchanges,
            approvals,
            engine,
            config,
        }
    }

    /// Runs once before the HTTP listener binds, so no client ever observes
    /// a RUNNING exchange the recovery pass hasn't already resubmitted.
    #[instrument(skip(self), err)]
    pub async fn on_startup(&self) -> Result<()> {
        let running = self.exchanges.store().list_running_exchanges().await?;
        for row in running {
            self.exchanges.mark_recovering(&row.route_id, &row.exchange_id);
            self.engine.submit(row.exchange_id);
        }
        self.approvals.restore_pending_approvals().await?;
        Ok(())
    }

    /// Spawns the three recovery timers (approved-resume, stalled-scan,
    /// timeout-scan) as background tasks holding a clone of this service.
    pub fn spawn_tickers(self: &Arc<Self>) {
        let resume = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(resume.config.approved_resume_interval);
            loop {
                interval.tick().await;
                if let Err(err) = resume.resume_approved_waiters().await {
                    tracing::warn!(error = %err, "approved-waiter resume tick failed");
                }
            }
        });

        let stalled = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stalled.config.stalled_scan_interval);
            loop {
                interval.tick().await;
                if let Err(err) = stalled.scan_stalled().await {
                    tracing::warn!(error = %err, "stalled-exchange scan failed");
                }
            }
        });

        let timeouts = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeouts.config.timeout_scan_interval);
            loop {
                interval.tick().await;
                if let Err(err) = timeouts.scan_approval_timeouts().await {
                    tracing::warn!(error = %err, "approval-timeout scan failed");
                }
            }
        });
    }

    #[instrument(skip(self), err)]
    async fn resume_approved_waiters(&self) -> Result<()> {
        let waiting = self.exchanges.store().list_approved_waiting_exchanges().await?;
        for row in waiting {
            self.exchanges.resume_after_approval(&row.exchange_id).await?;
            self.engine.submit(row.exchange_id);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn scan_stalled(&self) -> Result<()> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.stalled_threshold).unwrap_or_else(|_| chrono::Duration::zero());
        let running = self.exchanges.store().list_running_exchanges().await?;
        for row in running {
            if row.last_checkpoint < threshold {
                self.exchanges.mark_stalled(&row.route_id, &row.exchange_id);
            }
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn scan_approval_timeouts(&self) -> Result<()> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.approval_timeout_threshold).unwrap_or_else(|_| chrono::Duration::zero());
        let stale = self
            .exchanges
            .store()
            .list_stale_pending_approvals(threshold)
            .await?;
        for row in stale {
            self.approvals
                .reject(&row.id, Some("Approval timed out".to_string()))
                .await?;
        }
        Ok(())
    }
}
