//! Recovery Worker
//!
//! Background sweep that drives stale settlements to a terminal state after a
//! crash or a hung external call.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::broadcaster::SettlementBroadcaster;
use super::error::SettlementError;
use super::state::SettlementState;
use super::store::SettlementStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale settlements
    pub scan_interval: Duration,
    /// How long a settlement must sit untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum settlements to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

/// Periodically scans for settlements stuck in non-terminal states and
/// resumes them. Compensation is idempotent across writers, so the sweep is
/// safe to run alongside a submitter that turns out to still be alive.
pub struct RecoveryWorker {
    store: Arc<dyn SettlementStore>,
    broadcaster: Arc<SettlementBroadcaster>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        broadcaster: Arc<SettlementBroadcaster>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            config,
        }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting settlement recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One scan cycle. Returns the number of settlements driven to a
    /// terminal state.
    pub async fn scan_and_recover(&self) -> Result<usize, SettlementError> {
        let stale = self
            .store
            .find_stale(
                self.config.stale_threshold.as_secs() as i64,
                self.config.batch_size as i64,
            )
            .await?;

        if stale.is_empty() {
            debug!("No stale settlements found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale settlements to recover");

        let mut recovered = 0;

        for record in &stale {
            debug!(
                settlement_id = %record.id,
                state = %record.state,
                retry_count = record.retry_count,
                "Recovering settlement"
            );

            if record.state == SettlementState::RollingBack && record.retry_count > 10 {
                warn!(
                    settlement_id = %record.id,
                    retry_count = record.retry_count,
                    "CRITICAL: compensation still failing after many retries, needs operator attention"
                );
            }

            match self.broadcaster.recover(record).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    error!(
                        settlement_id = %record.id,
                        error = %e,
                        "Failed to recover settlement"
                    );
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered settlements this scan");
        }

        Ok(recovered)
    }
}
