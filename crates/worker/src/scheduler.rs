//! Claim scheduler.
//!
//! Runs the reclaim -> claim -> load -> dispatch cycle on a fixed interval.
//! Any number of schedulers, in one process or many, may share a database:
//! the claim is the only synchronization point.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::storage::{now_millis, Storage};

/// Result of one claim cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CycleReport {
    /// Expired leases handed back to `pending`.
    pub reclaimed: u64,
    /// Entries claimed in this cycle.
    pub claimed: usize,
    /// What dispatching the claimed entries did.
    pub dispatch: DispatchReport,
    /// When the cycle finished (unix millis).
    pub finished_at: i64,
}

/// Periodic claimer that drains the pending-change queue.
#[derive(Clone)]
pub struct ClaimScheduler {
    storage: Storage,
    dispatcher: Dispatcher,
    interval: Duration,
    batch_size: u32,
    lease_ttl: Duration,
    last_cycle: Arc<RwLock<Option<CycleReport>>>,
}

impl ClaimScheduler {
    /// Create a new scheduler.
    ///
    /// # Arguments
    ///
    /// * `storage` - Storage holding the queue and the catalog
    /// * `interval` - Time between two cycles
    /// * `batch_size` - Maximum entries claimed per cycle
    /// * `lease_ttl` - Time since its last renewal after which a `processing`
    ///   entry is reclaimed
    pub fn new(storage: Storage, interval: Duration, batch_size: u32, lease_ttl: Duration) -> Self {
        Self {
            dispatcher: Dispatcher::new(storage.clone()),
            storage,
            interval,
            batch_size,
            lease_ttl,
            last_cycle: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a scheduler from the `[worker]` configuration section.
    pub fn from_config(storage: Storage, config: &WorkerConfig) -> Self {
        Self::new(
            storage,
            config.poll_interval(),
            config.batch_size,
            config.lease_ttl(),
        )
    }

    /// Run the claim loop.
    ///
    /// Runs indefinitely; a failed cycle is logged and retried on the next
    /// tick. It should be spawned as a background task or raced against a
    /// shutdown signal.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Claim scheduler starting with interval: {:?}, batch size: {}, lease: {:?}",
            self.interval, self.batch_size, self.lease_ttl
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(e) = self.run_cycle().await {
                warn!("Claim cycle failed: {:#}", e);
            }
        }
    }

    /// Run a single cycle now.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let now = now_millis();

        let reclaimed = self
            .storage
            .reclaim_expired(self.lease_ttl, now)
            .await
            .context("Failed to reclaim expired leases")?;
        if reclaimed > 0 {
            warn!("Reclaimed {} pending changes with expired leases", reclaimed);
        }

        let claimed = self
            .storage
            .claim_pending(self.batch_size, now)
            .await
            .context("Failed to claim pending changes")?;
        let claimed_count = claimed.len();

        let dispatch = if claimed.is_empty() {
            debug!("No pending changes");
            DispatchReport::default()
        } else {
            info!("Claimed {} pending changes", claimed_count);
            let loaded = self
                .storage
                .load_claimed(claimed)
                .await
                .context("Failed to load claimed changes")?;
            self.dispatcher.dispatch(loaded).await
        };

        let report = CycleReport {
            reclaimed,
            claimed: claimed_count,
            dispatch,
            finished_at: now_millis(),
        };

        if claimed_count > 0 {
            info!(
                "Cycle done: {} resolved, {} failed, {} lost, {} updated, {} invalidated",
                dispatch.resolved,
                dispatch.failed,
                dispatch.lost,
                dispatch.updated,
                dispatch.invalidated
            );
        }

        *self.last_cycle.write().await = Some(report);

        Ok(report)
    }

    /// Run cycles back to back until one claims nothing.
    ///
    /// Returns the combined dispatch report. Entries enqueued while draining
    /// are picked up as well.
    pub async fn drain(&self) -> Result<DispatchReport> {
        let mut total = DispatchReport::default();
        loop {
            let report = self.run_cycle().await?;
            if report.claimed == 0 {
                return Ok(total);
            }
            total.merge(&report.dispatch);
        }
    }

    /// Report of the most recent cycle, if any ran.
    pub async fn last_cycle(&self) -> Option<CycleReport> {
        *self.last_cycle.read().await
    }
}
