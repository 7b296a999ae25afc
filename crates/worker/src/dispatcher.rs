//! Recomputation dispatcher.
//!
//! Turns claimed pending changes into product recomputations:
//! - product change: recompute that product
//! - factor change: recompute every product using an ingredient of that name
//!
//! Entries are handled one at a time. The lease on an entry is renewed before
//! it is handled and before each product of a fan-out; once the lease is lost
//! to another worker the entry is dropped untouched. An entry is deleted only
//! after all of its recomputations are done; a store error leaves it
//! `processing` so that lease expiry hands it back to the queue.

use anyhow::Result;
use footprint_core::types::PendingChange;
use tracing::{debug, warn};

use crate::recompute::{recompute_product, RecomputeOutcome};
use crate::storage::{now_millis, ClaimedChange, ClaimedSubject, Storage};

/// Tally of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    /// Entries deleted from the queue.
    pub resolved: usize,
    /// Entries left `processing` after a store error.
    pub failed: usize,
    /// Entries already deleted, or claimed again by another worker, before
    /// they were done.
    pub lost: usize,
    /// Products whose contributions were replaced.
    pub updated: usize,
    /// Products whose contributions were invalidated.
    pub invalidated: usize,
    /// Products that no longer existed.
    pub missing: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: &RecomputeOutcome) {
        match outcome {
            RecomputeOutcome::Updated { .. } => self.updated += 1,
            RecomputeOutcome::Invalidated { .. } => self.invalidated += 1,
            RecomputeOutcome::Missing => self.missing += 1,
        }
    }

    /// Total number of product recomputations.
    pub fn recomputed(&self) -> usize {
        self.updated + self.invalidated + self.missing
    }

    /// Add another report to this one.
    pub fn merge(&mut self, other: &DispatchReport) {
        self.resolved += other.resolved;
        self.failed += other.failed;
        self.lost += other.lost;
        self.updated += other.updated;
        self.invalidated += other.invalidated;
        self.missing += other.missing;
    }
}

/// Dispatches claimed changes to product recomputations.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    storage: Storage,
}

impl Dispatcher {
    /// Create a dispatcher over `storage`.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Handle every claimed change in order.
    ///
    /// Never fails as a whole: an entry whose handling errors is logged and
    /// skipped.
    pub async fn dispatch(&self, claimed: Vec<ClaimedChange>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for change in claimed {
            let pending = change.pending.clone();
            match self.handle(change).await {
                Ok(Some(outcomes)) => {
                    for outcome in &outcomes {
                        report.record(outcome);
                    }
                    match self.resolve(&pending).await {
                        Ok(true) => report.resolved += 1,
                        Ok(false) => report.lost += 1,
                        Err(e) => {
                            warn!("Failed to resolve pending change {}: {:#}", pending.id, e);
                            report.failed += 1;
                        }
                    }
                }
                Ok(None) => {
                    debug!(
                        "Lease on pending change {} was taken over, dropping it",
                        pending.id
                    );
                    report.lost += 1;
                }
                Err(e) => {
                    warn!(
                        "Pending change {} ({}) failed, leaving it for reclaim: {:#}",
                        pending.id, pending.target, e
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Run the recomputations one claimed change calls for.
    ///
    /// Returns `None`, having stopped early, if the entry's lease was lost.
    pub async fn handle(&self, change: ClaimedChange) -> Result<Option<Vec<RecomputeOutcome>>> {
        if !self.renew(&change.pending).await? {
            return Ok(None);
        }

        match change.subject {
            ClaimedSubject::Product(Some(product)) => {
                Ok(Some(vec![recompute_product(&self.storage, product.id).await?]))
            }
            ClaimedSubject::Product(None) => {
                debug!(
                    "Product of pending change {} no longer exists",
                    change.pending.id
                );
                Ok(Some(vec![RecomputeOutcome::Missing]))
            }
            ClaimedSubject::Factor(Some(factor)) => {
                let dependents = self
                    .storage
                    .find_products_by_ingredient_name(&factor.name)
                    .await?;
                debug!(
                    "Emission factor {} changed, recomputing {} products",
                    factor.name,
                    dependents.len()
                );

                let mut outcomes = Vec::with_capacity(dependents.len());
                for (i, product) in dependents.iter().enumerate() {
                    if i > 0 && !self.renew(&change.pending).await? {
                        return Ok(None);
                    }
                    outcomes.push(recompute_product(&self.storage, product.id).await?);
                }
                Ok(Some(outcomes))
            }
            // Deleting a factor enqueues its dependents directly.
            ClaimedSubject::Factor(None) => {
                debug!(
                    "Emission factor of pending change {} no longer exists",
                    change.pending.id
                );
                Ok(Some(Vec::new()))
            }
        }
    }

    async fn renew(&self, pending: &PendingChange) -> Result<bool> {
        self.storage.renew_lease(pending, now_millis()).await
    }

    async fn resolve(&self, pending: &PendingChange) -> Result<bool> {
        let resolved = self.storage.resolve_pending(pending).await?;
        if !resolved {
            debug!(
                "Pending change {} was already gone or claimed again",
                pending.id
            );
        }
        Ok(resolved)
    }
}
