//! Recomputation of a single product's footprint.
//!
//! Opens a [`Rescore`](crate::storage::Rescore) on the product, runs the score
//! engine on what it read and either writes the product's contributions or
//! invalidates them, all in one write transaction.

use anyhow::Result;
use footprint_core::types::ProductId;
use footprint_engine::{score_product, ScoreError};
use tracing::{debug, info};

use crate::storage::Storage;

/// What recomputing one product did.
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    /// Contributions were replaced.
    Updated {
        /// Sum of all contributions, in kilograms of CO2e.
        total: f64,
        /// Number of contributions written.
        contributions: usize,
    },

    /// The product has no complete footprint; its contributions were deleted.
    Invalidated {
        /// Why the score could not be computed.
        reason: ScoreError,
        /// Number of contributions removed.
        removed: u64,
    },

    /// The product no longer exists.
    Missing,
}

/// Recompute a product by id.
///
/// The product and its factors are read under the store's write lock, so the
/// result reflects the latest committed data and no catalog write can land
/// between the read and the write. Recomputing twice with unchanged data
/// writes identical scores.
pub async fn recompute_product(storage: &Storage, id: ProductId) -> Result<RecomputeOutcome> {
    let Some(rescore) = storage.begin_rescore(id).await? else {
        debug!("Product {} no longer exists, nothing to recompute", id);
        return Ok(RecomputeOutcome::Missing);
    };
    let name = rescore.product().name.clone();

    match score_product(rescore.product(), rescore.factors()) {
        Ok(contributions) => {
            let total: f64 = contributions.iter().map(|c| c.score).sum();
            let count = rescore.write(&contributions).await?;
            info!("Updated footprint score for product {}: {}", name, total);
            Ok(RecomputeOutcome::Updated {
                total,
                contributions: count,
            })
        }
        Err(reason) => {
            let removed = rescore.invalidate().await?;
            info!("Invalidated footprint score for product {}: {}", name, reason);
            Ok(RecomputeOutcome::Invalidated { reason, removed })
        }
    }
}

/// Load a product by name and recompute it.
///
/// This is the manual trigger; it bypasses the pending queue.
pub async fn recompute_product_named(storage: &Storage, name: &str) -> Result<RecomputeOutcome> {
    match storage.find_product_by_name(name).await? {
        Some(product) => recompute_product(storage, product.id).await,
        None => {
            debug!("Product {} does not exist, nothing to recompute", name);
            Ok(RecomputeOutcome::Missing)
        }
    }
}
